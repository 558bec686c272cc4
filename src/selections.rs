// src/selections.rs

//! The solver's output: one chosen implementation per interface
//!
//! Selections are appended in the order the solve commits to them (root
//! first, then depth-first through runners and dependencies) and that
//! order is preserved through serialization, so identical inputs produce
//! byte-identical documents. The canonical XML form is written by hand:
//! fixed attribute order, two-space indentation, `\n` line endings.

use crate::arch::Architecture;
use crate::error::{Error, Result};
use crate::feed::{Binding, Command, Dependency, EnvMode, InterfaceId, Stability};
use crate::manifest::ManifestDigest;
use crate::version::Version;
use std::fmt::Write as _;
use std::path::PathBuf;

pub const SELECTIONS_XMLNS: &str = "http://zero-install.sourceforge.net/2004/injector/interface";

/// One chosen implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub interface: InterfaceId,
    pub id: String,
    pub version: Version,
    pub arch: Architecture,
    pub stability: Stability,
    pub from_feed: InterfaceId,
    pub digest: ManifestDigest,
    /// Set for implementations that live outside the store
    pub local_path: Option<PathBuf>,
    pub bindings: Vec<Binding>,
    pub dependencies: Vec<Dependency>,
    /// Only the commands this solve actually needs
    pub commands: Vec<Command>,
}

impl Selection {
    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// A complete, ordered solver result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selections {
    pub interface: InterfaceId,
    pub command: Option<String>,
    selections: Vec<Selection>,
}

impl Selections {
    pub fn new(interface: InterfaceId, command: Option<String>) -> Self {
        Selections {
            interface,
            command,
            selections: Vec::new(),
        }
    }

    /// Append a selection; each interface may appear only once
    pub fn push(&mut self, selection: Selection) -> Result<()> {
        if self.find(&selection.interface).is_some() {
            return Err(Error::InvalidFeed(format!(
                "interface {} selected twice",
                selection.interface
            )));
        }
        self.selections.push(selection);
        Ok(())
    }

    pub fn find(&self, interface: &InterfaceId) -> Option<&Selection> {
        self.selections.iter().find(|s| &s.interface == interface)
    }

    pub(crate) fn find_mut(&mut self, interface: &InterfaceId) -> Option<&mut Selection> {
        self.selections
            .iter_mut()
            .find(|s| &s.interface == interface)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selection> {
        self.selections.iter()
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Drop selections back to `len`, undoing a failed branch
    pub(crate) fn truncate(&mut self, len: usize) {
        self.selections.truncate(len);
    }

    /// The command chain root → runner → runner-of-runner, following
    /// each command's runner into its selection
    pub fn command_chain(&self) -> Vec<(&InterfaceId, &Command)> {
        let mut chain = Vec::new();
        let mut cursor = self
            .command
            .as_deref()
            .map(|name| (&self.interface, name.to_string()));

        while let Some((interface, command_name)) = cursor {
            let Some(selection) = self.find(interface) else {
                break;
            };
            let Some(command) = selection.command(&command_name) else {
                break;
            };
            chain.push((&selection.interface, command));
            cursor = command
                .runner
                .as_ref()
                .map(|r| (&r.interface, r.command.clone()));
        }
        chain
    }

    /// Canonical XML rendering
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\"?>\n");
        let _ = write!(
            out,
            "<selections xmlns=\"{}\" interface=\"{}\"",
            SELECTIONS_XMLNS,
            escape(self.interface.as_str())
        );
        if let Some(command) = &self.command {
            let _ = write!(out, " command=\"{}\"", escape(command));
        }
        out.push_str(">\n");

        for selection in &self.selections {
            write_selection(&mut out, selection);
        }

        out.push_str("</selections>\n");
        out
    }
}

fn write_selection(out: &mut String, selection: &Selection) {
    let _ = write!(
        out,
        "  <selection interface=\"{}\" id=\"{}\" version=\"{}\" arch=\"{}\" stability=\"{}\" from-feed=\"{}\"",
        escape(selection.interface.as_str()),
        escape(&selection.id),
        selection.version,
        selection.arch,
        selection.stability,
        escape(selection.from_feed.as_str()),
    );
    if !selection.digest.is_empty() {
        let _ = write!(out, " digest=\"{}\"", selection.digest);
    }
    if let Some(path) = &selection.local_path {
        let _ = write!(out, " local-path=\"{}\"", escape(&path.to_string_lossy()));
    }

    let empty = selection.bindings.is_empty()
        && selection.dependencies.is_empty()
        && selection.commands.is_empty();
    if empty {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");

    for binding in &selection.bindings {
        write_binding(out, binding, "    ");
    }
    for dependency in &selection.dependencies {
        write_dependency(out, dependency, "    ");
    }
    for command in &selection.commands {
        write_command(out, command, "    ");
    }
    out.push_str("  </selection>\n");
}

fn write_command(out: &mut String, command: &Command, indent: &str) {
    let _ = write!(out, "{}<command name=\"{}\"", indent, escape(&command.name));
    if let Some(path) = &command.path {
        let _ = write!(out, " path=\"{}\"", escape(path));
    }

    let empty = command.args.is_empty()
        && command.runner.is_none()
        && command.bindings.is_empty()
        && command.dependencies.is_empty();
    if empty {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");

    let inner = format!("{}  ", indent);
    for arg in &command.args {
        let _ = write!(out, "{}<arg>{}</arg>\n", inner, escape(arg));
    }
    if let Some(runner) = &command.runner {
        let _ = write!(
            out,
            "{}<runner interface=\"{}\" command=\"{}\"",
            inner,
            escape(runner.interface.as_str()),
            escape(&runner.command)
        );
        if runner.args.is_empty() {
            out.push_str("/>\n");
        } else {
            out.push_str(">\n");
            for arg in &runner.args {
                let _ = write!(out, "{}  <arg>{}</arg>\n", inner, escape(arg));
            }
            let _ = write!(out, "{}</runner>\n", inner);
        }
    }
    for binding in &command.bindings {
        write_binding(out, binding, &inner);
    }
    for dependency in &command.dependencies {
        write_dependency(out, dependency, &inner);
    }
    let _ = write!(out, "{}</command>\n", indent);
}

fn write_dependency(out: &mut String, dependency: &Dependency, indent: &str) {
    let _ = write!(
        out,
        "{}<requires interface=\"{}\"",
        indent,
        escape(dependency.interface.as_str())
    );
    if let Some(range) = &dependency.version {
        let _ = write!(out, " version=\"{}\"", range);
    }
    if dependency.bindings.is_empty() {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");
    for binding in &dependency.bindings {
        write_binding(out, binding, &format!("{}  ", indent));
    }
    let _ = write!(out, "{}</requires>\n", indent);
}

fn write_binding(out: &mut String, binding: &Binding, indent: &str) {
    match binding {
        Binding::Environment {
            name,
            insert,
            value,
            mode,
            separator,
        } => {
            let _ = write!(out, "{}<environment name=\"{}\"", indent, escape(name));
            if let Some(insert) = insert {
                let _ = write!(out, " insert=\"{}\"", escape(insert));
            }
            if let Some(value) = value {
                let _ = write!(out, " value=\"{}\"", escape(value));
            }
            let mode = match mode {
                EnvMode::Prepend => "prepend",
                EnvMode::Append => "append",
                EnvMode::Replace => "replace",
            };
            let _ = write!(out, " mode=\"{}\"", mode);
            if let Some(separator) = separator {
                let _ = write!(out, " separator=\"{}\"", escape(separator));
            }
            out.push_str("/>\n");
        }
        Binding::ExecutableInVar { name, command } => {
            let _ = write!(
                out,
                "{}<executable-in-var name=\"{}\" command=\"{}\"/>\n",
                indent,
                escape(name),
                escape(command)
            );
        }
        Binding::ExecutableInPath { name, command } => {
            let _ = write!(
                out,
                "{}<executable-in-path name=\"{}\" command=\"{}\"/>\n",
                indent,
                escape(name),
                escape(command)
            );
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
