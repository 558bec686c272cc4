// src/feed/mod.rs

//! Parsed feed trees and the group-flattening pass
//!
//! A feed enumerates implementations of one or more interfaces. Authors
//! organise implementations under nested groups whose attributes
//! (architecture, stability, dependencies, ...) apply to everything
//! below them; [`Feed::simplify`] folds those groups away and yields the
//! flat list of fully-attributed [`Implementation`]s the solver works
//! on. Scalar attributes on a deeper element override the inherited
//! value; list attributes accumulate parent-first.
//!
//! Feeds arrive here already parsed and signature-checked; downloading
//! and XML handling live behind the `FeedProvider` capability.

use crate::arch::Architecture;
use crate::error::{Error, Result};
use crate::manifest::ManifestDigest;
use crate::requirements::Restriction;
use crate::version::{Version, VersionRange};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identifier of an interface or feed: an absolute `http(s)` URL or an
/// absolute local path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(String);

impl InterfaceId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = id.starts_with("http://") || id.starts_with("https://") || id.starts_with('/');
        if valid && id.len() > 1 {
            Ok(InterfaceId(id))
        } else {
            Err(Error::InvalidInterfaceId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InterfaceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        InterfaceId::new(s)
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for InterfaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How much an implementation is trusted to work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stability {
    Insecure,
    Buggy,
    Developer,
    Testing,
    Stable,
    /// User override only; feeds never publish this
    Preferred,
}

impl FromStr for Stability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insecure" => Ok(Stability::Insecure),
            "buggy" => Ok(Stability::Buggy),
            "developer" => Ok(Stability::Developer),
            "testing" => Ok(Stability::Testing),
            "stable" => Ok(Stability::Stable),
            "preferred" => Ok(Stability::Preferred),
            other => Err(Error::InvalidFeed(format!("unknown stability '{}'", other))),
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stability::Insecure => "insecure",
            Stability::Buggy => "buggy",
            Stability::Developer => "developer",
            Stability::Testing => "testing",
            Stability::Stable => "stable",
            Stability::Preferred => "preferred",
        };
        write!(f, "{}", name)
    }
}

/// How an environment binding combines with an existing value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvMode {
    #[default]
    Prepend,
    Append,
    Replace,
}

/// Instruction to the executor on exposing an implementation's path.
/// Only the data shape lives here; applying bindings is the executor's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Environment {
        name: String,
        /// Path inside the implementation to insert
        insert: Option<String>,
        /// Literal value, mutually exclusive with `insert`
        value: Option<String>,
        mode: EnvMode,
        separator: Option<String>,
    },
    ExecutableInVar {
        name: String,
        command: String,
    },
    ExecutableInPath {
        name: String,
        command: String,
    },
}

/// Whether a dependency must be satisfied for the selection to be valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Importance {
    #[default]
    Essential,
    Recommended,
}

/// A dependency on another interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub interface: InterfaceId,
    pub importance: Importance,
    /// Versions of the target interface this dependency tolerates
    pub version: Option<VersionRange>,
    pub bindings: Vec<Binding>,
}

impl Dependency {
    pub fn new(interface: InterfaceId) -> Self {
        Dependency {
            interface,
            importance: Importance::Essential,
            version: None,
            bindings: Vec::new(),
        }
    }

    /// The restriction this dependency places on its target, if any
    pub fn restriction(&self) -> Option<Restriction> {
        self.version.as_ref().map(|range| Restriction {
            interface: self.interface.clone(),
            range: range.clone(),
        })
    }
}

/// The interface used to run a command's executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runner {
    pub interface: InterfaceId,
    /// Command to use on the runner interface
    pub command: String,
    pub args: Vec<String>,
    pub version: Option<VersionRange>,
}

impl Runner {
    pub fn new(interface: InterfaceId) -> Self {
        Runner {
            interface,
            command: "run".to_string(),
            args: Vec::new(),
            version: None,
        }
    }

    pub fn restriction(&self) -> Option<Restriction> {
        self.version.as_ref().map(|range| Restriction {
            interface: self.interface.clone(),
            range: range.clone(),
        })
    }
}

/// A named way of running an implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    /// Executable path relative to the implementation root
    pub path: Option<String>,
    pub args: Vec<String>,
    pub runner: Option<Runner>,
    pub dependencies: Vec<Dependency>,
    pub restrictions: Vec<Restriction>,
    pub bindings: Vec<Binding>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Command {
            name: name.into(),
            path: None,
            args: Vec::new(),
            runner: None,
            dependencies: Vec::new(),
            restrictions: Vec::new(),
            bindings: Vec::new(),
        }
    }
}

/// One downloadable archive of a retrieval method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSource {
    pub href: String,
    pub size: u64,
    pub mime_type: Option<String>,
    /// Subdirectory of the archive to extract
    pub extract: Option<String>,
    /// Subdirectory of the implementation to extract into
    pub dest: Option<String>,
    pub start_offset: u64,
}

/// How an implementation's directory can be obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalMethod {
    Archive(DownloadSource),
    /// Several archives extracted in order into one directory
    Recipe(Vec<DownloadSource>),
}

/// An implementation as authored in a feed: attributes the enclosing
/// groups provide may be omitted
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImplementationElement {
    pub id: String,
    pub version: Option<Version>,
    pub arch: Option<Architecture>,
    pub stability: Option<Stability>,
    pub license: Option<String>,
    pub main: Option<String>,
    pub languages: Option<Vec<String>>,
    pub digest: ManifestDigest,
    pub local_path: Option<PathBuf>,
    pub retrieval: Vec<RetrievalMethod>,
    pub commands: Vec<Command>,
    pub dependencies: Vec<Dependency>,
    pub restrictions: Vec<Restriction>,
    pub bindings: Vec<Binding>,
}

impl ImplementationElement {
    pub fn new(id: impl Into<String>) -> Self {
        ImplementationElement {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Attributes shared by everything beneath a group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Group {
    pub version: Option<Version>,
    pub arch: Option<Architecture>,
    pub stability: Option<Stability>,
    pub license: Option<String>,
    pub main: Option<String>,
    pub languages: Option<Vec<String>>,
    pub commands: Vec<Command>,
    pub dependencies: Vec<Dependency>,
    pub restrictions: Vec<Restriction>,
    pub bindings: Vec<Binding>,
    pub elements: Vec<Element>,
}

/// A node of a feed's element tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Implementation(ImplementationElement),
    Group(Group),
}

/// A fully attributed implementation, as the solver sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Implementation {
    pub id: String,
    pub version: Version,
    pub arch: Architecture,
    pub stability: Stability,
    pub license: Option<String>,
    pub main: Option<String>,
    pub languages: Vec<String>,
    pub digest: ManifestDigest,
    pub local_path: Option<PathBuf>,
    pub retrieval: Vec<RetrievalMethod>,
    /// Keyed by command name; iteration order is stable
    pub commands: BTreeMap<String, Command>,
    pub dependencies: Vec<Dependency>,
    pub restrictions: Vec<Restriction>,
    pub bindings: Vec<Binding>,
}

impl Implementation {
    /// Whether this implementation can be launched without downloading:
    /// either a local directory or a digest the store may hold
    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }
}

/// Reference from one feed to another feed for the same interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReference {
    pub source: InterfaceId,
    pub arch: Option<Architecture>,
}

/// A parsed feed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub url: InterfaceId,
    pub name: String,
    pub summary: Option<String>,
    /// Interfaces this feed provides implementations for, when it is
    /// not their primary feed
    pub feed_for: Vec<InterfaceId>,
    /// Additional feeds to consult for the same interface
    pub feeds: Vec<FeedReference>,
    pub elements: Vec<Element>,
}

impl Feed {
    pub fn new(url: InterfaceId, name: impl Into<String>) -> Self {
        Feed {
            url,
            name: name.into(),
            summary: None,
            feed_for: Vec::new(),
            feeds: Vec::new(),
            elements: Vec::new(),
        }
    }

    /// Fold group attributes into their leaf implementations and return
    /// the flat list, in document order.
    ///
    /// Fails with `InvalidFeed` when an implementation ends up without a
    /// version after inheritance.
    pub fn simplify(&self) -> Result<Vec<Implementation>> {
        let mut out = Vec::new();
        let root = Inherited::default();
        for element in &self.elements {
            flatten(element, &root, &self.url, &mut out)?;
        }
        Ok(out)
    }
}

/// Accumulated group context during flattening
#[derive(Debug, Clone, Default)]
struct Inherited {
    version: Option<Version>,
    arch: Option<Architecture>,
    stability: Option<Stability>,
    license: Option<String>,
    main: Option<String>,
    languages: Option<Vec<String>>,
    commands: Vec<Command>,
    dependencies: Vec<Dependency>,
    restrictions: Vec<Restriction>,
    bindings: Vec<Binding>,
}

impl Inherited {
    fn extend_with(&self, group: &Group) -> Inherited {
        let mut next = self.clone();
        if group.version.is_some() {
            next.version = group.version.clone();
        }
        if group.arch.is_some() {
            next.arch = group.arch.clone();
        }
        if group.stability.is_some() {
            next.stability = group.stability;
        }
        if group.license.is_some() {
            next.license = group.license.clone();
        }
        if group.main.is_some() {
            next.main = group.main.clone();
        }
        if group.languages.is_some() {
            next.languages = group.languages.clone();
        }
        next.commands.extend(group.commands.iter().cloned());
        next.dependencies.extend(group.dependencies.iter().cloned());
        next.restrictions.extend(group.restrictions.iter().cloned());
        next.bindings.extend(group.bindings.iter().cloned());
        next
    }
}

fn flatten(
    element: &Element,
    inherited: &Inherited,
    feed_url: &InterfaceId,
    out: &mut Vec<Implementation>,
) -> Result<()> {
    match element {
        Element::Group(group) => {
            let context = inherited.extend_with(group);
            for child in &group.elements {
                flatten(child, &context, feed_url, out)?;
            }
            Ok(())
        }
        Element::Implementation(leaf) => {
            let version = leaf
                .version
                .clone()
                .or_else(|| inherited.version.clone())
                .ok_or_else(|| {
                    Error::InvalidFeed(format!(
                        "implementation '{}' in {} has no version",
                        leaf.id, feed_url
                    ))
                })?;

            // Later commands override earlier ones of the same name,
            // so a leaf redefining an inherited command wins
            let mut commands = BTreeMap::new();
            for command in inherited.commands.iter().chain(leaf.commands.iter()) {
                commands.insert(command.name.clone(), command.clone());
            }

            let mut dependencies = inherited.dependencies.clone();
            dependencies.extend(leaf.dependencies.iter().cloned());
            let mut restrictions = inherited.restrictions.clone();
            restrictions.extend(leaf.restrictions.iter().cloned());
            let mut bindings = inherited.bindings.clone();
            bindings.extend(leaf.bindings.iter().cloned());

            out.push(Implementation {
                id: leaf.id.clone(),
                version,
                arch: leaf
                    .arch
                    .clone()
                    .or_else(|| inherited.arch.clone())
                    .unwrap_or_default(),
                stability: leaf
                    .stability
                    .or(inherited.stability)
                    .unwrap_or(Stability::Stable),
                license: leaf.license.clone().or_else(|| inherited.license.clone()),
                main: leaf.main.clone().or_else(|| inherited.main.clone()),
                languages: leaf
                    .languages
                    .clone()
                    .or_else(|| inherited.languages.clone())
                    .unwrap_or_default(),
                digest: leaf.digest.clone(),
                local_path: leaf.local_path.clone(),
                retrieval: leaf.retrieval.clone(),
                commands,
                dependencies,
                restrictions,
                bindings,
            });
            Ok(())
        }
    }
}
