// src/solver/mod.rs

//! Backtracking selection of one implementation per interface
//!
//! The solver walks interfaces depth-first, trying each suitable
//! candidate in preference order. Choosing a candidate appends its
//! selection and the restrictions it contributes, then recurses into
//! the chosen command's runner and the dependencies; if any of those
//! cannot be satisfied the selection and its restrictions are rolled
//! back and the next candidate is tried. The candidate ordering is the
//! only source of preference, so identical inputs yield identical
//! selections.
//!
//! An interface that is reached again while already selected is not
//! re-chosen: the existing selection either fits the new context or the
//! branch fails. This keeps the search finite at the cost of missing
//! solutions that would need an earlier different choice.

use crate::candidates::{Candidate, CandidateEnumerator, CandidateList};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::feed::{Command, Dependency, Implementation, Importance, InterfaceId};
use crate::handler::Handler;
use crate::provider::{FeedProvider, PreferencesStore};
use crate::requirements::{effective_versions, Requirements, Restriction};
use crate::selections::{Selection, Selections};
use crate::store::Store;
use crate::version::Version;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Why one considered candidate was not (or could not stay) selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsideredCandidate {
    pub id: String,
    pub version: Version,
    pub reason: String,
}

/// An interface the solver could not satisfy, with the candidates it
/// looked at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedInterface {
    pub interface: InterfaceId,
    pub considered: Vec<ConsideredCandidate>,
}

/// Structured report of an unsatisfiable solve
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SolveFailure {
    pub interfaces: Vec<BlockedInterface>,
}

impl fmt::Display for SolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no set of implementations satisfies the requirements")?;
        for blocked in &self.interfaces {
            write!(f, "\n  {}:", blocked.interface)?;
            if blocked.considered.is_empty() {
                write!(f, " no candidates")?;
            }
            for candidate in &blocked.considered {
                write!(
                    f,
                    "\n    {} ({}): {}",
                    candidate.id, candidate.version, candidate.reason
                )?;
            }
        }
        Ok(())
    }
}

/// The solver and the capabilities it draws on
pub struct Solver<'a> {
    pub provider: &'a dyn FeedProvider,
    pub prefs: &'a dyn PreferencesStore,
    pub store: &'a dyn Store,
    pub config: &'a Config,
    pub handler: &'a dyn Handler,
}

/// Mutable state of one solve; owned exclusively by that solve
struct SolveState {
    selections: Selections,
    /// Restrictions from already-chosen implementations, in selection
    /// order; truncated on backtrack
    restrictions: Vec<Restriction>,
    /// Enumerations already performed this run
    candidates: BTreeMap<InterfaceId, CandidateList>,
    /// Candidates that already failed this run and are not retried
    failed: BTreeSet<(InterfaceId, String)>,
    /// Interfaces that blocked progress, for the failure report
    blocked: Vec<BlockedInterface>,
}

impl<'a> Solver<'a> {
    /// Find a consistent set of selections for `requirements`.
    ///
    /// On success every version constraint, architecture filter and
    /// inter-interface restriction holds across the result. When no
    /// assignment exists the error is `SolverUnsatisfied` carrying the
    /// blocking interfaces and the candidates considered for each.
    pub fn solve(&self, requirements: &Requirements) -> Result<Selections> {
        let mut state = SolveState {
            selections: Selections::new(
                requirements.interface.clone(),
                requirements.command.clone(),
            ),
            restrictions: requirements.restrictions(),
            candidates: BTreeMap::new(),
            failed: BTreeSet::new(),
            blocked: Vec::new(),
        };

        let solved = self.try_solve(
            &mut state,
            requirements,
            &requirements.interface,
            requirements.command.as_deref(),
        )?;

        if solved {
            debug!("solved {} interfaces", state.selections.len());
            Ok(state.selections)
        } else {
            Err(Error::SolverUnsatisfied(SolveFailure {
                interfaces: state.blocked,
            }))
        }
    }

    fn candidates_for(
        &self,
        state: &mut SolveState,
        requirements: &Requirements,
        interface: &InterfaceId,
    ) -> Result<CandidateList> {
        if let Some(list) = state.candidates.get(interface) {
            return Ok(list.clone());
        }
        let enumerator = CandidateEnumerator {
            provider: self.provider,
            prefs: self.prefs,
            store: self.store,
            config: self.config,
        };
        let list = enumerator.enumerate(requirements, interface)?;
        state.candidates.insert(interface.clone(), list.clone());
        Ok(list)
    }

    fn try_solve(
        &self,
        state: &mut SolveState,
        requirements: &Requirements,
        interface: &InterfaceId,
        command: Option<&str>,
    ) -> Result<bool> {
        self.handler.token().check()?;

        let list = match self.candidates_for(state, requirements, interface) {
            Ok(list) => list,
            Err(Error::FeedUnavailable(feed)) => {
                record_blocked(
                    state,
                    interface,
                    vec![ConsideredCandidate {
                        id: String::new(),
                        version: Version::parse("0").expect("constant"),
                        reason: format!("feed '{}' is unavailable", feed),
                    }],
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        // Split the ordered candidates into the suitable subset and the
        // reasons everything else is out
        let mut suitable = Vec::new();
        let mut considered = Vec::new();
        for candidate in &list.candidates {
            match self.unsuitability(state, candidate, interface, command) {
                None => suitable.push(candidate),
                Some(reason) => considered.push(ConsideredCandidate {
                    id: candidate.implementation.id.clone(),
                    version: candidate.implementation.version.clone(),
                    reason,
                }),
            }
        }

        // Re-entry on an already-decided interface: the existing choice
        // must fit this context; it is never re-selected
        if let Some(existing) = state.selections.find(interface) {
            let existing_id = existing.id.clone();
            let fits = suitable
                .iter()
                .any(|c| c.implementation.id == existing_id);
            if fits {
                if let Some(name) = command {
                    self.ensure_command(state, interface, &existing_id, name, &list);
                }
            } else {
                debug!(
                    "{}: existing selection {} does not fit, giving up branch",
                    interface, existing_id
                );
            }
            return Ok(fits);
        }

        for candidate in suitable {
            let implementation = &candidate.implementation;
            debug!(
                "{}: trying {} ({})",
                interface, implementation.id, implementation.version
            );

            let chosen_command = match command {
                Some(name) => Some(
                    implementation
                        .commands
                        .get(name)
                        .expect("suitability checked the command exists")
                        .clone(),
                ),
                None => None,
            };

            let pre_selections = state.selections.len();
            let pre_restrictions = state.restrictions.len();

            state
                .selections
                .push(make_selection(candidate, interface, &chosen_command))?;
            state
                .restrictions
                .extend(contributed_restrictions(implementation, chosen_command.as_ref()));

            if self.solve_children(state, requirements, implementation, chosen_command.as_ref())? {
                return Ok(true);
            }

            state.selections.truncate(pre_selections);
            state.restrictions.truncate(pre_restrictions);
            state
                .failed
                .insert((interface.clone(), implementation.id.clone()));
            considered.push(ConsideredCandidate {
                id: implementation.id.clone(),
                version: implementation.version.clone(),
                reason: "its dependencies cannot be satisfied".to_string(),
            });
        }

        record_blocked(state, interface, considered);
        Ok(false)
    }

    /// Solve the runner and the dependencies of a fresh selection
    fn solve_children(
        &self,
        state: &mut SolveState,
        requirements: &Requirements,
        implementation: &Implementation,
        chosen_command: Option<&Command>,
    ) -> Result<bool> {
        if let Some(runner) = chosen_command.and_then(|c| c.runner.as_ref()) {
            if !self.try_solve(state, requirements, &runner.interface, Some(&runner.command))? {
                return Ok(false);
            }
        }

        let dependencies = ordered_dependencies(implementation, chosen_command);
        for dependency in dependencies {
            let solved = self.try_solve(state, requirements, &dependency.interface, None)?;
            if !solved && dependency.importance == Importance::Essential {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `None` when the candidate may be selected in the current state,
    /// otherwise the reason it may not
    fn unsuitability(
        &self,
        state: &SolveState,
        candidate: &Candidate,
        interface: &InterfaceId,
        command: Option<&str>,
    ) -> Option<String> {
        if let Some(rejection) = &candidate.rejection {
            return Some(rejection.to_string());
        }
        let implementation = &candidate.implementation;
        if state
            .failed
            .contains(&(interface.clone(), implementation.id.clone()))
        {
            return Some("already failed in this run".to_string());
        }
        if let Some(name) = command {
            if !implementation.commands.contains_key(name) {
                return Some(format!("does not provide command '{}'", name));
            }
        }

        let effective = effective_versions(&state.restrictions, interface);
        if !effective.contains(&implementation.version) {
            return Some(format!(
                "version {} is outside the allowed range {}",
                implementation.version, effective
            ));
        }

        // Forward check: this candidate's own restrictions against what
        // is already selected
        let chosen_command = command.and_then(|name| implementation.commands.get(name));
        for restriction in contributed_restrictions(implementation, chosen_command) {
            if let Some(selected) = state.selections.find(&restriction.interface) {
                if !restriction.range.contains(&selected.version) {
                    return Some(format!(
                        "requires {} but {} is already selected",
                        restriction,
                        selected.version
                    ));
                }
            }
        }
        None
    }

    /// A later context may need a command the original selection did
    /// not record; graft it on so the executor sees it
    fn ensure_command(
        &self,
        state: &mut SolveState,
        interface: &InterfaceId,
        id: &str,
        name: &str,
        list: &CandidateList,
    ) {
        let Some(selection) = state.selections.find_mut(interface) else {
            return;
        };
        if selection.command(name).is_some() {
            return;
        }
        let command = list
            .candidates
            .iter()
            .find(|c| c.implementation.id == id)
            .and_then(|c| c.implementation.commands.get(name));
        if let Some(command) = command {
            selection.commands.push(command.clone());
        }
    }
}

/// The restrictions selecting this implementation adds: its own, those
/// of its dependencies, and those of the chosen command
fn contributed_restrictions(
    implementation: &Implementation,
    chosen_command: Option<&Command>,
) -> Vec<Restriction> {
    let mut out = implementation.restrictions.clone();
    out.extend(
        implementation
            .dependencies
            .iter()
            .filter_map(Dependency::restriction),
    );
    if let Some(command) = chosen_command {
        out.extend(command.restrictions.iter().cloned());
        out.extend(command.dependencies.iter().filter_map(Dependency::restriction));
        if let Some(runner) = &command.runner {
            out.extend(runner.restriction());
        }
    }
    out
}

/// Implementation dependencies then command dependencies, with the
/// restriction-carrying ones moved to the front; the sort is stable so
/// document order breaks ties. (Dependencies do not nest in this data
/// model, so the sub-dependency tier is always empty.)
fn ordered_dependencies(
    implementation: &Implementation,
    chosen_command: Option<&Command>,
) -> Vec<Dependency> {
    let mut dependencies: Vec<Dependency> = implementation.dependencies.clone();
    if let Some(command) = chosen_command {
        dependencies.extend(command.dependencies.iter().cloned());
    }
    dependencies.sort_by_key(|d| u8::from(d.version.is_none()));
    dependencies
}

fn make_selection(
    candidate: &Candidate,
    interface: &InterfaceId,
    chosen_command: &Option<Command>,
) -> Selection {
    let implementation = &candidate.implementation;
    Selection {
        interface: interface.clone(),
        id: implementation.id.clone(),
        version: implementation.version.clone(),
        arch: implementation.arch.clone(),
        stability: implementation.stability,
        from_feed: candidate.from_feed.clone(),
        digest: implementation.digest.clone(),
        local_path: implementation.local_path.clone(),
        bindings: implementation.bindings.clone(),
        dependencies: implementation.dependencies.clone(),
        commands: chosen_command.iter().cloned().collect(),
    }
}

fn record_blocked(
    state: &mut SolveState,
    interface: &InterfaceId,
    considered: Vec<ConsideredCandidate>,
) {
    // Keep only the latest report per interface
    state.blocked.retain(|b| &b.interface != interface);
    state.blocked.push(BlockedInterface {
        interface: interface.clone(),
        considered,
    });
}
