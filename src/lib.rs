// src/lib.rs

//! Zero Install core: feed solver and implementation store
//!
//! Decentralized package management built on two pieces:
//!
//! - A backtracking **solver** that, given a root interface and
//!   requirements, picks one concrete implementation per interface so
//!   that every version bound, architecture filter and inter-interface
//!   restriction holds, producing an ordered [`Selections`] document.
//! - A content-addressed **store** of extracted implementation
//!   directories keyed by manifest digest, with atomic publication,
//!   integrity verification and safe concurrent writers.
//!
//! Feed retrieval, signature checking, XML parsing and process launch
//! live behind capability traits ([`FeedProvider`], [`PreferencesStore`],
//! [`Handler`]); the core never talks to the network itself.

pub mod arch;
pub mod candidates;
pub mod config;
mod error;
pub mod feed;
pub mod handler;
pub mod manifest;
pub mod provider;
pub mod requirements;
pub mod selections;
pub mod solver;
pub mod store;
pub mod version;

pub use arch::{Architecture, Cpu, Os};
pub use candidates::{Candidate, CandidateEnumerator, CandidateList, Rejection};
pub use config::{Config, NetworkUse};
pub use error::{Error, Result};
pub use feed::{
    Binding, Command, Dependency, Element, EnvMode, Feed, Group, Implementation,
    ImplementationElement, Importance, InterfaceId, RetrievalMethod, Runner, Stability,
};
pub use handler::{CancelToken, Handler, SilentHandler};
pub use manifest::{Algorithm, Manifest, ManifestDigest};
pub use provider::{
    FeedPreferences, FeedProvider, InterfacePreferences, MemoryPreferences, PreferencesStore,
    StaticFeedProvider,
};
pub use requirements::{Requirements, Restriction};
pub use selections::{Selection, Selections};
pub use solver::{SolveFailure, Solver};
pub use store::{ArchiveSource, CompositeStore, DirectoryStore, Store};
pub use version::{Constraint, Version, VersionRange};
