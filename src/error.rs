// src/error.rs

//! Crate-wide error type and result alias
//!
//! Every fallible operation in the crate returns [`Result`]. The solver
//! recovers locally from `SolverUnsatisfied` while trying candidates; all
//! other kinds abort the operation that raised them. The store never
//! recovers from a digest mismatch.

use crate::solver::SolveFailure;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Version string does not match the version grammar
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    /// Version range string does not match the range grammar
    #[error("invalid version range '{input}': {reason}")]
    InvalidRange { input: String, reason: String },

    /// Interface IDs must be absolute HTTP(S) URLs or absolute local paths
    #[error("invalid interface id '{0}'")]
    InvalidInterfaceId(String),

    /// The feed provider returned nothing and the network is offline
    #[error("feed '{0}' is unavailable")]
    FeedUnavailable(String),

    /// Feed tree fails validation, e.g. an implementation without a
    /// version even after group attributes are folded in
    #[error("invalid feed: {0}")]
    InvalidFeed(String),

    /// No assignment of implementations satisfies the requirements
    #[error("{0}")]
    SolverUnsatisfied(SolveFailure),

    /// Store integrity violation; the staged data has been deleted
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    /// No algorithm entry of the digest resolves to a stored directory
    #[error("implementation {0} is not in the store")]
    NotStored(String),

    /// Unknown manifest digest algorithm name
    #[error("unknown digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// A directory tree contains something a manifest cannot describe
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Archive entry attempts to escape the extraction root
    #[error("rejected unsafe path '{0}'")]
    PathTraversal(String),

    /// Archive could not be extracted
    #[error("cannot extract archive: {0}")]
    Extract(String),

    /// No writable store accepted the operation
    #[error("store is not writable: {0}")]
    Unauthorized(String),

    /// Cancellation was requested through the handler
    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors the solver treats as "reject this candidate and
    /// move on" rather than aborting the whole solve.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::SolverUnsatisfied(_))
    }
}
