// src/handler.rs

//! Caller-injected capability for cancellation and task observation
//!
//! The solver only polls the token; the store additionally routes its
//! long-running units of work (extraction, manifest computation) through
//! `run_task` so a caller can surface progress however it likes.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap cloneable cancellation flag
///
/// Checked at the entry of each solver recursion and before each store
/// task. Cancelling is a one-way transition.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Capability handed to operations that may block or take long
pub trait Handler: Send + Sync {
    fn token(&self) -> &CancelToken;

    /// Run a named unit of work. Implementations may wrap this with
    /// progress reporting; the default just honours cancellation.
    fn run_task(&self, name: &str, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let _ = name;
        self.token().check()?;
        work()
    }
}

/// No-op handler for tests and non-interactive callers
#[derive(Debug, Default)]
pub struct SilentHandler {
    token: CancelToken,
}

impl SilentHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler sharing the given token, so callers can cancel from
    /// another thread.
    pub fn with_token(token: CancelToken) -> Self {
        SilentHandler { token }
    }
}

impl Handler for SilentHandler {
    fn token(&self) -> &CancelToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_cancel_is_sticky_and_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_run_task_honours_cancellation() {
        let handler = SilentHandler::new();
        let mut ran = false;
        handler
            .run_task("work", &mut || {
                ran = true;
                Ok(())
            })
            .unwrap();
        assert!(ran);

        handler.token().cancel();
        let result = handler.run_task("more", &mut || Ok(()));
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
