//! Cooperative cancellation.
//!
//! This module provides:
//! - CancellationToken, the atomic flag shared by a running flow and its handles
//! - ShutdownHandle, the cloneable caller-side view of that flag

mod token;

pub use token::CancellationToken;

use std::sync::Arc;

/// Cloneable handle that requests shutdown of one flow run.
///
/// May be used from any thread; never blocks.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: Arc<CancellationToken>,
}

impl ShutdownHandle {
    pub(crate) fn new(token: Arc<CancellationToken>) -> Self {
        Self { token }
    }

    /// Requests shutdown. Idempotent; a no-op once the run has ended.
    pub fn shutdown(&self) {
        self.token.cancel("shutdown requested");
    }

    /// Requests shutdown with a custom reason.
    pub fn shutdown_with_reason(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_share_flag() {
        let token = Arc::new(CancellationToken::new());
        let a = ShutdownHandle::new(Arc::clone(&token));
        let b = a.clone();

        a.shutdown();
        b.shutdown_with_reason("ignored");

        assert!(b.is_shutdown_requested());
        assert_eq!(token.reason(), Some("shutdown requested".to_string()));
    }

    #[test]
    fn test_shutdown_from_other_thread() {
        let token = Arc::new(CancellationToken::new());
        let handle = ShutdownHandle::new(Arc::clone(&token));

        std::thread::spawn(move || handle.shutdown()).join().unwrap();
        assert!(token.is_cancelled());
    }
}
