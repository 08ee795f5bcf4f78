//! Multi-account session lifecycle management for a linked-device
//! messaging protocol.
//!
//! Each account gets its own connection task. Credentials persist under a
//! per-account directory; accounts that reached `open` are remembered in an
//! active list and resumed on the next start.

pub mod account;
pub mod bulk;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod session_store;
pub mod shutdown;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use account::{AccountId, AuthState, CredentialBlob};
pub use bulk::{BulkInitializer, ResumeReport};
pub use config::Config;
pub use lifecycle::{AttemptTicket, LifecycleError, LifecycleManager, RetryPolicy};
pub use logging::{init_logging, LogLevel};
pub use registry::HandleRegistry;
pub use session_store::SessionStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = RetryPolicy::default();
        assert!(AccountId::new("111").is_ok());
    }
}
