//! Error types for lifecycle operations

use super::machine::Outcome;
use crate::account::AccountId;
use crate::session_store::StoreError;
use thiserror::Error;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A lifecycle task for this account is still running
    #[error("A connection attempt for {0} is already in progress")]
    AttemptInProgress(AccountId),

    /// Neither registered nor in flight
    #[error("No session found for {0}")]
    NotFound(AccountId),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// Terminal: the server logged the session out; credentials were purged
    #[error("Connection closed: logged out")]
    LoggedOut,

    /// Terminal: closed before ever authenticating; credentials were purged
    #[error("Connection closed before pairing completed: {reason}")]
    PairingFailed { reason: String },

    #[error("Connection closed; gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Timed out waiting for the connection to open")]
    TimedOut,

    #[error("Session attempt cancelled")]
    Cancelled,
}

impl LifecycleError {
    /// Whether the account's credentials were removed as part of this failure
    pub fn purged_credentials(&self) -> bool {
        matches!(self, LifecycleError::LoggedOut | LifecycleError::PairingFailed { .. })
    }
}

impl From<Outcome> for LifecycleError {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::LoggedOut => LifecycleError::LoggedOut,
            Outcome::PairingFailed(reason) => LifecycleError::PairingFailed { reason },
            Outcome::RetriesExhausted(attempts) => LifecycleError::RetriesExhausted { attempts },
            Outcome::TimedOut => LifecycleError::TimedOut,
        }
    }
}
