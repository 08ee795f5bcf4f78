/*
  Protocol contract

  The lifecycle manager never speaks a wire protocol itself. A `Connector`
  opens one connection per attempt and hands back:

    - a `ConnectionHandle` used to request a pairing code and to end the
      connection
    - an mpsc receiver of `ConnectionEvent`s, owned by that attempt only

  Events:
    - Update { state: Connecting | Open | Close, cause }
    - CredentialsUpdated(blob)  -> must be persisted before the next event

  A receiver that closes without a `Close` update counts as a close with no
  cause.
*/

use crate::account::{AccountId, AuthState, CredentialBlob};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Status code the server uses for a session that has been logged out
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Errors reported by the protocol layer
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Failed to open connection: {0}")]
    ConnectFailed(String),

    #[error("Pairing code request failed: {0}")]
    PairingRequest(String),

    #[error("Connection already closed")]
    Closed,
}

/// Transport-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Close => "close",
        };
        f.write_str(name)
    }
}

/// Why the transport closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectCause {
    pub status_code: Option<u16>,
    pub message: String,
}

impl DisconnectCause {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn with_status(status_code: u16) -> Self {
        Self::new(Some(status_code), "server closed the stream")
    }

    pub fn logged_out() -> Self {
        Self::new(Some(LOGGED_OUT_STATUS), "logged out")
    }

    pub fn is_logged_out(&self) -> bool {
        self.status_code == Some(LOGGED_OUT_STATUS)
    }

    /// 5xx-class causes are retried
    pub fn is_transient_server_error(&self) -> bool {
        matches!(self.status_code, Some(500..=599))
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

/// Payload of a connection-update event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUpdate {
    pub state: ConnectionState,
    pub cause: Option<DisconnectCause>,
}

impl ConnectionUpdate {
    pub fn connecting() -> Self {
        Self {
            state: ConnectionState::Connecting,
            cause: None,
        }
    }

    pub fn open() -> Self {
        Self {
            state: ConnectionState::Open,
            cause: None,
        }
    }

    pub fn close(cause: Option<DisconnectCause>) -> Self {
        Self {
            state: ConnectionState::Close,
            cause,
        }
    }
}

/// Events emitted by a live connection
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Update(ConnectionUpdate),
    CredentialsUpdated(CredentialBlob),
}

/// Live handle to one connection
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Ask the server for a code the user types on their device
    async fn request_pairing_code(&self, account: &AccountId) -> Result<String, ProtocolError>;

    /// Terminate the connection. Idempotent.
    async fn end(&self);
}

/// A freshly opened connection and its private event stream
pub struct Connection {
    pub handle: Arc<dyn ConnectionHandle>,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// Factory for connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, auth: AuthState) -> Result<Connection, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logged_out_cause() {
        assert!(DisconnectCause::logged_out().is_logged_out());
        assert!(!DisconnectCause::logged_out().is_transient_server_error());
    }

    #[test]
    fn test_transient_range() {
        for code in [500u16, 503, 515, 599] {
            assert!(DisconnectCause::with_status(code).is_transient_server_error());
        }
        for code in [400u16, 401, 408, 428, 600] {
            assert!(!DisconnectCause::with_status(code).is_transient_server_error());
        }
        assert!(!DisconnectCause::new(None, "eof").is_transient_server_error());
    }

    #[test]
    fn test_cause_display() {
        assert_eq!(
            DisconnectCause::with_status(503).to_string(),
            "server closed the stream (503)"
        );
        assert_eq!(DisconnectCause::new(None, "stream ended").to_string(), "stream ended");
    }
}
