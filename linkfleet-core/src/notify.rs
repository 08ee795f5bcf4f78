//! Operator-facing status messages
//!
//! An interactive connect posts one status message and then edits it in
//! place as the lifecycle advances. Delivery problems never affect the
//! connection attempt: they are logged and dropped.

use crate::account::AccountId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Failed to deliver status message: {0}")]
    Delivery(String),

    #[error("Status message no longer editable: {0}")]
    NotEditable(String),
}

/// Opaque reference to a message created by a notifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageRef(pub String);

/// A channel that can create a message and edit it later
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn post(&self, text: &str) -> Result<MessageRef, NotifyError>;

    async fn edit(&self, message: &MessageRef, text: &str) -> Result<(), NotifyError>;
}

/// Lifecycle milestones surfaced to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Pairing,
    PairingCode(String),
    PairingError(String),
    Reconnecting { attempt: u32, delay: Duration },
    Connected,
    Failed(String),
}

impl Status {
    /// Human-readable text for one account
    pub fn render(&self, account: &AccountId) -> String {
        match self {
            Status::Pairing => format!("Pairing with {}...", account),
            Status::PairingCode(code) => {
                status_block(account, "PAIRING", &[format!("Code    : {}", code)])
            }
            Status::PairingError(reason) => {
                status_block(account, "PAIRING ERROR", &[format!("Reason  : {}", reason)])
            }
            Status::Reconnecting { attempt, delay } => status_block(
                account,
                "RECONNECTING",
                &[format!(
                    "Attempt : {} (in {})",
                    attempt,
                    humantime_serde::re::humantime::format_duration(*delay)
                )],
            ),
            Status::Connected => status_block(account, "CONNECTED", &[]),
            Status::Failed(reason) => {
                status_block(account, "FAILED", &[format!("Reason  : {}", reason)])
            }
        }
    }
}

fn status_block(account: &AccountId, label: &str, extra: &[String]) -> String {
    let mut text = format!("STATUS  : {}\nAccount : {}", label, account);
    for line in extra {
        text.push('\n');
        text.push_str(line);
    }
    text
}

/// Status message bound to one connection attempt
pub struct StatusReporter {
    account: AccountId,
    notifier: Option<Arc<dyn StatusNotifier>>,
    message: Option<MessageRef>,
}

impl StatusReporter {
    /// Without a notifier every update is dropped (bulk resume)
    pub fn new(account: AccountId, notifier: Option<Arc<dyn StatusNotifier>>) -> Self {
        Self {
            account,
            notifier,
            message: None,
        }
    }

    /// Publish a status, editing the existing message when there is one
    pub async fn report(&mut self, status: Status) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let text = status.render(&self.account);

        match &self.message {
            Some(message) => {
                if let Err(e) = notifier.edit(message, &text).await {
                    warn!(account = %self.account, error = %e, "failed to edit status message");
                }
            }
            None => match notifier.post(&text).await {
                Ok(message) => self.message = Some(message),
                Err(e) => {
                    warn!(account = %self.account, error = %e, "failed to post status message")
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingNotifier;

    fn account() -> AccountId {
        AccountId::new("628123").unwrap()
    }

    #[test]
    fn test_render_pairing_code() {
        let text = Status::PairingCode("ABCD-EFGH".to_string()).render(&account());
        assert!(text.contains("PAIRING"));
        assert!(text.contains("628123"));
        assert!(text.contains("ABCD-EFGH"));
    }

    #[test]
    fn test_render_reconnecting() {
        let text = Status::Reconnecting {
            attempt: 2,
            delay: Duration::from_secs(4),
        }
        .render(&account());
        assert!(text.contains("Attempt : 2 (in 4s)"));
    }

    #[tokio::test]
    async fn test_reporter_posts_once_then_edits() {
        let notifier = Arc::new(RecordingNotifier::new());
        let mut reporter = StatusReporter::new(account(), Some(notifier.clone()));

        reporter.report(Status::Pairing).await;
        reporter.report(Status::Connected).await;

        assert_eq!(notifier.posts().len(), 1);
        assert_eq!(notifier.edits().len(), 1);
        assert!(notifier.latest().unwrap().contains("CONNECTED"));
    }

    #[tokio::test]
    async fn test_reporter_tolerates_edit_failures() {
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.fail_edits(true);
        let mut reporter = StatusReporter::new(account(), Some(notifier.clone()));

        reporter.report(Status::Pairing).await;
        reporter.report(Status::Connected).await;
        reporter.report(Status::Failed("gone".to_string())).await;

        assert_eq!(notifier.posts().len(), 1);
        assert!(notifier.edits().is_empty());
    }

    #[tokio::test]
    async fn test_reporter_retries_post_after_failure() {
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.fail_posts(true);
        let mut reporter = StatusReporter::new(account(), Some(notifier.clone()));
        reporter.report(Status::Pairing).await;
        assert!(notifier.posts().is_empty());

        notifier.fail_posts(false);
        reporter.report(Status::Connected).await;
        assert_eq!(notifier.posts().len(), 1);
    }
}
