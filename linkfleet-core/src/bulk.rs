//! Startup resume of every account on the active list

use crate::account::AccountId;
use crate::lifecycle::{LifecycleError, LifecycleManager};
use tracing::{error, info, warn};

/// Result of one resume batch
#[derive(Debug, Default)]
pub struct ResumeReport {
    pub opened: Vec<AccountId>,
    pub failed: Vec<(AccountId, LifecycleError)>,
}

impl ResumeReport {
    pub fn total(&self) -> usize {
        self.opened.len() + self.failed.len()
    }

    pub fn all_opened(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Resumes the active list, one account at a time
pub struct BulkInitializer<'a> {
    manager: &'a LifecycleManager,
}

impl<'a> BulkInitializer<'a> {
    pub fn new(manager: &'a LifecycleManager) -> Self {
        Self { manager }
    }

    /// Each account is awaited until open or terminal failure before the
    /// next one starts. Failures are collected, never returned.
    pub async fn run(&self) -> ResumeReport {
        let mut report = ResumeReport::default();

        let accounts = match self.manager.store().load_active().await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(error = %e, "failed to read active list, nothing to resume");
                return report;
            }
        };

        info!(count = accounts.len(), "found active sessions, resuming");

        for account in accounts {
            match self.manager.resume(account.clone()).await {
                Ok(()) => {
                    info!(account = %account, "session resumed");
                    report.opened.push(account);
                }
                Err(e) => {
                    warn!(account = %account, error = %e, "failed to resume session");
                    report.failed.push((account, e));
                }
            }
        }

        info!(
            opened = report.opened.len(),
            failed = report.failed.len(),
            "resume batch finished"
        );
        report
    }
}
