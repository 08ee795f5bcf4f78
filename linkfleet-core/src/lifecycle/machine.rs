//! Per-account connection state machine
//!
//! Pure transition logic: the driver feeds [`Input`]s and executes the
//! returned [`Action`]s in order. No I/O happens here, which keeps every
//! branch of the close handling unit-testable.
//!
//! ```text
//!            Start                 open
//!   Idle ───────────► Connecting ───────► Open
//!                      ▲    │  │            │
//!          ReconnectDue│    │  │ close      │ close (retryable)
//!                      │    │  ▼            ▼
//!                   Backoff ◄──────────── Backoff
//!                           │
//!         logged out /      │ Timeout
//!         pairing failed /  ▼
//!         retries exhausted Closed(Outcome)
//! ```

use super::retry::RetryPolicy;
use crate::notify::Status;
use crate::protocol::{ConnectionState, ConnectionUpdate, DisconnectCause};
use std::time::Duration;

/// Why a lifecycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    LoggedOut,
    PairingFailed(String),
    RetriesExhausted(u32),
    TimedOut,
}

impl Outcome {
    /// Metric label
    pub fn reason(&self) -> &'static str {
        match self {
            Outcome::LoggedOut => "logged_out",
            Outcome::PairingFailed(_) => "pairing_failed",
            Outcome::RetriesExhausted(_) => "retries_exhausted",
            Outcome::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Open,
    Backoff,
    Closed(Outcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Start,
    Transport(ConnectionUpdate),
    Timeout,
    ReconnectDue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Wait the probe delay, then request a pairing code if no credentials exist
    ProbePairing,
    Register,
    Unregister,
    MarkActive,
    /// Delete credentials and drop the account from the active list
    Purge,
    EndConnection,
    Notify(Status),
    ScheduleReconnect { attempt: u32, delay: Duration },
    /// First open: release whoever waits on the attempt
    ResolveOpened,
    Finish(Outcome),
}

/// Connection lifecycle for one account.
///
/// A close before the first open normally ends the lifecycle as a failed
/// pairing and purges the session. When credentials already existed at
/// start (`known_session`) such a close is retried instead, for resumes and
/// interactive connects alike; only a logged-out close purges then.
#[derive(Debug, Clone)]
pub struct Machine {
    phase: Phase,
    policy: RetryPolicy,
    /// Credentials existed before this lifecycle started
    known_session: bool,
    ever_opened: bool,
    attempt: u32,
}

impl Machine {
    pub fn new(policy: RetryPolicy, known_session: bool) -> Self {
        Self {
            phase: Phase::Idle,
            policy,
            known_session,
            ever_opened: false,
            attempt: 0,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn ever_opened(&self) -> bool {
        self.ever_opened
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == Phase::Connecting
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed(_))
    }

    pub fn step(&mut self, input: Input) -> Vec<Action> {
        if self.is_closed() {
            return Vec::new();
        }

        match (&self.phase, input) {
            (Phase::Idle, Input::Start) => {
                self.phase = Phase::Connecting;
                vec![Action::Notify(Status::Pairing)]
            }
            (Phase::Backoff, Input::ReconnectDue) => {
                self.phase = Phase::Connecting;
                Vec::new()
            }
            (Phase::Connecting, Input::Transport(update)) => match update.state {
                ConnectionState::Connecting => vec![Action::ProbePairing],
                ConnectionState::Open => self.on_open(),
                ConnectionState::Close => self.on_close(update.cause),
            },
            (Phase::Open, Input::Transport(update)) => match update.state {
                ConnectionState::Close => self.on_close(update.cause),
                // Duplicate open or protocol-internal reconnect: nothing to do.
                ConnectionState::Open | ConnectionState::Connecting => Vec::new(),
            },
            (Phase::Connecting, Input::Timeout) => self.finish(
                Outcome::TimedOut,
                vec![Action::Unregister, Action::EndConnection],
                "timed out waiting for the connection to open".to_string(),
            ),
            _ => Vec::new(),
        }
    }

    fn on_open(&mut self) -> Vec<Action> {
        let first_open = !self.ever_opened;
        self.phase = Phase::Open;
        self.ever_opened = true;
        self.attempt = 0;

        let mut actions = vec![
            Action::Register,
            Action::MarkActive,
            Action::Notify(Status::Connected),
        ];
        if first_open {
            actions.push(Action::ResolveOpened);
        }
        actions
    }

    fn on_close(&mut self, cause: Option<DisconnectCause>) -> Vec<Action> {
        let cause = cause.unwrap_or_else(|| DisconnectCause::new(None, "connection closed"));

        if cause.is_logged_out() {
            return self.finish(
                Outcome::LoggedOut,
                vec![Action::Unregister, Action::EndConnection, Action::Purge],
                "logged out".to_string(),
            );
        }

        let retryable = cause.is_transient_server_error() || self.ever_opened || self.known_session;
        if !retryable {
            let reason = cause.to_string();
            return self.finish(
                Outcome::PairingFailed(reason.clone()),
                vec![Action::Unregister, Action::EndConnection, Action::Purge],
                reason,
            );
        }

        let next = self.attempt + 1;
        if !self.policy.allows(next) {
            let attempts = self.attempt;
            return self.finish(
                Outcome::RetriesExhausted(attempts),
                vec![Action::Unregister, Action::EndConnection],
                format!("{} (gave up after {} reconnects)", cause, attempts),
            );
        }

        self.attempt = next;
        self.phase = Phase::Backoff;
        let delay = self.policy.delay_for(next);
        vec![
            Action::Unregister,
            Action::EndConnection,
            Action::Notify(Status::Reconnecting {
                attempt: next,
                delay,
            }),
            Action::ScheduleReconnect {
                attempt: next,
                delay,
            },
        ]
    }

    fn finish(
        &mut self,
        outcome: Outcome,
        mut actions: Vec<Action>,
        message: String,
    ) -> Vec<Action> {
        self.phase = Phase::Closed(outcome.clone());
        actions.push(Action::Notify(Status::Failed(message)));
        actions.push(Action::Finish(outcome));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }

    fn started(known_session: bool) -> Machine {
        let mut machine = Machine::new(policy(3), known_session);
        assert_eq!(machine.step(Input::Start), vec![Action::Notify(Status::Pairing)]);
        machine
    }

    fn close(code: Option<u16>) -> Input {
        Input::Transport(ConnectionUpdate::close(
            code.map(DisconnectCause::with_status),
        ))
    }

    fn has_purge(actions: &[Action]) -> bool {
        actions.contains(&Action::Purge)
    }

    #[test]
    fn test_connecting_update_probes_pairing() {
        let mut machine = started(false);
        let actions = machine.step(Input::Transport(ConnectionUpdate::connecting()));
        assert_eq!(actions, vec![Action::ProbePairing]);
        assert!(machine.is_connecting());
    }

    #[test]
    fn test_open_registers_and_resolves_once() {
        let mut machine = started(false);
        let actions = machine.step(Input::Transport(ConnectionUpdate::open()));
        assert_eq!(
            actions,
            vec![
                Action::Register,
                Action::MarkActive,
                Action::Notify(Status::Connected),
                Action::ResolveOpened,
            ]
        );
        assert_eq!(machine.phase(), &Phase::Open);

        // Duplicate open is ignored
        assert!(machine.step(Input::Transport(ConnectionUpdate::open())).is_empty());
    }

    #[test]
    fn test_logged_out_before_open_purges() {
        let mut machine = started(false);
        let actions = machine.step(Input::Transport(ConnectionUpdate::close(Some(
            DisconnectCause::logged_out(),
        ))));
        assert!(has_purge(&actions));
        assert_eq!(actions.last(), Some(&Action::Finish(Outcome::LoggedOut)));
        assert_eq!(machine.phase(), &Phase::Closed(Outcome::LoggedOut));
    }

    #[test]
    fn test_logged_out_is_terminal_for_known_session() {
        let mut machine = started(true);
        let actions = machine.step(Input::Transport(ConnectionUpdate::close(Some(
            DisconnectCause::logged_out(),
        ))));
        assert!(has_purge(&actions));
        assert!(machine.is_closed());
    }

    #[test]
    fn test_transient_close_schedules_reconnect() {
        let mut machine = started(false);
        let actions = machine.step(close(Some(503)));
        assert!(!has_purge(&actions));
        assert_eq!(
            actions.last(),
            Some(&Action::ScheduleReconnect {
                attempt: 1,
                delay: Duration::from_secs(1)
            })
        );
        assert_eq!(machine.phase(), &Phase::Backoff);

        assert!(machine.step(Input::ReconnectDue).is_empty());
        assert!(machine.is_connecting());
    }

    #[test]
    fn test_unknown_close_before_open_fails_pairing() {
        let mut machine = started(false);
        let actions = machine.step(close(Some(428)));
        assert!(has_purge(&actions));
        assert!(matches!(
            actions.last(),
            Some(Action::Finish(Outcome::PairingFailed(_)))
        ));
    }

    #[test]
    fn test_close_without_cause_before_open_fails_pairing() {
        let mut machine = started(false);
        let actions = machine.step(close(None));
        assert!(has_purge(&actions));
        assert!(machine.is_closed());
    }

    #[test]
    fn test_unknown_close_for_known_session_retries() {
        let mut machine = started(true);
        let actions = machine.step(close(Some(428)));
        assert!(!has_purge(&actions));
        assert_eq!(machine.phase(), &Phase::Backoff);
    }

    #[test]
    fn test_close_after_open_retries_without_purge() {
        let mut machine = started(false);
        machine.step(Input::Transport(ConnectionUpdate::open()));

        let actions = machine.step(close(Some(408)));
        assert!(!has_purge(&actions));
        assert_eq!(actions[0], Action::Unregister);
        assert_eq!(machine.phase(), &Phase::Backoff);
    }

    #[test]
    fn test_reopen_does_not_resolve_again() {
        let mut machine = started(false);
        machine.step(Input::Transport(ConnectionUpdate::open()));
        machine.step(close(Some(500)));
        machine.step(Input::ReconnectDue);

        let actions = machine.step(Input::Transport(ConnectionUpdate::open()));
        assert!(!actions.contains(&Action::ResolveOpened));
        assert!(actions.contains(&Action::Register));
    }

    #[test]
    fn test_retries_exhausted() {
        let mut machine = started(false);
        for attempt in 1..=3 {
            let actions = machine.step(close(Some(503)));
            assert!(matches!(
                actions.last(),
                Some(Action::ScheduleReconnect { attempt: a, .. }) if *a == attempt
            ));
            machine.step(Input::ReconnectDue);
        }

        let actions = machine.step(close(Some(503)));
        assert_eq!(
            actions.last(),
            Some(&Action::Finish(Outcome::RetriesExhausted(3)))
        );
        assert!(!has_purge(&actions));
    }

    #[test]
    fn test_open_resets_attempt_counter() {
        let mut machine = started(false);
        machine.step(close(Some(503)));
        machine.step(Input::ReconnectDue);
        machine.step(close(Some(503)));
        machine.step(Input::ReconnectDue);
        machine.step(Input::Transport(ConnectionUpdate::open()));

        let actions = machine.step(close(Some(503)));
        assert!(actions.contains(&Action::ScheduleReconnect {
            attempt: 1,
            delay: Duration::from_secs(1)
        }));
    }

    #[test]
    fn test_disabled_policy_gives_up_immediately() {
        let mut machine = Machine::new(RetryPolicy::disabled(), false);
        machine.step(Input::Start);
        let actions = machine.step(close(Some(503)));
        assert_eq!(
            actions.last(),
            Some(&Action::Finish(Outcome::RetriesExhausted(0)))
        );
    }

    #[test]
    fn test_timeout_only_while_connecting() {
        let mut machine = started(false);
        machine.step(Input::Transport(ConnectionUpdate::open()));
        assert!(machine.step(Input::Timeout).is_empty());

        let mut machine = started(false);
        let actions = machine.step(Input::Timeout);
        assert!(!has_purge(&actions));
        assert!(actions.contains(&Action::EndConnection));
        assert_eq!(machine.phase(), &Phase::Closed(Outcome::TimedOut));
    }

    #[test]
    fn test_closed_ignores_everything() {
        let mut machine = started(false);
        machine.step(Input::Timeout);
        assert!(machine.step(Input::Transport(ConnectionUpdate::open())).is_empty());
        assert!(machine.step(close(Some(503))).is_empty());
        assert!(machine.step(Input::ReconnectDue).is_empty());
    }

    #[test]
    fn test_stale_updates_during_backoff_are_ignored() {
        let mut machine = started(false);
        machine.step(close(Some(503)));
        assert!(machine.step(Input::Transport(ConnectionUpdate::open())).is_empty());
        assert_eq!(machine.phase(), &Phase::Backoff);
    }
}
