/*
    Metrics - session lifecycle counters and gauges

    Recorded through the `metrics` facade; whichever recorder the host
    process installs receives them. Nothing is exported by this crate.
*/

use metrics::{counter, describe_counter, describe_gauge};

pub const CONNECT_ATTEMPTS: &str = "linkfleet_connect_attempts_total";
pub const RECONNECTS: &str = "linkfleet_reconnects_total";
pub const SESSIONS_OPENED: &str = "linkfleet_sessions_opened_total";
pub const SESSIONS_FAILED: &str = "linkfleet_sessions_failed_total";
pub const PAIRING_CODES: &str = "linkfleet_pairing_codes_requested_total";
pub const OPEN_SESSIONS: &str = "linkfleet_open_sessions";

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    describe_counter!(
        CONNECT_ATTEMPTS,
        "Total number of connections opened towards the protocol layer, including reconnects"
    );

    describe_counter!(
        RECONNECTS,
        "Total number of automatic reconnects scheduled after a close event"
    );

    describe_counter!(
        SESSIONS_OPENED,
        "Total number of open transitions across all accounts"
    );

    describe_counter!(
        SESSIONS_FAILED,
        "Total number of lifecycles that ended in a terminal failure, labeled by reason (logged_out, pairing_failed, retries_exhausted, timed_out)"
    );

    describe_counter!(
        PAIRING_CODES,
        "Total number of pairing codes requested for accounts without stored credentials"
    );

    describe_gauge!(
        OPEN_SESSIONS,
        "Current number of registered connection handles"
    );
}

pub(crate) fn record_failure(reason: &'static str) {
    counter!(SESSIONS_FAILED, "reason" => reason).increment(1);
}
