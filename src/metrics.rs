//! Metric recording helpers.
//!
//! Thin wrappers over the `metrics` macros so call sites stay one line and
//! metric names live in a single file. With no recorder installed these are
//! no-ops.

pub mod counters {
    use metrics::counter;

    /// One negotiation reached a terminal outcome
    /// (secured / declined / passthrough / failed).
    pub fn negotiation_completed(role: &str, outcome: &str) {
        counter!(
            "poolgate_negotiations_total",
            "role" => role.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    /// A control session attempted to authenticate.
    pub fn control_auth_attempted() {
        counter!("poolgate_control_auth_attempts_total").increment(1);
    }

    /// A control session was refused by the listener.
    pub fn control_auth_failed(reason: &str) {
        counter!(
            "poolgate_control_auth_failures_total",
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// One control command finished (ok / error / timeout).
    pub fn control_command_completed(command: &str, outcome: &str) {
        counter!(
            "poolgate_control_commands_total",
            "command" => command.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
}

pub mod histograms {
    use metrics::histogram;

    /// Wall time of a full negotiation including the handshake, in
    /// milliseconds.
    pub fn negotiation_duration(role: &str, millis: u64) {
        histogram!(
            "poolgate_negotiation_duration_ms",
            "role" => role.to_string()
        )
        .record(millis as f64);
    }

    /// Round trip of one control command from send to reply, in
    /// milliseconds.
    pub fn control_round_trip_duration(command: &str, millis: u64) {
        histogram!(
            "poolgate_control_round_trip_ms",
            "command" => command.to_string()
        )
        .record(millis as f64);
    }
}
