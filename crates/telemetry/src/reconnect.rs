//! Reconnect backoff policy for the broker session.
//!
//! The driver task never gives up on a dropped session: it retries forever,
//! doubling the delay between attempts up to a fixed ceiling and resetting
//! once a session is re-established. Telemetry is periodic and the MQTT
//! session is persistent, so outlasting the outage is all that is required
//! of the policy.

use std::time::Duration;

/// Tunable parameters for the reconnect backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the delay between retries.
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Next backoff delay after a failed attempt, clamped to
/// [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let grown = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(grown).min(config.max_delay)
}
