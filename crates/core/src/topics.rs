//! Canonical MQTT topic names.
//!
//! These are the topics the agent publishes on and that downstream
//! consumers subscribe to. Payload shapes are documented on the types in
//! [`crate::types`] and on the alert sink that produces them.

/// Topic carrying periodic temperature readings.
pub const TOPIC_TELEMETRY: &str = "sensors/temperature";

/// Topic carrying composed overheat alerts.
pub const TOPIC_ALERTS: &str = "alerts/overheat";
