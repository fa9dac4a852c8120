//! Wire-facing domain types shared across the telemetry pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A single temperature sample, as published on the telemetry topic.
///
/// Field declaration order is the canonical wire order: the serialized form
/// is `{"timestamp": <epoch seconds>, "temp_c": <celsius>}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Seconds since the Unix epoch at sampling time.
    pub timestamp: i64,
    /// Sampled temperature in degrees Celsius.
    pub temp_c: f64,
}

impl Reading {
    /// Build a reading stamped with the current wall-clock time.
    pub fn now(temp_c: f64) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            temp_c,
        }
    }
}

/// A composed, human-readable overheat alert.
///
/// Produced once per overheating tick by the alert composer and consumed
/// once by the dispatcher; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    /// Alert body produced by the composer.
    pub text: String,
    /// Seconds since the Unix epoch at composition time.
    pub timestamp: i64,
}

impl AlertMessage {
    /// Build an alert stamped with the current wall-clock time.
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
