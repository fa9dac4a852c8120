//! Pub/sub alert sink.
//!
//! Publishes composed alerts on the alert topic of the shared broker
//! session, as `{"alert": <text>, "timestamp": <epoch seconds>}`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use thermwatch_core::{topics, AlertMessage};
use thermwatch_telemetry::{QoS, TelemetryPublisher};

use crate::dispatch::{AlertSink, DispatchError};

/// Wire form of an alert on [`topics::TOPIC_ALERTS`]. Field order is part
/// of the payload contract.
#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    alert: &'a str,
    timestamp: i64,
}

/// Sink that rides the telemetry publisher's broker session.
pub struct PubSubSink {
    publisher: Arc<TelemetryPublisher>,
}

impl PubSubSink {
    pub fn new(publisher: Arc<TelemetryPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl AlertSink for PubSubSink {
    async fn deliver(&self, message: &AlertMessage) -> Result<(), DispatchError> {
        let payload = AlertPayload {
            alert: &message.text,
            timestamp: message.timestamp,
        };

        self.publisher
            .publish(topics::TOPIC_ALERTS, &payload, QoS::AtLeastOnce, false)
            .await?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
