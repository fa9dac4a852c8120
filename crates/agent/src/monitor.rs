//! The periodic sample / publish / classify / alert cycle.
//!
//! One tick samples the probe, publishes the reading as telemetry, appends
//! it to the rolling history, classifies it, and on an overheat verdict
//! composes and dispatches an alert. Every per-tick failure is logged and
//! absorbed; only cancellation stops the loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use thermwatch_alerts::{AlertComposer, AlertDispatcher};
use thermwatch_core::{topics, ClassificationResult, Classifier, History, Reading};
use thermwatch_telemetry::{QoS, TelemetryError, TelemetryPublisher};

use crate::sensor::SensorSource;

// ---------------------------------------------------------------------------
// Publisher seam
// ---------------------------------------------------------------------------

/// Capability seam for telemetry publication. The loop depends on this
/// trait so tests can count and fail publishes without a broker.
#[async_trait]
pub trait ReadingPublisher: Send + Sync {
    async fn publish_reading(&self, reading: &Reading) -> Result<(), TelemetryError>;
}

#[async_trait]
impl ReadingPublisher for Arc<TelemetryPublisher> {
    async fn publish_reading(&self, reading: &Reading) -> Result<(), TelemetryError> {
        self.publish(topics::TOPIC_TELEMETRY, reading, QoS::AtLeastOnce, false)
            .await
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Drives the monitoring cycle until cancelled.
pub struct Monitor<S, P, C> {
    sensor: S,
    publisher: P,
    classifier: Classifier,
    composer: C,
    dispatcher: AlertDispatcher,
    history: History,
    interval: Duration,
}

impl<S, P, C> Monitor<S, P, C>
where
    S: SensorSource,
    P: ReadingPublisher,
    C: AlertComposer,
{
    pub fn new(
        sensor: S,
        publisher: P,
        classifier: Classifier,
        composer: C,
        dispatcher: AlertDispatcher,
        interval: Duration,
    ) -> Self {
        Self {
            sensor,
            publisher,
            classifier,
            composer,
            dispatcher,
            history: History::default(),
            interval,
        }
    }

    /// Recent samples, oldest first.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Run ticks on the configured cadence until `cancel` fires. The first
    /// tick runs immediately.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Monitor loop started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Monitor loop stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.run_tick().await;
                }
            }
        }
    }

    /// One monitoring cycle. Public so tests can step the loop manually.
    pub async fn run_tick(&mut self) {
        let temp_c = match self.sensor.read() {
            Ok(temp_c) => temp_c,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping tick: sensor read failed");
                return;
            }
        };

        let reading = Reading::now(temp_c);
        if let Err(e) = self.publisher.publish_reading(&reading).await {
            tracing::warn!(error = %e, "Telemetry publish failed");
        }

        self.history.push(temp_c);

        match self.classifier.classify(temp_c) {
            ClassificationResult::Normal => {
                tracing::debug!(temp_c, "Reading classified normal");
            }
            ClassificationResult::Overheat => {
                tracing::warn!(temp_c, "Overheat detected");
                self.raise_alert().await;
            }
        }
    }

    async fn raise_alert(&self) {
        let snapshot = self.history.snapshot();

        let message = match self.composer.compose(&snapshot).await {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Alert composition failed, skipping dispatch");
                return;
            }
        };

        let report = self.dispatcher.dispatch(&message).await;
        tracing::info!(
            pubsub_ok = report.pubsub_ok,
            cloud_ok = report.cloud_ok,
            "Overheat alert dispatched"
        );
    }
}
