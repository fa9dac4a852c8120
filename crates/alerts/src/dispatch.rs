//! Best-effort alert fan-out across independent delivery sinks.
//!
//! The dispatcher owns up to two sinks: a pub/sub sink that publishes on the
//! alert topic and a cloud sink that pushes a notification. Each configured
//! sink is attempted on every dispatch; one sink failing never suppresses
//! the other, and no failure escapes to the caller.

use async_trait::async_trait;

use thermwatch_core::AlertMessage;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Per-sink delivery failure. The dispatcher logs these and folds them into
/// the [`DispatchReport`]; they never propagate out of
/// [`AlertDispatcher::dispatch`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Publishing on the alert topic failed.
    #[error("Pub/sub alert delivery failed: {0}")]
    Pubsub(#[from] thermwatch_telemetry::TelemetryError),

    /// The cloud notification service rejected or never received the alert.
    #[error("Cloud alert delivery failed: {0}")]
    Cloud(String),
}

// ---------------------------------------------------------------------------
// Sink seam
// ---------------------------------------------------------------------------

/// One delivery channel for composed alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver a single alert. Implementations make exactly one attempt;
    /// the periodic monitor loop is the retry mechanism.
    async fn deliver(&self, message: &AlertMessage) -> Result<(), DispatchError>;
}

/// Outcome of one dispatch attempt. A flag is `false` both when the sink
/// failed and when it was never configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub pubsub_ok: bool,
    pub cloud_ok: bool,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Fans a composed alert out to the configured sinks.
#[derive(Default)]
pub struct AlertDispatcher {
    pubsub: Option<Box<dyn AlertSink>>,
    cloud: Option<Box<dyn AlertSink>>,
}

impl AlertDispatcher {
    /// A dispatcher with no sinks; dispatching is a no-op until sinks are
    /// attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the pub/sub sink.
    pub fn with_pubsub(mut self, sink: impl AlertSink + 'static) -> Self {
        self.pubsub = Some(Box::new(sink));
        self
    }

    /// Attach the cloud notification sink.
    pub fn with_cloud(mut self, sink: impl AlertSink + 'static) -> Self {
        self.cloud = Some(Box::new(sink));
        self
    }

    /// Attempt every configured sink and report which ones delivered.
    pub async fn dispatch(&self, message: &AlertMessage) -> DispatchReport {
        DispatchReport {
            pubsub_ok: Self::attempt("pubsub", self.pubsub.as_deref(), message).await,
            cloud_ok: Self::attempt("cloud", self.cloud.as_deref(), message).await,
        }
    }

    async fn attempt(
        slot: &'static str,
        sink: Option<&dyn AlertSink>,
        message: &AlertMessage,
    ) -> bool {
        let Some(sink) = sink else {
            return false;
        };

        match sink.deliver(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(sink = slot, error = %e, "Alert delivery failed");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
