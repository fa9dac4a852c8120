//! MQTT transport for the thermwatch agent.
//!
//! Wraps the rumqttc async client behind [`TelemetryPublisher`]: mutual-TLS
//! session establishment, acknowledgment-confirmed publishing, bounded
//! per-subscription inbound channels, and automatic reconnection with
//! capped exponential backoff.

pub mod publisher;
pub mod reconnect;
pub mod tls;

pub use publisher::{TelemetryError, TelemetryPublisher};
pub use tls::{TlsError, TlsMaterial};

// The QoS levels callers pass to publish/subscribe.
pub use rumqttc::QoS;
