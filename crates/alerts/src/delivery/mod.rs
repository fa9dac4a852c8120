//! Concrete delivery sinks for composed alerts.

pub mod pubsub;
pub mod sns;
