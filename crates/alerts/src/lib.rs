//! Alert composition and fan-out for the thermwatch agent.
//!
//! - [`composer`] turns a temperature history into a short human-readable
//!   overheat warning via an external text-generation service.
//! - [`dispatch`] fans a composed alert out across the configured delivery
//!   sinks, best-effort and independently per sink.
//! - [`delivery`] holds the concrete sinks (broker topic, cloud
//!   notification service).

pub mod composer;
pub mod delivery;
pub mod dispatch;

pub use composer::{AlertComposer, CompositionError, OpenAiComposer};
pub use delivery::pubsub::PubSubSink;
pub use delivery::sns::SnsSink;
pub use dispatch::{AlertDispatcher, AlertSink, DispatchError, DispatchReport};
