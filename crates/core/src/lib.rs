//! Core domain logic for the thermwatch edge agent.
//!
//! Pure logic: no network, filesystem, or hardware access beyond the
//! one-shot model artifact read at classifier construction. This crate holds:
//!
//! - [`Reading`] and [`AlertMessage`], the wire-facing domain types.
//! - [`History`], the bounded FIFO of recent samples owned by the
//!   monitor loop.
//! - [`Classifier`], threshold or model-backed overheat detection.
//! - [`topics`], the canonical MQTT topic names.

pub mod classifier;
pub mod history;
pub mod topics;
pub mod types;

pub use classifier::{ClassificationResult, Classifier, ModelArtifact, ModelLoadError};
pub use history::{History, DEFAULT_HISTORY_CAPACITY};
pub use types::{AlertMessage, Reading};
