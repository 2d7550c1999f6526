//! Kafka consumer library that handles messages with retries and commits
//! offsets only after the handler succeeded (at-least-once).
//!
//! Features:
//!
//! - Retries: Per-message retry with pluggable backoff, including a non-stop schedule for
//!   consumers that must never skip a message
//! - Batch Processing: Fetch up to N messages per round, handle them concurrently across
//!   ordering keys and strictly in order within a key, then commit the round at once
//! - Consumer Groups: Run multiple consumers in the same consumer group and collect their
//!   errors on one channel
//! - Trace Propagation: Continue the producer's W3C trace context around each handler call

pub mod backoff;

/// One fetch-handle-commit round with per-key ordered lanes
pub mod batch;
pub mod config;

/// Consumer owning one reader, in single-message or batch mode
///
/// Created by the group, or directly when only one consumer is needed.
pub mod consumer;
pub mod error;
pub mod executor;

/// High-level API for running several consumers in one consumer group
pub mod group;
pub mod options;
pub mod ordering;

/// Source of messages and sink of commits
///
/// `KafkaReader` talks to a broker; tests inject their own through `ConsumerOptions`.
pub mod reader;
mod trace;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

// Re-export main types for easy access
pub use batch::{BatchProcessor, RoundOutcome};
pub use config::{ConsumerConfig, GroupBalancer};
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use executor::HandlerExecutor;
pub use group::Group;
pub use kafka_types::{Header, Message, Metadata};
pub use options::{handler_fn, Batching, ConsumerOptions, Handler, NotifyError};
pub use reader::{KafkaReader, Reader, ReaderFactory};
