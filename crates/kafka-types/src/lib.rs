//! Kafka message model for ordered-consumer.
//!
//! This crate provides the message types handed to consumer handlers:
//!
//! - [`Message`] - a fetched record with its topic/partition/offset coordinates
//! - [`Metadata`] - per-attempt handling metadata (group, consumer, attempt)
//! - [`Header`] - a record header
//!
//! # Dependency Direction
//!
//! The consumer core (`ordered-consumer-kafka`) depends on this crate, never the
//! other way around, so handlers can be unit tested without a Kafka client.

pub mod message;

pub use message::{Header, Message, Metadata};
