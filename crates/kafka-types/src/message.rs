//! Kafka message types.
//!
//! High-level wrappers for fetched Kafka messages. These types are shared
//! between the consumer core and the applications that embed it, so handlers
//! can be written against them without pulling in the Kafka client.

use std::borrow::Cow;

/// Per-attempt handling metadata attached to a message.
///
/// A fresh `Metadata` is built for every handler attempt; the `attempt`
/// counter starts at 1 for the first call. Messages that have not been
/// handed to a handler yet carry `attempt == 0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Kafka consumer group the message was fetched by
    pub group_id: String,
    /// Identifier of the consumer within the group
    pub consumer_id: String,
    /// Handler attempt number (1-based)
    pub attempt: u32,
}

/// A single Kafka record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

/// A fetched Kafka message with metadata.
///
/// Represents a raw message from a Kafka topic partition, including the
/// Kafka-specific coordinates (topic, partition, offset) needed to commit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: i32,
    /// Kafka offset within the partition
    pub offset: i64,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Message value (if any)
    pub payload: Option<Vec<u8>>,
    /// Message timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
    /// Record headers in broker order
    pub headers: Vec<Header>,
    /// Handling metadata, rebuilt for each attempt
    pub metadata: Metadata,
}

impl Message {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: None,
            timestamp: None,
            headers: Vec::new(),
            metadata: Metadata::default(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(Header {
            key: key.into(),
            value: Some(value.into()),
        });
        self
    }

    /// Return a copy of this message carrying the given metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Look up a header value by name.
    ///
    /// Kafka allows repeated header keys; the last occurrence wins.
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .rev()
            .find(|h| h.key == key)
            .and_then(|h| h.value.as_deref())
    }

    /// Message key as (lossy) UTF-8, empty when the message has no key.
    pub fn key_str(&self) -> Cow<'_, str> {
        match &self.key {
            Some(key) => String::from_utf8_lossy(key),
            None => Cow::Borrowed(""),
        }
    }

    /// Message payload as (lossy) UTF-8, empty when the message has no value.
    pub fn payload_str(&self) -> Cow<'_, str> {
        match &self.payload {
            Some(payload) => String::from_utf8_lossy(payload),
            None => Cow::Borrowed(""),
        }
    }
}
