//! Ordering key functions for batch processing.
//!
//! Messages that share an ordering key are handled one after another in fetch
//! order; messages with different keys are handled concurrently.

use std::sync::Arc;

use kafka_types::Message;

/// Derives the ordering key of a message. Must be deterministic.
pub type OrderingKeyFn = Arc<dyn Fn(&Message) -> String + Send + Sync>;

/// One lane per partition, preserving Kafka's own ordering guarantee. This is the default.
pub fn by_partition() -> OrderingKeyFn {
    Arc::new(|msg: &Message| msg.partition.to_string())
}

/// One lane per message key. Messages without a key share the empty-key lane.
pub fn by_message_key() -> OrderingKeyFn {
    Arc::new(|msg: &Message| msg.key_str().into_owned())
}

/// A single lane: the whole batch is handled sequentially.
pub fn constant(key: impl Into<String>) -> OrderingKeyFn {
    let key = key.into();
    Arc::new(move |_: &Message| key.clone())
}

/// One lane per value of the given header.
pub fn by_header(name: impl Into<String>) -> OrderingKeyFn {
    let name = name.into();
    Arc::new(move |msg: &Message| {
        msg.header(&name)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default()
    })
}
