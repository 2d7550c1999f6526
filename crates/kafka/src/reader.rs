use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kafka_types::{Header, Message};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as RdkafkaConsumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers as _, Message as RdkafkaMessage};
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ConsumerConfig;
use crate::error::{Error, Result};

/// Fetch/commit access to one topic partition assignment.
///
/// Offsets are never committed automatically unless the reader was built to
/// do so; the consumer commits them after the handlers succeed.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Wait for the next message.
    ///
    /// Returns [`Error::EndOfStream`] once the reader is closed, including
    /// for a fetch that is in flight when [`Reader::close`] is called.
    async fn fetch_message(&self) -> Result<Message>;

    /// Commit the offsets of the given messages. Committing nothing is a no-op.
    async fn commit_messages(&self, messages: &[Message]) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds the reader for a consumer. Primarily a test seam.
pub type ReaderFactory = Arc<dyn Fn(&ConsumerConfig) -> Result<Arc<dyn Reader>> + Send + Sync>;

/// [`Reader`] backed by an rdkafka `StreamConsumer` subscribed to one topic
pub struct KafkaReader {
    consumer: StreamConsumer,
    closed: CancellationToken,
}

impl KafkaReader {
    /// Create a reader subscribed to `config.topic`
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        config.validate()?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("client.id", &config.consumer_id)
            .set("enable.auto.commit", config.enable_auto_commit.to_string())
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", &config.session_timeout_ms)
            .set("partition.assignment.strategy", config.assignment_strategy())
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| Error::Reader(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| Error::Reader(format!("Failed to subscribe to topic: {e}")))?;

        debug!(
            "Reader {} subscribed to topic {} in group {}",
            config.consumer_id, config.topic, config.group_id
        );

        Ok(Self {
            consumer,
            closed: CancellationToken::new(),
        })
    }

    /// Build the default reader factory
    pub fn factory() -> ReaderFactory {
        Arc::new(|config: &ConsumerConfig| -> Result<Arc<dyn Reader>> {
            let reader: Arc<dyn Reader> = Arc::new(KafkaReader::new(config)?);
            Ok(reader)
        })
    }

    /// Get the underlying consumer (for advanced use cases)
    pub fn inner(&self) -> &StreamConsumer {
        &self.consumer
    }
}

#[async_trait]
impl Reader for KafkaReader {
    async fn fetch_message(&self) -> Result<Message> {
        if self.closed.is_cancelled() {
            return Err(Error::EndOfStream);
        }
        tokio::select! {
            _ = self.closed.cancelled() => Err(Error::EndOfStream),
            msg = self.consumer.recv() => Ok(convert_message(&msg?)),
        }
    }

    async fn commit_messages(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let tpl = commit_list(messages)?;
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| Error::Reader(format!("Failed to commit offsets: {e}")))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// Collapse a batch into the next offset to read for every partition.
///
/// Handlers for different keys finish in any order, so the batch is not
/// sorted; the highest handled offset of each partition wins.
fn commit_list(messages: &[Message]) -> Result<TopicPartitionList> {
    let mut next_offsets: BTreeMap<(&str, i32), i64> = BTreeMap::new();
    for message in messages {
        let entry = next_offsets
            .entry((message.topic.as_str(), message.partition))
            .or_insert(message.offset + 1);
        *entry = (*entry).max(message.offset + 1);
    }

    let mut tpl = TopicPartitionList::new();
    for ((topic, partition), offset) in next_offsets {
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset))
            .map_err(|e| Error::Reader(format!("Failed to add partition offset: {e}")))?;
    }
    Ok(tpl)
}

fn convert_message(msg: &BorrowedMessage<'_>) -> Message {
    let headers = msg
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| Header {
                    key: h.key.to_string(),
                    value: h.value.map(|v| v.to_vec()),
                })
                .collect()
        })
        .unwrap_or_default();

    Message {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| k.to_vec()),
        payload: msg.payload().map(|p| p.to_vec()),
        timestamp: msg.timestamp().to_millis(),
        headers,
        metadata: Default::default(),
    }
}
