use std::time::Duration;

use clap::{Parser, ValueEnum};
use ordered_consumer_kafka::{backoff, ordering, ConsumerConfig, ConsumerOptions, GroupBalancer};

/// How messages are split into ordered lanes in batch mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OrderingMode {
    /// One lane per partition
    Partition,
    /// One lane per message key
    Key,
    /// A single lane, every message in fetch order
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RetryMode {
    /// Give up after the first failed attempt
    Stop,
    /// Retry `--max-retries` times, `--retry-interval-ms` apart
    Limited,
    /// Retry forever on the exponential schedule, capped at 5h between attempts
    NonStop,
}

/// Run a consumer group that logs every message it receives.
#[derive(Debug, Clone, Parser)]
#[command(name = "ordered-consumer", version)]
pub struct Config {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[clap(long, env = "KAFKA_BROKERS", value_delimiter = ',', required = true)]
    pub brokers: Vec<String>,
    /// Consumer group ID
    #[clap(long, env = "KAFKA_GROUP_ID")]
    pub group_id: String,
    /// Topic to consume from
    #[clap(long, env = "KAFKA_TOPIC")]
    pub topic: String,
    /// Number of consumers in the consumer group to spawn
    #[clap(long, env = "KAFKA_CONSUMER_COUNT", default_value_t = 1)]
    pub num_consumers: usize,
    /// Handle messages in batch rounds of this size. Without it, messages are
    /// handled and committed one at a time.
    #[clap(long, env = "KAFKA_BATCH_SIZE")]
    pub batch_size: Option<usize>,
    /// How long a batch round waits for messages, in milliseconds
    #[clap(long, env = "KAFKA_FETCH_TIMEOUT_MS", default_value_t = 10_000)]
    pub fetch_timeout_ms: u64,
    /// Ordering lanes used in batch mode
    #[clap(long, value_enum, default_value_t = OrderingMode::Partition)]
    pub ordering: OrderingMode,
    /// Retry policy for failed handler attempts
    #[clap(long, value_enum, default_value_t = RetryMode::Stop)]
    pub retry: RetryMode,
    /// Retries after the first attempt when `--retry limited`
    #[clap(long, default_value_t = 3)]
    pub max_retries: u32,
    /// Wait between attempts when `--retry limited`, in milliseconds
    #[clap(long, default_value_t = 1_000)]
    pub retry_interval_ms: u64,
    /// Let the broker auto-commit instead of committing after each success
    #[clap(long)]
    pub auto_commit: bool,
    /// Continue the producer's trace context from the `traceparent` header
    #[clap(long, env = "KAFKA_TRACE")]
    pub trace: bool,
    /// OTLP endpoint that handler spans are exported to
    #[clap(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_url: Option<String>,
    /// Service name reported with exported spans
    #[clap(long, env = "OTEL_SERVICE_NAME", default_value = "ordered-consumer")]
    pub otel_service_name: String,
    /// Auto offset reset strategy ("earliest" or "latest")
    #[clap(long, default_value = "earliest")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[clap(long, default_value = "30000")]
    pub session_timeout_ms: String,
    /// Partition assignment strategies, in order of preference
    #[clap(long, value_delimiter = ',', default_value = "range,roundrobin")]
    pub balancers: Vec<GroupBalancer>,
}

impl Config {
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            brokers: self.brokers.join(","),
            group_id: self.group_id.clone(),
            topic: self.topic.clone(),
            count: self.num_consumers,
            auto_offset_reset: self.auto_offset_reset.clone(),
            session_timeout_ms: self.session_timeout_ms.clone(),
            ..Default::default()
        }
    }

    pub fn consumer_options(&self) -> ConsumerOptions {
        let retry = match self.retry {
            RetryMode::Stop => backoff::stop(),
            RetryMode::Limited => backoff::max_retries(
                Duration::from_millis(self.retry_interval_ms),
                self.max_retries,
            ),
            RetryMode::NonStop => backoff::non_stop(),
        };

        let mut options = ConsumerOptions::default()
            .explicit_commit(!self.auto_commit)
            .group_balancers(self.balancers.clone())
            .retry(retry)
            .tracing(self.trace)
            .fetch_timeout(Duration::from_millis(self.fetch_timeout_ms));

        if let Some(batch_size) = self.batch_size {
            let ordering_key = match self.ordering {
                OrderingMode::Partition => ordering::by_partition(),
                OrderingMode::Key => ordering::by_message_key(),
                OrderingMode::None => ordering::constant(""),
            };
            options = options.batching(batch_size, ordering_key);
        }
        options
    }
}
