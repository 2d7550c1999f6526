use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Partition assignment strategy used when the consumer group rebalances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBalancer {
    Range,
    RoundRobin,
    CooperativeSticky,
}

impl GroupBalancer {
    /// librdkafka `partition.assignment.strategy` name
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBalancer::Range => "range",
            GroupBalancer::RoundRobin => "roundrobin",
            GroupBalancer::CooperativeSticky => "cooperative-sticky",
        }
    }
}

impl fmt::Display for GroupBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupBalancer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "range" => Ok(GroupBalancer::Range),
            "roundrobin" | "round-robin" => Ok(GroupBalancer::RoundRobin),
            "cooperative-sticky" | "sticky" => Ok(GroupBalancer::CooperativeSticky),
            _ => Err(Error::InvalidConfig(format!("Unknown group balancer: {s}"))),
        }
    }
}

/// Configuration for a Kafka consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Consumer group ID
    ///
    /// Used as-is for Kafka group membership. All consumers of a `Group`
    /// share it.
    pub group_id: String,
    /// Topic to consume from
    pub topic: String,
    /// Identifier of this consumer, sent to the broker as `client.id`
    ///
    /// A `Group` overrides it with a unique id per consumer.
    pub consumer_id: String,
    /// Number of consumers a `Group` runs; values below 1 mean 1
    pub count: usize,
    /// Auto offset reset strategy ("earliest" or "latest")
    ///
    /// "earliest" means the consumer will start from the beginning of the topic
    /// if no committed offsets are found for the consumer group.
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    pub session_timeout_ms: String,
    /// Enable auto commit
    ///
    /// False unless explicit commits are switched off through
    /// `ConsumerOptions::explicit_commit`, since offsets are committed only
    /// after handlers succeed.
    pub enable_auto_commit: bool,
    /// Partition assignment strategies, in order of preference
    pub balancers: Vec<GroupBalancer>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "ordered-consumer".to_string(),
            topic: "".to_string(),
            consumer_id: "ordered-consumer".to_string(),
            count: 1,
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: "6000".to_string(),
            enable_auto_commit: false,
            balancers: vec![GroupBalancer::Range, GroupBalancer::RoundRobin],
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.brokers.trim().is_empty() {
            return Err(Error::InvalidConfig("brokers must not be empty".to_string()));
        }
        if self.group_id.trim().is_empty() {
            return Err(Error::InvalidConfig("group_id must not be empty".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(Error::InvalidConfig("topic must not be empty".to_string()));
        }
        Ok(())
    }

    /// `partition.assignment.strategy` value for librdkafka
    pub fn assignment_strategy(&self) -> String {
        self.balancers
            .iter()
            .map(GroupBalancer::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}
