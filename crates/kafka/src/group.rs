use std::sync::{Arc, Mutex};

use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConsumerConfig;
use crate::consumer::Consumer;
use crate::error::{Error, Result};
use crate::options::{ConsumerOptions, Handler};

const SLUG_LEN: usize = 6;

/// Several consumers in the same consumer group, each running in its own task.
///
/// All consumers share `group_id`, so Kafka assigns each one a different
/// share of the topic's partitions.
pub struct Group {
    config: ConsumerConfig,
    options: ConsumerOptions,
    slug: String,
    consumers: Mutex<Vec<Arc<Consumer>>>,
}

impl Group {
    pub fn new(config: ConsumerConfig, options: ConsumerOptions) -> Result<Self> {
        config.validate()?;
        let mut config = config;
        config.count = config.count.max(1);

        let slug: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SLUG_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();

        Ok(Self {
            config,
            options,
            slug,
            consumers: Mutex::new(Vec::new()),
        })
    }

    /// Group name used in consumer ids and logs, e.g. `billing-x7k2qa`
    pub fn name(&self) -> String {
        format!("{}-{}", self.config.group_id.to_lowercase(), self.slug)
    }

    pub fn consumer_ids(&self) -> Vec<String> {
        self.consumers
            .lock()
            .map(|consumers| consumers.iter().map(|c| c.id().to_string()).collect())
            .unwrap_or_default()
    }

    /// Start `count` consumers and return the channel their errors arrive on.
    ///
    /// Consumers are created one after another before any of them starts, so
    /// the broker sees members join one at a time. Cancellation is a normal
    /// shutdown and is not reported. The channel closes once every consumer
    /// task has finished.
    pub async fn run(
        &self,
        token: &CancellationToken,
        handler: Handler,
    ) -> Result<mpsc::Receiver<Error>> {
        let name = self.name();
        let mut consumers = Vec::with_capacity(self.config.count);

        for i in 0..self.config.count {
            let config = ConsumerConfig {
                consumer_id: format!("{name}-{i}"),
                ..self.config.clone()
            };
            match Consumer::new(config, &self.options) {
                Ok(consumer) => {
                    debug!("Group {name} created consumer {}", consumer.id());
                    consumers.push(Arc::new(consumer));
                }
                Err(e) => {
                    error!("Group {name} failed to create consumer {i}: {e}");
                    for consumer in &consumers {
                        if let Err(close_err) = consumer.close().await {
                            warn!("Group {name} failed to close {}: {close_err}", consumer.id());
                        }
                    }
                    return Err(e);
                }
            }
        }

        if let Ok(mut registered) = self.consumers.lock() {
            registered.extend(consumers.iter().cloned());
        }

        info!(
            "Group {name} starting {} consumers on topic {}",
            consumers.len(),
            self.config.topic
        );

        let (errors_tx, errors_rx) = mpsc::channel(consumers.len());
        for consumer in consumers {
            let token = token.clone();
            let handler = Arc::clone(&handler);
            let errors = errors_tx.clone();
            let group_id = self.config.group_id.clone();
            tokio::spawn(async move {
                match consumer.run(&token, handler).await {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => {
                        debug!("Consumer {} shut down by cancellation", consumer.id());
                    }
                    Err(e) => {
                        error!("Consumer {} failed: {e}", consumer.id());
                        let _ = errors
                            .send(Error::Group {
                                group_id,
                                consumer_id: consumer.id().to_string(),
                                source: Box::new(e),
                            })
                            .await;
                    }
                }
            });
        }

        Ok(errors_rx)
    }

    /// Close every consumer, even when some of them fail to close.
    pub async fn close(&self) -> Result<()> {
        let consumers = self
            .consumers
            .lock()
            .map(|consumers| consumers.clone())
            .unwrap_or_default();

        let mut failures = Vec::new();
        for consumer in consumers {
            if let Err(e) = consumer.close().await {
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            info!("Group {} closed", self.name());
            Ok(())
        } else {
            Err(Error::Close(failures))
        }
    }
}
