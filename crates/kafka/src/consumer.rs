use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kafka_types::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::BatchProcessor;
use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use crate::executor::HandlerExecutor;
use crate::options::{ConsumerOptions, Handler};
use crate::reader::{KafkaReader, Reader};

/// Kafka consumer owning one reader.
///
/// Runs either the single-message loop (fetch one, handle one, commit one)
/// or, when batching is configured, consecutive batch rounds.
pub struct Consumer {
    config: ConsumerConfig,
    reader: Arc<dyn Reader>,
    executor: Arc<HandlerExecutor>,
    batch: Option<BatchProcessor>,
    explicit_commit: bool,
    closed: AtomicBool,
}

impl Consumer {
    /// Create a new consumer and its reader
    pub fn new(config: ConsumerConfig, options: &ConsumerOptions) -> Result<Self> {
        let mut config = config;
        config.enable_auto_commit = !options.explicit_commit;
        if let Some(balancers) = &options.balancers {
            config.balancers = balancers.clone();
        }

        let factory = options
            .reader_factory
            .clone()
            .unwrap_or_else(KafkaReader::factory);
        let reader = factory(&config)?;

        let executor = Arc::new(HandlerExecutor::new(
            &config.group_id,
            &config.consumer_id,
            options,
        ));
        let batch = options.batching.as_ref().map(|batching| {
            BatchProcessor::new(
                &config.consumer_id,
                batching,
                options.fetch_timeout,
                options.explicit_commit,
                Arc::clone(&executor),
            )
        });

        Ok(Self {
            config,
            reader,
            executor,
            batch,
            explicit_commit: options.explicit_commit,
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.consumer_id
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Consume until the consumer is closed, the reader reaches end of stream,
    /// `token` is cancelled, or an error occurs.
    ///
    /// Returns `Ok(())` on close and end of stream. Cancellation is reported
    /// as an error for which [`Error::is_cancelled`] holds.
    pub async fn run(&self, token: &CancellationToken, handler: Handler) -> Result<()> {
        info!(
            "Consumer {} starting on topic {} ({} mode)",
            self.id(),
            self.config.topic,
            if self.batch.is_some() { "batch" } else { "single" }
        );

        let result = match &self.batch {
            Some(batch) => self.run_batches(batch, token, &handler).await,
            None => self.run_single(token, &handler).await,
        };

        match &result {
            Ok(()) => info!("Consumer {} stopped", self.id()),
            Err(e) if e.is_cancelled() => info!("Consumer {} cancelled", self.id()),
            Err(_) => {}
        }
        result
    }

    async fn run_single(&self, token: &CancellationToken, handler: &Handler) -> Result<()> {
        loop {
            if self.is_closed() {
                return Ok(());
            }

            let message = match self.fetch(token).await {
                Ok(message) => message,
                Err(Error::EndOfStream) => return Ok(()),
                Err(e) => return Err(Error::consumer(self.id(), "fetch message", e)),
            };
            debug!(
                "Consumer {} fetched {}/{}@{}",
                self.id(),
                message.topic,
                message.partition,
                message.offset
            );

            self.executor
                .execute(token, message.clone(), handler)
                .await
                .map_err(|e| Error::consumer(self.id(), "handle message", e))?;

            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.explicit_commit {
                self.reader
                    .commit_messages(std::slice::from_ref(&message))
                    .await
                    .map_err(|e| Error::consumer(self.id(), "commit message", e))?;
            }
        }
    }

    async fn run_batches(
        &self,
        batch: &BatchProcessor,
        token: &CancellationToken,
        handler: &Handler,
    ) -> Result<()> {
        loop {
            if self.is_closed() {
                return Ok(());
            }

            let outcome = batch.process(token, self.reader.as_ref(), handler).await?;
            if outcome.exhausted {
                return Ok(());
            }
        }
    }

    async fn fetch(&self, token: &CancellationToken) -> Result<Message> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.reader.fetch_message() => result,
        }
    }

    /// Close the reader. Only the first call reaches the reader; later calls
    /// return `Ok(())`.
    ///
    /// The consumer counts as closed even when closing the reader fails.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing consumer {}", self.id());
        self.reader
            .close()
            .await
            .map_err(|e| Error::consumer(self.id(), "close reader", e))
    }
}
