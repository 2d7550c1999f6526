//! Batch rounds: fetch up to `batch_size` messages, handle them in one ordered
//! lane per ordering key, then commit everything that was handled.
//!
//! ```text
//! reader --fetch--> [fetched] --process--> lane(key A) --execute--> [processed] --commit--> reader
//!                                      \-> lane(key B) --execute--/
//! ```
//!
//! Fetching and processing run concurrently under a round-scoped cancellation
//! token. Whichever fails first cancels the round; a failed round commits
//! nothing and its messages are delivered again on the next fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kafka_types::Message;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::executor::HandlerExecutor;
use crate::options::{Batching, Handler};
use crate::ordering::OrderingKeyFn;
use crate::reader::Reader;

/// Summary of one completed round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub batch_id: String,
    /// Messages fetched within the window
    pub fetched: usize,
    /// Messages whose offsets were committed
    pub committed: usize,
    /// The reader reported end of stream while fetching
    pub exhausted: bool,
}

#[derive(Debug, Default)]
struct FetchSummary {
    fetched: usize,
    exhausted: bool,
}

pub struct BatchProcessor {
    consumer_id: String,
    batch_size: usize,
    fetch_timeout: Duration,
    ordering_key: OrderingKeyFn,
    explicit_commit: bool,
    executor: Arc<HandlerExecutor>,
}

impl BatchProcessor {
    pub fn new(
        consumer_id: &str,
        batching: &Batching,
        fetch_timeout: Duration,
        explicit_commit: bool,
        executor: Arc<HandlerExecutor>,
    ) -> Self {
        Self {
            consumer_id: consumer_id.to_string(),
            batch_size: batching.batch_size.max(1),
            fetch_timeout,
            ordering_key: Arc::clone(&batching.ordering_key),
            explicit_commit,
            executor,
        }
    }

    /// Run one fetch-handle-commit round.
    pub async fn process(
        &self,
        token: &CancellationToken,
        reader: &dyn Reader,
        handler: &Handler,
    ) -> Result<RoundOutcome> {
        let batch_id = Uuid::new_v4().to_string();
        let round = token.child_token();
        let (fetched_tx, fetched_rx) = mpsc::channel(self.batch_size);
        let (processed_tx, mut processed_rx) = mpsc::channel(self.batch_size);

        debug!("Consumer {} starting batch {batch_id}", self.consumer_id);

        let fetching = async {
            let result = self.start_fetching(&round, reader, fetched_tx).await;
            if result.is_err() {
                round.cancel();
            }
            result
        };
        let processing = async {
            let result = self
                .start_processing(&round, fetched_rx, processed_tx, handler)
                .await;
            if result.is_err() {
                round.cancel();
            }
            result
        };
        let (fetch_result, process_result) = tokio::join!(fetching, processing);

        let summary = match round_result(fetch_result, process_result) {
            Ok(summary) => summary,
            Err(e) => {
                debug!("Consumer {} abandoned batch {batch_id}: {e}", self.consumer_id);
                return Err(e);
            }
        };

        // Every sender is gone once both phases returned, so this drains the whole batch.
        let mut processed = Vec::with_capacity(summary.fetched);
        while let Ok(message) = processed_rx.try_recv() {
            processed.push(message);
        }

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let committed = if self.explicit_commit {
            reader
                .commit_messages(&processed)
                .await
                .map_err(|e| Error::consumer(&self.consumer_id, "commit messages", e))?;
            processed.len()
        } else {
            0
        };

        if summary.fetched > 0 {
            info!(
                "Consumer {} finished batch {batch_id}: fetched {}, committed {committed}",
                self.consumer_id, summary.fetched
            );
        }

        Ok(RoundOutcome {
            batch_id,
            fetched: summary.fetched,
            committed,
            exhausted: summary.exhausted,
        })
    }

    async fn start_fetching(
        &self,
        round: &CancellationToken,
        reader: &dyn Reader,
        fetched: mpsc::Sender<Message>,
    ) -> Result<FetchSummary> {
        let deadline = Instant::now() + self.fetch_timeout;
        let mut summary = FetchSummary::default();

        while summary.fetched < self.batch_size {
            let message = tokio::select! {
                biased;
                _ = round.cancelled() => return Err(Error::Cancelled),
                result = tokio::time::timeout_at(deadline, reader.fetch_message()) => match result {
                    Ok(Ok(message)) => message,
                    Ok(Err(Error::EndOfStream)) => {
                        summary.exhausted = true;
                        break;
                    }
                    Ok(Err(e)) => {
                        return Err(Error::consumer(&self.consumer_id, "fetch message", e))
                    }
                    Err(_) => {
                        debug!(
                            "Consumer {} fetch window closed after {} messages",
                            self.consumer_id, summary.fetched
                        );
                        break;
                    }
                },
            };

            tokio::select! {
                biased;
                _ = round.cancelled() => return Err(Error::Cancelled),
                sent = fetched.send(message) => {
                    if sent.is_err() {
                        // processing stopped early, which only happens on failure
                        return Err(Error::Cancelled);
                    }
                }
            }
            summary.fetched += 1;
        }

        Ok(summary)
    }

    async fn start_processing(
        &self,
        round: &CancellationToken,
        mut fetched: mpsc::Receiver<Message>,
        processed: mpsc::Sender<Message>,
        handler: &Handler,
    ) -> Result<()> {
        let mut lanes: HashMap<String, mpsc::Sender<Message>> = HashMap::new();
        let mut workers: JoinSet<Result<()>> = JoinSet::new();
        let mut received = 0;
        let mut cancelled = false;

        while received < self.batch_size {
            let message = tokio::select! {
                biased;
                _ = round.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = fetched.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };
            received += 1;

            let key = (self.ordering_key)(&message);
            let lane = lanes.entry(key).or_insert_with_key(|key| {
                let (tx, rx) = mpsc::channel(self.batch_size);
                let executor = Arc::clone(&self.executor);
                let handler = Arc::clone(handler);
                let round = round.clone();
                let processed = processed.clone();
                let consumer_id = self.consumer_id.clone();
                let key = key.clone();
                workers.spawn(async move {
                    let lane = Lane {
                        consumer_id: &consumer_id,
                        key: &key,
                        executor: &executor,
                        handler: &handler,
                        round: &round,
                    };
                    let result = lane.handle_messages(rx, processed).await;
                    if result.is_err() {
                        round.cancel();
                    }
                    result
                });
                tx
            });

            // A closed lane already failed; its error is collected below and
            // the message stays uncommitted.
            let _ = lane.send(message).await;
        }

        debug!(
            "Consumer {} dispatched {received} messages to {} lanes",
            self.consumer_id,
            lanes.len()
        );
        // Closing the lanes lets each worker finish once it has drained its queue.
        drop(lanes);
        drop(processed);

        let mut first_error: Option<Error> = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                // a panicked lane skipped its own cancel
                round.cancel();
                Err(Error::Handler(anyhow::anyhow!("handler task failed: {e}")))
            });
            if let Err(e) = result {
                first_error = Some(root_cause(first_error.take(), e));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None if cancelled => Err(Error::Cancelled),
            None => Ok(()),
        }
    }
}

/// One ordering key's worker within a round
struct Lane<'a> {
    consumer_id: &'a str,
    key: &'a str,
    executor: &'a HandlerExecutor,
    handler: &'a Handler,
    round: &'a CancellationToken,
}

impl Lane<'_> {
    /// Drain the lane strictly in FIFO order, stopping at the first failure.
    async fn handle_messages(
        &self,
        mut queue: mpsc::Receiver<Message>,
        processed: mpsc::Sender<Message>,
    ) -> Result<()> {
        while let Some(message) = queue.recv().await {
            self.executor
                .execute(self.round, message.clone(), self.handler)
                .await
                .map_err(|e| Error::consumer(self.consumer_id, "handle message", e))?;

            if processed.send(message).await.is_err() {
                return Err(Error::Cancelled);
            }
        }
        debug!("Consumer {} lane {:?} drained", self.consumer_id, self.key);
        Ok(())
    }
}

/// Pick the error that caused the round to fail.
///
/// The phase that fails first cancels the round, so the other one usually
/// reports a cancellation; that secondary error is not the cause.
fn round_result(fetch: Result<FetchSummary>, process: Result<()>) -> Result<FetchSummary> {
    match (fetch, process) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
        (Err(fetch_err), Err(process_err)) => Err(root_cause(Some(fetch_err), process_err)),
    }
}

/// Keep the earlier error unless it is a cancellation and the later one is not.
///
/// Tasks stopped by the round token report cancellation, which is a symptom
/// of the failure rather than its cause.
fn root_cause(earlier: Option<Error>, later: Error) -> Error {
    match earlier {
        Some(earlier) if !earlier.is_cancelled() || later.is_cancelled() => earlier,
        _ => later,
    }
}
