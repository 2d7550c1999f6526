use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use kafka_types::Message;
use tokio_util::sync::CancellationToken;

use crate::backoff::{self, BackOffConstructor};
use crate::config::GroupBalancer;
use crate::ordering::OrderingKeyFn;
use crate::reader::ReaderFactory;

/// Type alias for message handler functions
///
/// The token is cancelled when the consumer shuts down or, in batch mode, when
/// the round fails. Long-running handlers should stop early once it fires.
pub type Handler =
    Arc<dyn Fn(CancellationToken, Message) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Called after every failed handler attempt, for metrics and logging.
pub type NotifyError = Arc<dyn Fn(&anyhow::Error, &Message) + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(CancellationToken, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |token, message| f(token, message).boxed())
}

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Batch mode settings
#[derive(Clone)]
pub struct Batching {
    pub batch_size: usize,
    pub ordering_key: OrderingKeyFn,
}

/// Behavior switches for a [`Consumer`](crate::Consumer) or [`Group`](crate::Group).
///
/// ```ignore
/// let options = ConsumerOptions::default()
///     .retry(backoff::non_stop())
///     .batching(100, ordering::by_message_key())
///     .notify_error(Arc::new(|err, msg| metrics::failed(err, msg)));
/// ```
#[derive(Clone)]
pub struct ConsumerOptions {
    pub(crate) explicit_commit: bool,
    pub(crate) balancers: Option<Vec<GroupBalancer>>,
    pub(crate) backoff: BackOffConstructor,
    pub(crate) notify_error: Option<NotifyError>,
    pub(crate) tracing: bool,
    pub(crate) batching: Option<Batching>,
    pub(crate) fetch_timeout: Duration,
    pub(crate) reader_factory: Option<ReaderFactory>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            explicit_commit: true,
            balancers: None,
            backoff: backoff::stop(),
            notify_error: None,
            tracing: false,
            batching: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            reader_factory: None,
        }
    }
}

impl ConsumerOptions {
    /// Commit offsets after handling (default). When off, the broker
    /// auto-commits and the consumer never commits itself.
    pub fn explicit_commit(mut self, enabled: bool) -> Self {
        self.explicit_commit = enabled;
        self
    }

    pub fn group_balancers(mut self, balancers: Vec<GroupBalancer>) -> Self {
        self.balancers = Some(balancers);
        self
    }

    pub fn retry(mut self, backoff: BackOffConstructor) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn notify_error(mut self, notify: NotifyError) -> Self {
        self.notify_error = Some(notify);
        self
    }

    /// Continue the producer's trace around each handler call.
    pub fn tracing(mut self, enabled: bool) -> Self {
        self.tracing = enabled;
        self
    }

    /// Handle messages in batch rounds of up to `batch_size`, one ordered lane per key.
    pub fn batching(mut self, batch_size: usize, ordering_key: OrderingKeyFn) -> Self {
        self.batching = Some(Batching {
            batch_size: batch_size.max(1),
            ordering_key,
        });
        self
    }

    /// How long a batch round waits for messages before handling what arrived.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn reader_factory(mut self, factory: ReaderFactory) -> Self {
        self.reader_factory = Some(factory);
        self
    }
}
