//! Handler execution with retries.
//!
//! Shared by the single-message loop and the batch lanes, so both paths have
//! the same retry, notification and tracing behavior.

use std::time::Duration;

use kafka_types::{Message, Metadata};
use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument, Span};

use crate::backoff::BackOffConstructor;
use crate::error::{Error, Result};
use crate::options::{ConsumerOptions, Handler, NotifyError};
use crate::trace;

pub struct HandlerExecutor {
    group_id: String,
    consumer_id: String,
    backoff: BackOffConstructor,
    notify_error: Option<NotifyError>,
    tracing: bool,
}

impl HandlerExecutor {
    pub fn new(group_id: &str, consumer_id: &str, options: &ConsumerOptions) -> Self {
        Self {
            group_id: group_id.to_string(),
            consumer_id: consumer_id.to_string(),
            backoff: options.backoff.clone(),
            notify_error: options.notify_error.clone(),
            tracing: options.tracing,
        }
    }

    /// Run `handler` on `message` until it succeeds, the retry policy gives up,
    /// or `token` is cancelled.
    ///
    /// The first attempt starts immediately. Cancellation is checked before
    /// every attempt and the handler receives `token`, so a running attempt
    /// can stop early; an attempt that fails after cancellation is not retried.
    pub async fn execute(
        &self,
        token: &CancellationToken,
        message: Message,
        handler: &Handler,
    ) -> Result<()> {
        let span = if self.tracing {
            let parent = trace::extract_parent(&message)?;
            trace::consume_span(&message, parent)
        } else {
            Span::current()
        };

        let mut backoff = (self.backoff)();
        let mut attempt: u32 = 0;
        let mut wait = Duration::ZERO;
        let mut last_error: Option<anyhow::Error> = None;

        loop {
            let cancelled = if wait.is_zero() {
                token.is_cancelled()
            } else {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => true,
                    _ = tokio::time::sleep(wait) => false,
                }
            };
            if cancelled {
                return Err(match last_error {
                    Some(e) => Error::CancelledDuringRetry(e),
                    None => Error::Cancelled,
                });
            }

            attempt += 1;
            let attempted = message.clone().with_metadata(Metadata {
                group_id: self.group_id.clone(),
                consumer_id: self.consumer_id.clone(),
                attempt,
            });

            let attempt_result = handler(token.clone(), attempted.clone())
                .instrument(span.clone())
                .await;
            let err = match attempt_result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            warn!(
                "Consumer {} handler failed on {}/{}@{} (attempt {attempt}): {err:#}",
                self.consumer_id, message.topic, message.partition, message.offset
            );
            if let Some(notify) = &self.notify_error {
                notify(&err, &attempted);
            }
            if token.is_cancelled() {
                return Err(Error::CancelledDuringRetry(err));
            }

            match backoff.next_backoff() {
                Some(next) => {
                    wait = next;
                    last_error = Some(err);
                }
                None => return Err(Error::Handler(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff;
    use crate::options::handler_fn;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn executor(options: &ConsumerOptions) -> HandlerExecutor {
        HandlerExecutor::new("billing", "billing-abc123-0", options)
    }

    fn failing_handler(calls: Arc<AtomicU32>) -> Handler {
        handler_fn(move |_token, _msg| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(anyhow::anyhow!("attempt {n} failed"))
            }
        })
    }

    fn counting_notifier(count: Arc<AtomicU32>) -> NotifyError {
        Arc::new(move |_err: &anyhow::Error, _msg: &Message| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = Arc::clone(&seen);
            handler_fn(move |_token, msg: Message| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(msg.metadata);
                    Ok(())
                }
            })
        };
        let notified = Arc::new(AtomicU32::new(0));
        let options =
            ConsumerOptions::default().notify_error(counting_notifier(Arc::clone(&notified)));

        executor(&options)
            .execute(&CancellationToken::new(), Message::new("orders", 0, 1), &handler)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![Metadata {
                group_id: "billing".to_string(),
                consumer_id: "billing-abc123-0".to_string(),
                attempt: 1,
            }]
        );
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_default_policy_is_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = failing_handler(Arc::clone(&calls));

        let err = executor(&ConsumerOptions::default())
            .execute(&CancellationToken::new(), Message::new("orders", 0, 1), &handler)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::Handler(_)));
        assert_eq!(err.to_string(), "attempt 1 failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let notified = Arc::new(AtomicU32::new(0));
        let handler = failing_handler(Arc::clone(&calls));
        let options = ConsumerOptions::default()
            .retry(backoff::max_retries(Duration::from_millis(100), 2))
            .notify_error(counting_notifier(Arc::clone(&notified)));

        let err = executor(&options)
            .execute(&CancellationToken::new(), Message::new("orders", 0, 1), &handler)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(notified.load(Ordering::SeqCst), 3);
        assert_eq!(
            err.handler_error().map(|e| e.to_string()).as_deref(),
            Some("attempt 3 failed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_counter_increments() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let attempts = Arc::clone(&attempts);
            handler_fn(move |_token, msg: Message| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.lock().unwrap().push(msg.metadata.attempt);
                    if msg.metadata.attempt < 3 {
                        anyhow::bail!("not yet");
                    }
                    Ok(())
                }
            })
        };
        let options = ConsumerOptions::default().retry(backoff::constant(Duration::from_secs(1)));

        executor(&options)
            .execute(&CancellationToken::new(), Message::new("orders", 0, 1), &handler)
            .await
            .unwrap();

        assert_eq!(*attempts.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = failing_handler(Arc::clone(&calls));
        let options =
            ConsumerOptions::default().retry(backoff::max_retries(Duration::from_secs(30), 2));

        let started = tokio::time::Instant::now();
        let _ = executor(&options)
            .execute(&CancellationToken::new(), Message::new("orders", 0, 1), &handler)
            .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(61));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = failing_handler(Arc::clone(&calls));
        let token = CancellationToken::new();
        token.cancel();

        let err = executor(&ConsumerOptions::default())
            .execute(&token, Message::new("orders", 0, 1), &handler)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_between_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = failing_handler(Arc::clone(&calls));
        let token = CancellationToken::new();
        let notify: NotifyError = {
            let token = token.clone();
            Arc::new(move |_err: &anyhow::Error, _msg: &Message| token.cancel())
        };
        let options = ConsumerOptions::default()
            .retry(backoff::constant(Duration::from_secs(3600)))
            .notify_error(notify);

        let started = tokio::time::Instant::now();
        let err = executor(&options)
            .execute(&token, Message::new("orders", 0, 1), &handler)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(3600));
        assert!(err.is_cancelled());
        assert!(err
            .to_string()
            .contains("consumer handler error: attempt 1 failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_reaches_running_handler() {
        let handler = handler_fn(|token: CancellationToken, _msg: Message| async move {
            tokio::select! {
                _ = token.cancelled() => anyhow::bail!("interrupted"),
                _ = tokio::time::sleep(Duration::from_secs(3600)) => Ok(()),
            }
        });
        let token = CancellationToken::new();
        tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            }
        });
        let options = ConsumerOptions::default().retry(backoff::non_stop());

        let started = tokio::time::Instant::now();
        let err = executor(&options)
            .execute(&token, Message::new("orders", 0, 1), &handler)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(err.is_cancelled());
        assert_eq!(
            err.handler_error().map(|e| e.to_string()).as_deref(),
            Some("interrupted")
        );
    }

    #[tokio::test]
    async fn test_missing_trace_context_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = failing_handler(Arc::clone(&calls));
        let options = ConsumerOptions::default()
            .tracing(true)
            .retry(backoff::constant(Duration::from_millis(1)));

        let err = executor(&options)
            .execute(&CancellationToken::new(), Message::new("orders", 0, 1), &handler)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TraceContext { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_traced_message_is_handled() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            handler_fn(move |_token, _msg| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        let options = ConsumerOptions::default().tracing(true);
        let msg = Message::new("orders", 0, 1).with_header("traceparent", TRACEPARENT);

        executor(&options)
            .execute(&CancellationToken::new(), msg, &handler)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
