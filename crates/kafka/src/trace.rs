//! Trace context propagation through Kafka record headers.
//!
//! Producers attach a W3C `traceparent` (and optionally `tracestate`) header;
//! the consumer continues that trace around the handler call.

use kafka_types::Message;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::error::{Error, Result};

struct HeaderExtractor<'a>(&'a Message);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .headers
            .iter()
            .rev()
            .find(|h| h.key.eq_ignore_ascii_case(key))
            .and_then(|h| h.value.as_deref())
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.headers.iter().map(|h| h.key.as_str()).collect()
    }
}

/// Extract the remote parent context carried by the message headers.
///
/// A message without a valid parent is malformed: retrying cannot fix it.
pub(crate) fn extract_parent(message: &Message) -> Result<Context> {
    let cx = TraceContextPropagator::new().extract(&HeaderExtractor(message));
    if !cx.span().span_context().is_valid() {
        let reason = if message.header("traceparent").is_some() {
            "invalid traceparent header"
        } else {
            "missing traceparent header"
        };
        return Err(Error::TraceContext {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason: reason.to_string(),
        });
    }
    Ok(cx)
}

/// Span wrapping the handler for one message, parented on the producer's trace.
pub(crate) fn consume_span(message: &Message, parent: Context) -> Span {
    let span = tracing::info_span!(
        "kafka.consume",
        topic = %message.topic,
        partition = message.partition,
        offset = message.offset,
    );
    span.set_parent(parent);
    span
}
