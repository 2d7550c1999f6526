use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The reader was closed; the equivalent of reaching the end of the stream.
    #[error("End of stream: reader closed")]
    EndOfStream,

    #[error("Operation cancelled")]
    Cancelled,

    /// Cancelled while waiting to retry a failed handler attempt.
    #[error("Operation cancelled; consumer handler error: {0:#}")]
    CancelledDuringRetry(anyhow::Error),

    /// The handler failed and the retry policy gave up.
    #[error(transparent)]
    Handler(anyhow::Error),

    /// Trace context could not be extracted from the record headers.
    #[error("Malformed message {topic}/{partition}@{offset}: {reason}")]
    TraceContext {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("Reader error: {0}")]
    Reader(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("consumer {consumer_id} unable to {action}: {source}")]
    Consumer {
        consumer_id: String,
        action: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("consumer {consumer_id} in group {group_id} failed: {source}")]
    Group {
        group_id: String,
        consumer_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to close consumers: {}", .0.join("; "))]
    Close(Vec<String>),
}

impl Error {
    pub(crate) fn consumer(consumer_id: &str, action: &'static str, source: Error) -> Self {
        Error::Consumer {
            consumer_id: consumer_id.to_string(),
            action,
            source: Box::new(source),
        }
    }

    /// Whether this error, or any error it wraps, is a cancellation.
    ///
    /// Cancellation is how a consumer shuts down, so callers usually treat it
    /// as success rather than failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled | Error::CancelledDuringRetry(_) => true,
            Error::Consumer { source, .. } | Error::Group { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The error returned by the message handler, if this error carries one.
    pub fn handler_error(&self) -> Option<&anyhow::Error> {
        match self {
            Error::Handler(e) | Error::CancelledDuringRetry(e) => Some(e),
            Error::Consumer { source, .. } | Error::Group { source, .. } => source.handler_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
