//! In-memory reader and handler helpers for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kafka_types::Message;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::options::{handler_fn, Handler};
use crate::reader::Reader;

/// What `fetch_message` does once the queued messages are used up
#[derive(Clone, Debug)]
pub(crate) enum OnEmpty {
    /// Wait until the reader is closed, like a quiet topic
    Block,
    EndOfStream,
    Fail(String),
}

pub(crate) struct MockReader {
    messages: Mutex<VecDeque<Message>>,
    on_empty: OnEmpty,
    fail_commits: bool,
    fail_close: bool,
    commits: Mutex<Vec<Vec<i64>>>,
    close_calls: AtomicUsize,
    closed: CancellationToken,
}

impl MockReader {
    pub(crate) fn new(messages: Vec<Message>, on_empty: OnEmpty) -> Self {
        Self {
            messages: Mutex::new(messages.into()),
            on_empty,
            fail_commits: false,
            fail_close: false,
            commits: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        }
    }

    pub(crate) fn fail_commits(mut self) -> Self {
        self.fail_commits = true;
        self
    }

    pub(crate) fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Committed offsets, one sorted entry per commit call
    pub(crate) fn commits(&self) -> Vec<Vec<i64>> {
        self.commits.lock().unwrap().clone()
    }

    pub(crate) fn committed_count(&self) -> usize {
        self.commits.lock().unwrap().iter().map(Vec::len).sum()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reader for MockReader {
    async fn fetch_message(&self) -> Result<Message> {
        if self.closed.is_cancelled() {
            return Err(Error::EndOfStream);
        }
        let next = self.messages.lock().unwrap().pop_front();
        if let Some(message) = next {
            return Ok(message);
        }
        match &self.on_empty {
            OnEmpty::Block => {
                self.closed.cancelled().await;
                Err(Error::EndOfStream)
            }
            OnEmpty::EndOfStream => Err(Error::EndOfStream),
            OnEmpty::Fail(reason) => Err(Error::Reader(reason.clone())),
        }
    }

    async fn commit_messages(&self, messages: &[Message]) -> Result<()> {
        if self.fail_commits {
            return Err(Error::Reader("commit rejected".to_string()));
        }
        let mut offsets: Vec<i64> = messages.iter().map(|m| m.offset).collect();
        offsets.sort_unstable();
        self.commits.lock().unwrap().push(offsets);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
        if self.fail_close {
            return Err(Error::Reader("close rejected".to_string()));
        }
        Ok(())
    }
}

/// Handler that records every message it sees and always succeeds
pub(crate) fn recording_handler() -> (Handler, Arc<Mutex<Vec<Message>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = Arc::clone(&seen);
        handler_fn(move |_token, msg: Message| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(msg);
                Ok(())
            }
        })
    };
    (handler, seen)
}
