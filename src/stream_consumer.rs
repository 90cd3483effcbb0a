use std::fmt::Display;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::constants::{STREAM_ERROR_MESSAGE, STREAM_THROTTLE, TRUNCATION_NOTICE};
use crate::decoder::Utf8StreamDecoder;
use crate::session::{lock_store, SharedStore};

/// Destination of the accumulated reply. Every call carries the whole text
/// so far, never a delta.
pub trait MessageSink {
    fn update(&mut self, content: &str);
}

impl<F> MessageSink for F
where
    F: FnMut(&str),
{
    fn update(&mut self, content: &str) {
        self(content)
    }
}

/// Writes into the last assistant message of the session the stream was
/// started under. Once the store has moved to another session the writes
/// are dropped.
pub struct SessionSink {
    store: SharedStore,
    session_id: String,
    observer: Option<Box<dyn FnMut(&str) + Send>>,
}

impl SessionSink {
    pub fn new(store: SharedStore, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            observer: None,
        }
    }

    /// Also hand every applied update to `observer` (e.g. a terminal printer).
    pub fn with_observer(mut self, observer: Box<dyn FnMut(&str) + Send>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl MessageSink for SessionSink {
    fn update(&mut self, content: &str) {
        let applied = lock_store(&self.store).update_last_message_for(&self.session_id, content);
        if applied {
            if let Some(observer) = self.observer.as_mut() {
                observer(content);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The body ended normally; the sink holds the full reply.
    Completed,
    /// The body failed after some text arrived; the sink holds that text plus
    /// the truncation notice.
    Truncated,
    /// The body failed before any text arrived; the sink holds the
    /// stream-error placeholder.
    Failed,
}

#[derive(Debug, Clone)]
pub struct StreamReport {
    pub outcome: StreamOutcome,
    /// Last content written to the sink.
    pub content: String,
    pub chunks: usize,
    pub writes: usize,
}

/// Drains a response body into a [`MessageSink`] with throttled writes.
#[derive(Debug, Clone)]
pub struct StreamConsumer {
    throttle: Duration,
    deadline: Option<Instant>,
}

impl Default for StreamConsumer {
    fn default() -> Self {
        Self::new(STREAM_THROTTLE)
    }
}

impl StreamConsumer {
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            deadline: None,
        }
    }

    /// Treat the body as failed if it is still open at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub async fn consume<S, B, E, K>(&self, stream: S, sink: &mut K) -> StreamReport
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
        K: MessageSink + ?Sized,
    {
        let mut stream = Box::pin(stream);
        let mut decoder = Utf8StreamDecoder::new();
        let mut accumulated = String::new();
        let mut last_push = Instant::now();
        let mut chunks = 0usize;
        let mut writes = 0usize;

        let failure: Option<String> = loop {
            let next = match self.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, stream.next()).await {
                    Ok(item) => item,
                    Err(_) => break Some("deadline exceeded while reading body".to_string()),
                },
                None => stream.next().await,
            };

            match next {
                None => break None,
                Some(Ok(chunk)) => {
                    chunks += 1;
                    let text = decoder.feed(chunk.as_ref());
                    trace!(bytes = chunk.as_ref().len(), chars = text.len(), "Received chunk");
                    if text.is_empty() {
                        continue;
                    }
                    accumulated.push_str(&text);

                    let now = Instant::now();
                    if now.duration_since(last_push) >= self.throttle {
                        sink.update(&accumulated);
                        writes += 1;
                        last_push = now;
                    }
                }
                Some(Err(e)) => break Some(e.to_string()),
            }
        };

        let (outcome, content) = match failure {
            None => {
                accumulated.push_str(&decoder.finish());
                (StreamOutcome::Completed, accumulated)
            }
            Some(err) if !accumulated.trim().is_empty() => {
                warn!(error = %err, received = accumulated.len(), "Stream interrupted");
                accumulated.push_str(TRUNCATION_NOTICE);
                (StreamOutcome::Truncated, accumulated)
            }
            Some(err) => {
                warn!(error = %err, "Stream failed before any text arrived");
                (StreamOutcome::Failed, STREAM_ERROR_MESSAGE.to_string())
            }
        };

        // Final flush happens before the body is released.
        sink.update(&content);
        writes += 1;

        drop(stream);
        debug!(?outcome, chunks, writes, "Released response stream");

        StreamReport {
            outcome,
            content,
            chunks,
            writes,
        }
    }
}
