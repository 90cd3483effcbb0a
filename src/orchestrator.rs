use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{
    CHAT_TIMEOUT, FAILURE_MESSAGE, REVIEW_ERROR_MESSAGE, STREAM_THROTTLE, TIMEOUT_MESSAGE,
};
use crate::error::{ReflectorError, Result};
use crate::modes::Mode;
use crate::review::Review;
use crate::session::{lock_store, Message, Role, SharedStore};
use crate::stream_consumer::{MessageSink, SessionSink, StreamConsumer, StreamOutcome};

/// Where and how the client talks to the chat/review functions.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub throttle: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: CHAT_TIMEOUT,
            throttle: STREAM_THROTTLE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn function_url(&self, name: &str) -> String {
        format!("{}/functions/v1/{}", self.base_url.trim_end_matches('/'), name)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    session_id: Option<String>,
    message: String,
    history: Vec<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRequest {
    session_id: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input, a request already in flight, or no active session.
    Ignored,
    /// A response body was read; see the stream outcome for how it ended.
    Streamed(StreamOutcome),
    /// No response body was obtained.
    Failed { timed_out: bool },
}

/// Releases the request's claim on the loading/streaming flags when
/// dropped, on every exit path including cancellation of the send future.
/// A claim already taken over by a newer session is left alone.
struct FlagGuard {
    store: SharedStore,
    session_id: String,
}

impl Drop for FlagGuard {
    fn drop(&mut self) {
        if lock_store(&self.store).finish_request(&self.session_id) {
            debug!(session_id = %self.session_id, "Cleared loading and streaming flags");
        }
    }
}

/// Issues chat and review requests for the store's active session.
#[derive(Clone)]
pub struct Orchestrator {
    client: Client,
    config: ClientConfig,
    store: SharedStore,
}

impl Orchestrator {
    pub fn new(config: ClientConfig, store: SharedStore) -> Self {
        Self {
            client: Client::new(),
            config,
            store,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a new session in `mode` and greet with the mode's welcome
    /// message. Any stream still running for the previous session can no
    /// longer write into this one.
    pub fn switch_mode(&self, mode: Mode) -> String {
        let mut store = lock_store(&self.store);
        let session_id = store.start_session(mode);
        store.add_message(Role::Assistant, mode.welcome_message());
        info!(%session_id, %mode, "Switched mode");
        session_id
    }

    pub async fn send_message(&self, text: &str) -> SendOutcome {
        self.send(text, None).await
    }

    /// Like [`send_message`](Self::send_message), also calling `observer`
    /// with the full reply so far on every applied update.
    pub async fn send_message_with(
        &self,
        text: &str,
        observer: Box<dyn FnMut(&str) + Send>,
    ) -> SendOutcome {
        self.send(text, Some(observer)).await
    }

    #[instrument(skip_all, fields(chars = text.len()))]
    async fn send(&self, text: &str, observer: Option<Box<dyn FnMut(&str) + Send>>) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }

        let (session_id, mode, request) = {
            let mut store = lock_store(&self.store);
            if store.is_loading() {
                debug!("Request already in flight; ignoring send");
                return SendOutcome::Ignored;
            }
            let (Some(session_id), Some(mode)) = (store.session_id().map(str::to_string), store.mode())
            else {
                warn!("No active session; ignoring send");
                return SendOutcome::Ignored;
            };

            let request = ChatRequest {
                session_id: Some(session_id.clone()),
                message: text.to_string(),
                history: store.messages().to_vec(),
            };
            store.add_message(Role::User, text);
            store.begin_request(&session_id);
            store.add_message(Role::Assistant, "");
            (session_id, mode, request)
        };
        let _flags = FlagGuard {
            store: self.store.clone(),
            session_id: session_id.clone(),
        };

        let mut sink = SessionSink::new(self.store.clone(), session_id);
        if let Some(observer) = observer {
            sink = sink.with_observer(observer);
        }
        let deadline = Instant::now() + self.config.timeout;

        match self.exchange(mode, &request, deadline, &mut sink).await {
            Ok(outcome) => {
                info!(?outcome, %mode, "Chat response finished");
                SendOutcome::Streamed(outcome)
            }
            Err(e) => {
                let timed_out = e.is_timeout();
                error!("Chat request failed: {}", e);
                sink.update(if timed_out { TIMEOUT_MESSAGE } else { FAILURE_MESSAGE });
                SendOutcome::Failed { timed_out }
            }
        }
    }

    async fn exchange(
        &self,
        mode: Mode,
        request: &ChatRequest,
        deadline: Instant,
        sink: &mut SessionSink,
    ) -> Result<StreamOutcome> {
        let url = self.config.function_url(&mode.chat_endpoint());
        debug!(%url, history = request.history.len(), "Sending chat request");

        let pending = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send();
        let response = tokio::time::timeout_at(deadline, pending)
            .await
            .map_err(|_| ReflectorError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            return Err(ReflectorError::Http { status });
        }

        let consumer = StreamConsumer::new(self.config.throttle).with_deadline(deadline);
        let report = consumer.consume(response.bytes_stream(), sink).await;
        debug!(chunks = report.chunks, writes = report.writes, "Stream drained");
        Ok(report.outcome)
    }

    /// Request a review of the current conversation and store it. Returns the
    /// markdown to show, or `None` when there is nothing to review.
    #[instrument(skip_all)]
    pub async fn generate_review(&self) -> Option<String> {
        let (mode, request) = {
            let mut store = lock_store(&self.store);
            let mode = store.mode()?;
            if store.messages().is_empty() {
                return None;
            }
            let request = ReviewRequest {
                session_id: store.session_id().map(str::to_string),
                messages: store.messages().to_vec(),
            };
            if !store.show_review() {
                store.toggle_review();
            }
            (mode, request)
        };

        match self.fetch_review(mode, &request).await {
            Ok(review) => {
                let markdown = review.to_markdown();
                lock_store(&self.store).set_review(Some(review));
                Some(markdown)
            }
            Err(e) => {
                error!("Review request failed: {}", e);
                lock_store(&self.store).set_review(None);
                Some(REVIEW_ERROR_MESSAGE.to_string())
            }
        }
    }

    async fn fetch_review(&self, mode: Mode, request: &ReviewRequest) -> Result<Review> {
        let url = self.config.function_url(&mode.review_endpoint());
        debug!(%url, messages = request.messages.len(), "Sending review request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReflectorError::Http { status });
        }
        let value = response.json::<serde_json::Value>().await?;
        Ok(Review::from_json(value))
    }
}
