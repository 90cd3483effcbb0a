use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    serve, Json, Router,
};
use futures::{stream, Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::constants::{self, CHAT_MAX_TOKENS, REVIEW_MAX_TOKENS, TEMPERATURE, TRUNCATION_NOTICE};
use crate::modes::Mode;
use crate::prompts::{HistoryEntry, PromptRenderer};
use crate::review::Review;
use crate::sse::{collect_text, SseTextParser};

const CHAT_PREFIX: &str = "generate-chat-response";
const REVIEW_PREFIX: &str = "generate-review";

/// Upstream completion API used by the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub upstream_url: String,
    pub api_key: String,
    pub model: String,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self {
            upstream_url: constants::OPENAI_API_URL.clone(),
            api_key: constants::OPENAI_API_KEY.clone(),
            model: constants::REFLECTOR_MODEL.clone(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.upstream_url.trim_end_matches('/'))
    }
}

#[derive(Clone)]
struct RelayState {
    client: Client,
    config: Arc<RelayConfig>,
    prompts: Arc<PromptRenderer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatPayload {
    session_id: Option<String>,
    message: String,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewPayload {
    session_id: Option<String>,
    #[serde(default)]
    messages: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Function requested by path: which endpoint family and which mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Chat(Mode),
    Review(Mode),
}

impl Function {
    /// `generate-chat-response-kids` -> `Chat(Kids)`. A bare family name
    /// falls back to inquiry mode.
    fn parse(name: &str) -> Option<Self> {
        fn mode_suffix(rest: &str) -> Option<Mode> {
            if rest.is_empty() {
                return Some(Mode::Inquiry);
            }
            rest.strip_prefix('-')?.parse().ok()
        }

        if let Some(rest) = name.strip_prefix(CHAT_PREFIX) {
            mode_suffix(rest).map(Function::Chat)
        } else if let Some(rest) = name.strip_prefix(REVIEW_PREFIX) {
            mode_suffix(rest).map(Function::Review)
        } else {
            None
        }
    }
}

/// Handler error rendered as `{"error": "..."}` with a 500 status.
struct RelayError(anyhow::Error);

impl<E> From<E> for RelayError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        error!("Relay function failed: {:?}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

pub fn router(config: RelayConfig) -> anyhow::Result<Router> {
    let prompts = PromptRenderer::new().context("Failed to initialize prompt templates")?;
    let state = RelayState {
        client: Client::new(),
        config: Arc::new(config),
        prompts: Arc::new(prompts),
    };

    Ok(Router::new()
        .route("/functions/v1/:function", post(function_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}

async fn function_handler(
    State(state): State<RelayState>,
    Path(function): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Response, RelayError> {
    match Function::parse(&function) {
        Some(Function::Chat(mode)) => {
            let payload: ChatPayload =
                serde_json::from_value(payload).context("Invalid chat request body")?;
            chat(state, mode, payload).await
        }
        Some(Function::Review(mode)) => {
            let payload: ReviewPayload =
                serde_json::from_value(payload).context("Invalid review request body")?;
            review(state, mode, payload).await
        }
        None => {
            warn!(%function, "Unknown function requested");
            Ok((
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown function '{}'", function) })),
            )
                .into_response())
        }
    }
}

async fn chat(state: RelayState, mode: Mode, payload: ChatPayload) -> Result<Response, RelayError> {
    info!(
        %mode,
        session_id = ?payload.session_id,
        message_len = payload.message.len(),
        history_len = payload.history.len(),
        "Chat function called"
    );

    let system_prompt = state
        .prompts
        .chat(mode, &payload.history, &payload.message)?;
    let request_body = json!({
        "model": state.config.model,
        "messages": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": payload.message },
        ],
        "stream": true,
        "max_tokens": CHAT_MAX_TOKENS,
        "temperature": TEMPERATURE,
    });

    let response = state
        .client
        .post(state.config.completions_url())
        .bearer_auth(&state.config.api_key)
        .json(&request_body)
        .send()
        .await
        .context("Failed to reach completion API")?;

    let status = response.status();
    debug!(%status, "Completion API responded");
    if !status.is_success() {
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        return Err(anyhow!("Completion API error {}: {}", status, error_body).into());
    }

    let body = Body::from_stream(relay_text(response.bytes_stream()));
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

/// Turn an upstream event stream into plain reply text. Ends at `[DONE]`
/// or when the upstream closes; an upstream read error ends the body with
/// the truncation notice.
pub fn relay_text<S, E>(upstream: S) -> impl Stream<Item = Result<String, Infallible>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    struct Relay<S> {
        upstream: std::pin::Pin<Box<S>>,
        parser: SseTextParser,
        chunks: usize,
    }

    let relay = Relay {
        upstream: Box::pin(upstream),
        parser: SseTextParser::new(),
        chunks: 0,
    };

    stream::unfold(Some(relay), |relay| async move {
        let Some(mut relay) = relay else {
            return None;
        };
        loop {
            match relay.upstream.next().await {
                Some(Ok(bytes)) => {
                    relay.chunks += 1;
                    let (text, done) = collect_text(relay.parser.push(&bytes));
                    if done {
                        debug!(chunks = relay.chunks, "Upstream stream marked as done");
                        return (!text.is_empty()).then(|| (Ok(text), None));
                    }
                    if !text.is_empty() {
                        return Some((Ok(text), Some(relay)));
                    }
                }
                Some(Err(e)) => {
                    error!("Upstream stream error: {}", e);
                    return Some((Ok(TRUNCATION_NOTICE.to_string()), None));
                }
                None => {
                    debug!(chunks = relay.chunks, "Upstream stream closed");
                    let (text, _) = collect_text(relay.parser.finish());
                    return (!text.is_empty()).then(|| (Ok(text), None));
                }
            }
        }
    })
}

async fn review(state: RelayState, mode: Mode, payload: ReviewPayload) -> Result<Response, RelayError> {
    info!(
        %mode,
        session_id = ?payload.session_id,
        messages = payload.messages.len(),
        "Review function called"
    );

    let (system_prompt, user_prompt) = state.prompts.review(mode, &payload.messages)?;
    let request_body = json!({
        "model": state.config.model,
        "messages": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": user_prompt },
        ],
        "max_tokens": REVIEW_MAX_TOKENS,
        "temperature": TEMPERATURE,
    });

    let response = state
        .client
        .post(state.config.completions_url())
        .bearer_auth(&state.config.api_key)
        .json(&request_body)
        .send()
        .await
        .context("Failed to reach completion API")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("Completion API error: {}", status).into());
    }

    let completion = response
        .json::<CompletionResponse>()
        .await
        .context("Failed to parse completion response")?;
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    let review = Review::from_markdown(&content);
    Ok(Json(review.to_json()).into_response())
}

pub async fn start_relay_server(port: u16, config: RelayConfig) -> anyhow::Result<()> {
    let app = router(config)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Relay listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Relay server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_names() {
        assert_eq!(
            Function::parse("generate-chat-response-kids"),
            Some(Function::Chat(Mode::Kids))
        );
        assert_eq!(
            Function::parse("generate-review-story"),
            Some(Function::Review(Mode::Story))
        );
        assert_eq!(
            Function::parse("generate-chat-response"),
            Some(Function::Chat(Mode::Inquiry))
        );
        assert_eq!(Function::parse("generate-chat-response-unknown"), None);
        assert_eq!(Function::parse("generate-chat-responsekids"), None);
        assert_eq!(Function::parse("delete-everything"), None);
    }

    #[tokio::test]
    async fn test_relay_text_stops_at_done() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n")),
            Ok(Bytes::from("data: [DONE]\n")),
            Ok(Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n")),
        ];
        let out: Vec<String> = relay_text(stream::iter(parts))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out.concat(), "Hi");
    }

    #[tokio::test]
    async fn test_relay_text_appends_notice_on_upstream_error() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"Par\"}}]}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let out: Vec<String> = relay_text(stream::iter(parts))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out.concat(), format!("Par{}", TRUNCATION_NOTICE));
    }
}
