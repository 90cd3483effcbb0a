use serde::Deserialize;
use tracing::debug;

use crate::decoder::Utf8StreamDecoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Text(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Unwraps an OpenAI-style `data: {...}` event stream into reply text.
///
/// Network chunks do not respect line boundaries, so incomplete lines are
/// buffered until their newline arrives.
#[derive(Default)]
pub struct SseTextParser {
    decoder: Utf8StreamDecoder,
    line: String,
    done: bool,
}

impl SseTextParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        let text = self.decoder.feed(bytes);
        self.line.push_str(&text);

        let mut events = Vec::new();
        while let Some(pos) = self.line.find('\n') {
            let line: String = self.line.drain(..=pos).collect();
            if let Some(event) = self.parse_line(&line) {
                events.push(event);
                if self.done {
                    self.line.clear();
                    break;
                }
            }
        }
        events
    }

    /// Process a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        let tail = std::mem::take(&mut self.decoder).finish();
        self.line.push_str(&tail);
        let line = std::mem::take(&mut self.line);
        self.parse_line(&line).into_iter().collect()
    }

    fn parse_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.trim_end_matches(['\n', '\r']);
        let data = line.strip_prefix("data:")?.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return Some(SseEvent::Done);
        }

        match serde_json::from_str::<CompletionChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|content| !content.is_empty())
                .map(SseEvent::Text),
            Err(e) => {
                debug!("Skipping malformed event payload: {}", e);
                None
            }
        }
    }
}

/// Concatenate text events, reporting whether `[DONE]` was among them.
pub fn collect_text(events: Vec<SseEvent>) -> (String, bool) {
    let mut text = String::new();
    for event in events {
        match event {
            SseEvent::Text(t) => text.push_str(&t),
            SseEvent::Done => return (text, true),
        }
    }
    (text, false)
}
