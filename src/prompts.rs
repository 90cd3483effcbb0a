use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::modes::Mode;
use crate::session::Role;

const CHAT_TEMPLATE: &str = "{{ system_prompt }}

Conversation so far:
{% for entry in history %}{% if entry.role == \"user\" %}User{% else %}Reflector{% endif %}: {{ entry.content }}
{% endfor %}
Current user message: {{ message }}

Respond as Reflector, taking the conversation so far and the current message into account.";

const REVIEW_SYSTEM_TEMPLATE: &str = "You are Reflector, a dialogue analysis partner. The conversation below took place in {{ mode_name }} mode.
Analyse it and write a review with exactly these three sections:

## 1. Insights
Key realisations, shifts in the user's thinking, new perspectives.

## 2. Summary
The overall picture, main themes and what was achieved.

## 3. Deep Dive
Directions worth exploring further and suggested next steps.

Keep each section to roughly 100-150 words.";

const REVIEW_USER_TEMPLATE: &str = "Analyse the following conversation and write the review:

{% for entry in messages %}{% if entry.role == \"user\" %}User{% else %}Reflector{% endif %}: {{ entry.content }}

{% endfor %}";

/// One turn of conversation history as the relay receives it. Extra fields
/// sent by the client (ids, timestamps) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Renders relay prompts from the built-in templates.
pub struct PromptRenderer {
    env: Environment<'static>,
}

impl PromptRenderer {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("chat", CHAT_TEMPLATE)?;
        env.add_template("review_system", REVIEW_SYSTEM_TEMPLATE)?;
        env.add_template("review_user", REVIEW_USER_TEMPLATE)?;
        Ok(Self { env })
    }

    /// System prompt for a chat turn: persona, formatted history and the
    /// current message.
    pub fn chat(&self, mode: Mode, history: &[HistoryEntry], message: &str) -> Result<String> {
        let rendered = self.env.get_template("chat")?.render(context! {
            system_prompt => mode.system_prompt(),
            history => history,
            message => message,
        })?;
        Ok(rendered)
    }

    /// `(system, user)` prompts for a review.
    pub fn review(&self, mode: Mode, messages: &[HistoryEntry]) -> Result<(String, String)> {
        let system = self
            .env
            .get_template("review_system")?
            .render(context! { mode_name => mode.display_name() })?;
        let user = self
            .env
            .get_template("review_user")?
            .render(context! { messages => messages })?;
        Ok((system, user))
    }
}
