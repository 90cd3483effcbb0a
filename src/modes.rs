use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReflectorError;

/// Conversational persona. Selects UI copy on the client and the prompt
/// template on the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Inquiry,
    Emotion,
    Structure,
    Document,
    Creative,
    Reflection,
    Kids,
    Goal,
    Story,
}

impl Mode {
    pub const ALL: [Mode; 9] = [
        Mode::Inquiry,
        Mode::Emotion,
        Mode::Structure,
        Mode::Document,
        Mode::Creative,
        Mode::Reflection,
        Mode::Kids,
        Mode::Goal,
        Mode::Story,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Mode::Inquiry => "inquiry",
            Mode::Emotion => "emotion",
            Mode::Structure => "structure",
            Mode::Document => "document",
            Mode::Creative => "creative",
            Mode::Reflection => "reflection",
            Mode::Kids => "kids",
            Mode::Goal => "goal",
            Mode::Story => "story",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Mode::Inquiry => "Inquiry",
            Mode::Emotion => "Emotion Reflect",
            Mode::Structure => "Thought Structuring",
            Mode::Document => "Document",
            Mode::Creative => "Creative",
            Mode::Reflection => "Reflection",
            Mode::Kids => "Kids",
            Mode::Goal => "Goal",
            Mode::Story => "Story",
        }
    }

    /// Function name of the streaming chat endpoint for this mode.
    pub fn chat_endpoint(&self) -> String {
        format!("generate-chat-response-{}", self.id())
    }

    pub fn review_endpoint(&self) -> String {
        format!("generate-review-{}", self.id())
    }

    /// Greeting shown as the first assistant message of a fresh session.
    pub fn welcome_message(&self) -> &'static str {
        match self {
            Mode::Inquiry => "Hi! I'm Reflector in Inquiry mode. Let's dig into your question and take your thinking one level deeper. What would you like to explore?",
            Mode::Emotion => "Hi! I'm Reflector in Emotion Reflect mode. I'm here to stay close to how you feel and support your reflection. What's on your mind?",
            Mode::Structure => "Hi! I'm Reflector in Thought Structuring mode. Let's turn scattered thoughts into a clear structure. What would you like to organize?",
            Mode::Document => "Hi! I'm Reflector in Document mode. Let's understand your material deeply through focused questions. Which document would you like to discuss?",
            Mode::Creative => "Hi! I'm Reflector in Creative mode. I'll help you generate and stretch ideas. What creative challenge are you working on?",
            Mode::Reflection => "Hi! I'm Reflector in Reflection mode. Let's find meaning and insight in past experiences. What would you like to look back on?",
            Mode::Kids => "Hi! I'm Reflector in Kids mode. Let's learn and have fun together. What do you want to talk about? 😊",
            Mode::Goal => "Hi! I'm Reflector in Goal mode. I'll help you plan your learning and follow through. What goal do you have?",
            Mode::Story => "Hi! I'm Reflector in Story mode. Let's weave your experiences into a story. What story would you like to tell?",
        }
    }

    /// Persona instructions used by the relay as the system prompt.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Mode::Inquiry => "You are Reflector, an inquiry partner. Help the user sharpen their question and think one level deeper. End with one question for the user.",
            Mode::Emotion => "You are Reflector, an empathetic listener. Reflect the user's feelings back gently and support introspection. End with one question for the user.",
            Mode::Structure => "You are Reflector, a thinking organizer. Turn the user's scattered thoughts into a clear structure. End with one question for the user.",
            Mode::Document => "You are Reflector, a reading companion. Help the user understand their material and ask related questions. End with one question for the user.",
            Mode::Creative => "You are Reflector, a creative partner. Generate and expand ideas with the user. End with one question for the user.",
            Mode::Reflection => "You are Reflector, a reflection coach. Help the user draw meaning and lessons from past events. End with one question for the user.",
            Mode::Kids => "You are Reflector for Kids, a friendly AI that grows children's curiosity. Praise first, explain simply in short sentences, ask two fun questions and suggest something to try next.",
            Mode::Goal => "You are Reflector, a learning planner. Help the user set goals and plan concrete next steps. End with one question for the user.",
            Mode::Story => "You are Reflector, a narrative guide. Help the user shape their experiences into a story. End with one question for the user.",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Mode {
    type Err = ReflectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Mode::ALL
            .iter()
            .copied()
            .find(|m| m.id() == wanted)
            .ok_or_else(|| ReflectorError::UnknownMode(s.to_string()))
    }
}
