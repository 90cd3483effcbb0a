// Defaults loaded from the environment (after dotenvy has read .env).
// REFLECTOR_API_URL and REFLECTOR_STATE_DIR are read by the CLI flags.

use std::env;
use std::time::Duration;

lazy_static::lazy_static! {
    /// Bearer credential sent with every client request.
    pub static ref REFLECTOR_API_KEY: String = env::var("REFLECTOR_API_KEY").unwrap_or_default();
    pub static ref OPENAI_API_URL: String = env::var("OPENAI_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    pub static ref OPENAI_API_KEY: String = env::var("OPENAI_API_KEY").unwrap_or_default();
    pub static ref REFLECTOR_MODEL: String = env::var("REFLECTOR_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
}

/// Client-side abort deadline for a chat request.
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Minimum gap between two partial writes of a streaming reply.
pub const STREAM_THROTTLE: Duration = Duration::from_millis(50);

/// Key under which the session store snapshot is persisted.
pub const STORE_KEY: &str = "learning-agency-chat";

pub const TIMEOUT_MESSAGE: &str = "The response timed out. Please try again.";
pub const FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while generating the response. Please try again.";
pub const STREAM_ERROR_MESSAGE: &str =
    "An error occurred while streaming the response. Please try again.";
pub const TRUNCATION_NOTICE: &str = "\n\n[The response was interrupted. Please try again.]";
pub const REVIEW_ERROR_MESSAGE: &str = "Error generating review. Please try again.";

// Relay completion parameters
pub const CHAT_MAX_TOKENS: u32 = 800;
pub const REVIEW_MAX_TOKENS: u32 = 1000;
pub const TEMPERATURE: f32 = 0.7;
