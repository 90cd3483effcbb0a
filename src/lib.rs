//! Reflector: a multi-mode AI learning chat.
//!
//! The client side streams a reply from a mode-specific chat function into
//! the last assistant message of a [`session::SessionStore`]; the relay side
//! serves those functions on top of an OpenAI-compatible completion API.

pub mod chat;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod modes;
pub mod orchestrator;
pub mod persistence;
pub mod prompts;
pub mod relay;
pub mod review;
pub mod session;
pub mod sse;
pub mod stream_consumer;

pub use error::{ReflectorError, Result};
pub use modes::Mode;
pub use orchestrator::{ClientConfig, Orchestrator, SendOutcome};
pub use session::{Message, Note, Role, SessionStore, SharedStore};
pub use stream_consumer::{MessageSink, StreamConsumer, StreamOutcome};
