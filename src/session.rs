use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::STORE_KEY;
use crate::modes::Mode;
use crate::persistence::{MemoryPersistence, Persistence};
use crate::review::Review;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A pinned annotation on (part of) a message. `message_id` is not checked
/// against the message list; notes outlive the session they were made in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub message_id: String,
    pub original_text: String,
    pub user_note: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// The part of the store that is mirrored to persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub current_session_id: Option<String>,
    pub current_mode_id: Option<Mode>,
    pub messages: Vec<Message>,
    pub memo_notes: Vec<Note>,
    pub show_review: bool,
    pub current_review: Option<Review>,
}

/// State of the active conversation plus pinned notes and UI flags.
///
/// Every mutation is synchronous and is followed by a write of the
/// persisted fields through the injected [`Persistence`] port.
pub struct SessionStore {
    state: PersistedState,
    is_loading: bool,
    is_streaming: bool,
    /// Session the in-flight request was started under; owns the flags.
    request_session: Option<String>,
    persistence: Arc<dyn Persistence>,
}

/// Store handle shared between the UI and the orchestrator. Lock it only
/// between awaits.
pub type SharedStore = Arc<Mutex<SessionStore>>;

pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, SessionStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn generate_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().timestamp_millis(), &suffix[..9])
}

pub fn generate_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", Utc::now().timestamp_millis(), &suffix[..6])
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

impl SessionStore {
    /// Open the store, rehydrating from whatever `persistence` holds.
    /// A missing or unreadable snapshot starts an empty store.
    pub fn open(persistence: Arc<dyn Persistence>) -> Self {
        let state = match persistence.load(STORE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => {
                    debug!(
                        messages = state.messages.len(),
                        notes = state.memo_notes.len(),
                        "Rehydrated session store"
                    );
                    state
                }
                Err(e) => {
                    warn!("Discarding unreadable session snapshot: {}", e);
                    PersistedState::default()
                }
            },
            Ok(None) => PersistedState::default(),
            Err(e) => {
                warn!("Failed to load session snapshot: {}", e);
                PersistedState::default()
            }
        };

        Self {
            state,
            is_loading: false,
            is_streaming: false,
            request_session: None,
            persistence,
        }
    }

    pub fn in_memory() -> Self {
        Self::open(Arc::new(MemoryPersistence::new()))
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn session_id(&self) -> Option<&str> {
        self.state.current_session_id.as_deref()
    }

    pub fn mode(&self) -> Option<Mode> {
        self.state.current_mode_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.state.messages.last()
    }

    pub fn notes(&self) -> &[Note] {
        &self.state.memo_notes
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    pub fn show_review(&self) -> bool {
        self.state.show_review
    }

    pub fn review(&self) -> Option<&Review> {
        self.state.current_review.as_ref()
    }

    pub fn snapshot(&self) -> &PersistedState {
        &self.state
    }

    /// Replace the session identity. Messages and notes are left alone.
    pub fn set_session(&mut self, session_id: impl Into<String>, mode: Mode) {
        let session_id = session_id.into();
        if self.session_id() != Some(session_id.as_str()) {
            self.release_request();
        }
        self.state.current_session_id = Some(session_id);
        self.state.current_mode_id = Some(mode);
        self.persist();
    }

    /// Begin a fresh session in `mode`: new identity, empty message list.
    pub fn start_session(&mut self, mode: Mode) -> String {
        let session_id = generate_session_id();
        self.set_session(session_id.clone(), mode);
        self.clear_messages();
        debug!(%session_id, %mode, "Started session");
        session_id
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> String {
        let id = generate_id();
        self.state.messages.push(Message {
            id: id.clone(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
        self.persist();
        id
    }

    /// Replace the content of the last message if it is an assistant
    /// message. Returns whether anything changed.
    pub fn update_last_message(&mut self, content: impl Into<String>) -> bool {
        match self.state.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                last.content = content.into();
                // Partial replies are persisted once, when the request ends.
                if self.request_session.is_none() {
                    self.persist();
                }
                true
            }
            _ => false,
        }
    }

    /// Like [`update_last_message`](Self::update_last_message), but only while
    /// `session_id` is still the current session. Late writes from a stream
    /// started under an older session are dropped.
    pub fn update_last_message_for(&mut self, session_id: &str, content: impl Into<String>) -> bool {
        if self.session_id() != Some(session_id) {
            debug!(
                stream_session = session_id,
                current_session = ?self.session_id(),
                "Dropping update from stale stream"
            );
            return false;
        }
        self.update_last_message(content)
    }

    pub fn clear_messages(&mut self) {
        self.state.messages.clear();
        self.persist();
    }

    pub fn add_note(
        &mut self,
        message_id: impl Into<String>,
        original_text: impl Into<String>,
        user_note: impl Into<String>,
        tags: Vec<String>,
    ) -> String {
        let id = generate_id();
        self.state.memo_notes.push(Note {
            id: id.clone(),
            message_id: message_id.into(),
            original_text: original_text.into(),
            user_note: user_note.into(),
            tags: normalize_tags(tags),
            created_at: Utc::now(),
        });
        self.persist();
        id
    }

    pub fn update_note(&mut self, id: &str, user_note: impl Into<String>, tags: Vec<String>) -> bool {
        let Some(note) = self.state.memo_notes.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        note.user_note = user_note.into();
        note.tags = normalize_tags(tags);
        self.persist();
        true
    }

    pub fn delete_note(&mut self, id: &str) -> bool {
        let before = self.state.memo_notes.len();
        self.state.memo_notes.retain(|n| n.id != id);
        let removed = self.state.memo_notes.len() != before;
        if removed {
            self.persist();
        }
        removed
    }

    /// Claim the loading/streaming flags for a request started under
    /// `session_id`.
    pub(crate) fn begin_request(&mut self, session_id: &str) {
        self.request_session = Some(session_id.to_string());
        self.is_loading = true;
        self.is_streaming = true;
    }

    /// Release the flags if the request for `session_id` still holds them.
    /// A request whose session was replaced has already lost its claim.
    pub(crate) fn finish_request(&mut self, session_id: &str) -> bool {
        if self.request_session.as_deref() != Some(session_id) {
            debug!(request_session = session_id, "Request no longer owns the flags");
            return false;
        }
        self.release_request();
        self.persist();
        true
    }

    fn release_request(&mut self) {
        if let Some(session_id) = self.request_session.take() {
            debug!(%session_id, "Released request flags");
        }
        self.is_loading = false;
        self.is_streaming = false;
    }

    pub fn toggle_review(&mut self) {
        self.state.show_review = !self.state.show_review;
        self.persist();
    }

    pub fn set_review(&mut self, review: Option<Review>) {
        self.state.current_review = review;
        self.persist();
    }

    /// Drop the session, its messages and review state. Notes are kept.
    pub fn reset_session(&mut self) {
        self.state.current_session_id = None;
        self.state.current_mode_id = None;
        self.state.messages.clear();
        self.state.show_review = false;
        self.state.current_review = None;
        self.release_request();
        self.persist();
    }

    fn persist(&self) {
        let raw = match serde_json::to_string(&self.state) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize session state: {}", e);
                return;
            }
        };
        if let Err(e) = self.persistence.save(STORE_KEY, &raw) {
            warn!("Failed to persist session state: {}", e);
        }
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &self.state)
            .field("is_loading", &self.is_loading)
            .field("is_streaming", &self.is_streaming)
            .field("request_session", &self.request_session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ReflectorError, Result};

    struct FailingPersistence;

    impl Persistence for FailingPersistence {
        fn load(&self, _key: &str) -> Result<Option<String>> {
            Ok(Some("not json".to_string()))
        }

        fn save(&self, _key: &str, _value: &str) -> Result<()> {
            Err(ReflectorError::Persistence(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    #[derive(Default)]
    struct CountingPersistence {
        saved: Mutex<Vec<String>>,
    }

    impl CountingPersistence {
        fn saves(&self) -> usize {
            self.saved.lock().unwrap().len()
        }

        fn last(&self) -> Option<String> {
            self.saved.lock().unwrap().last().cloned()
        }
    }

    impl Persistence for CountingPersistence {
        fn load(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn save(&self, _key: &str, value: &str) -> Result<()> {
            self.saved.lock().unwrap().push(value.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_update_last_message_ignores_user_message() {
        let mut store = SessionStore::in_memory();
        store.add_message(Role::User, "x");
        let before = store.messages().to_vec();

        assert!(!store.update_last_message("overwritten"));
        assert_eq!(store.messages(), before.as_slice());
    }

    #[test]
    fn test_update_last_message_on_empty_store() {
        let mut store = SessionStore::in_memory();
        assert!(!store.update_last_message("nothing to update"));
        assert!(store.messages().is_empty());
    }

    #[test]
    fn test_update_last_message_replaces_assistant_content() {
        let mut store = SessionStore::in_memory();
        store.add_message(Role::User, "Hi");
        store.add_message(Role::Assistant, "");
        assert!(store.update_last_message("Hel"));
        assert!(store.update_last_message("Hello"));
        assert_eq!(store.last_message().unwrap().content, "Hello");
        assert_eq!(store.messages()[0].content, "Hi");
    }

    #[test]
    fn test_message_ids_are_unique() {
        let mut store = SessionStore::in_memory();
        let a = store.add_message(Role::User, "a");
        let b = store.add_message(Role::User, "b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_switch_keeps_notes() {
        let mut store = SessionStore::in_memory();
        store.set_session("s1", Mode::Inquiry);
        let m1 = store.add_message(Role::User, "m1");
        store.add_message(Role::Assistant, "m2");
        store.add_note(&m1, "m1", "remember", vec!["idea".into()]);
        let notes_before = store.notes().to_vec();

        store.set_session("s2", Mode::Emotion);
        store.clear_messages();

        assert!(store.messages().is_empty());
        assert_eq!(store.notes(), notes_before.as_slice());
        assert_eq!(store.session_id(), Some("s2"));
        assert_eq!(store.mode(), Some(Mode::Emotion));
    }

    #[test]
    fn test_stale_session_update_dropped() {
        let mut store = SessionStore::in_memory();
        store.set_session("old", Mode::Kids);
        store.add_message(Role::Assistant, "");

        store.start_session(Mode::Story);
        store.add_message(Role::Assistant, "welcome");

        assert!(!store.update_last_message_for("old", "late tokens"));
        assert_eq!(store.last_message().unwrap().content, "welcome");
    }

    #[test]
    fn test_note_crud() {
        let mut store = SessionStore::in_memory();
        let id = store.add_note(
            "msg-1",
            "quote",
            "first",
            vec!["a".into(), " a ".into(), "".into(), "b".into()],
        );
        assert_eq!(store.notes()[0].tags, vec!["a".to_string(), "b".to_string()]);

        assert!(store.update_note(&id, "second", vec!["c".into()]));
        assert_eq!(store.notes()[0].user_note, "second");
        assert_eq!(store.notes()[0].tags, vec!["c".to_string()]);
        assert!(!store.update_note("missing", "x", vec![]));

        assert!(store.delete_note(&id));
        assert!(!store.delete_note(&id));
        assert!(store.notes().is_empty());
    }

    #[test]
    fn test_reset_session_keeps_notes() {
        let mut store = SessionStore::in_memory();
        store.set_session("s", Mode::Goal);
        store.add_message(Role::User, "u");
        store.add_note("m", "t", "n", vec![]);
        store.toggle_review();
        store.begin_request("s");

        store.reset_session();

        assert!(store.session_id().is_none());
        assert!(store.messages().is_empty());
        assert!(!store.show_review());
        assert!(!store.is_loading());
        assert!(!store.is_streaming());
        assert_eq!(store.notes().len(), 1);
        assert!(!store.finish_request("s"));
    }

    #[test]
    fn test_new_session_takes_flags_from_old_request() {
        let mut store = SessionStore::in_memory();
        let old = store.start_session(Mode::Inquiry);
        store.begin_request(&old);
        assert!(store.is_loading());

        let new = store.start_session(Mode::Kids);
        assert!(!store.is_loading());
        store.begin_request(&new);

        // The old request ending must not release the new one.
        assert!(!store.finish_request(&old));
        assert!(store.is_loading());
        assert!(store.is_streaming());

        assert!(store.finish_request(&new));
        assert!(!store.is_loading());
        assert!(!store.is_streaming());
    }

    #[test]
    fn test_same_session_keeps_request_claim() {
        let mut store = SessionStore::in_memory();
        store.set_session("s", Mode::Goal);
        store.begin_request("s");
        store.set_session("s", Mode::Goal);
        assert!(store.is_loading());
        assert!(store.finish_request("s"));
    }

    #[test]
    fn test_streaming_updates_persist_once_at_request_end() {
        let persistence = Arc::new(CountingPersistence::default());
        let mut store = SessionStore::open(persistence.clone());
        store.set_session("s", Mode::Story);
        store.add_message(Role::Assistant, "");
        store.begin_request("s");
        let before = persistence.saves();

        for partial in ["Once", "Once upon", "Once upon a time"] {
            assert!(store.update_last_message_for("s", partial));
        }
        assert_eq!(persistence.saves(), before);

        assert!(store.finish_request("s"));
        assert_eq!(persistence.saves(), before + 1);
        let saved = persistence.last().unwrap();
        assert!(saved.contains("Once upon a time"));
    }

    #[test]
    fn test_persistence_failures_do_not_block_mutations() {
        let mut store = SessionStore::open(Arc::new(FailingPersistence));
        assert!(store.messages().is_empty());
        store.add_message(Role::Assistant, "");
        assert!(store.update_last_message("still works"));
        assert_eq!(store.last_message().unwrap().content, "still works");
    }

    #[test]
    fn test_rehydrates_from_persistence() {
        let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
        {
            let mut store = SessionStore::open(persistence.clone());
            store.set_session("s1", Mode::Document);
            store.add_message(Role::User, "hello");
            store.add_note("m", "t", "n", vec!["x".into()]);
            store.begin_request("s1");
        }

        let store = SessionStore::open(persistence);
        assert_eq!(store.session_id(), Some("s1"));
        assert_eq!(store.mode(), Some(Mode::Document));
        assert_eq!(store.messages()[0].content, "hello");
        assert_eq!(store.notes()[0].tags, vec!["x".to_string()]);
        assert!(!store.is_loading());
    }
}
