use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reflector::constants::TRUNCATION_NOTICE;
use reflector::persistence::FilePersistence;
use reflector::session::lock_store;
use reflector::stream_consumer::SessionSink;
use reflector::{Mode, Role, SessionStore, StreamConsumer, StreamOutcome};
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Chunks `["He", "llo", "!"]` arriving back to back end up as one message.
#[tokio::test]
async fn test_chunks_land_in_placeholder() {
    let store = SessionStore::in_memory().into_shared();
    let session_id = {
        let mut s = lock_store(&store);
        let id = s.start_session(Mode::Kids);
        s.add_message(Role::User, "Hello");
        s.add_message(Role::Assistant, "");
        id
    };

    let chunks: Vec<Result<&'static [u8], io::Error>> =
        vec![Ok(b"He".as_slice()), Ok(b"llo".as_slice()), Ok(b"!".as_slice())];
    let mut sink = SessionSink::new(store.clone(), session_id);
    let report = StreamConsumer::default()
        .consume(stream::iter(chunks), &mut sink)
        .await;

    assert_eq!(report.outcome, StreamOutcome::Completed);
    assert_eq!(report.writes, 1);
    let s = lock_store(&store);
    assert_eq!(s.messages().len(), 2);
    assert_eq!(s.messages()[1].content, "Hello!");
}

/// A stream still running when the user switches mode must not write into
/// the new session's welcome message.
#[tokio::test(start_paused = true)]
async fn test_stale_stream_cannot_touch_new_session() {
    let store = SessionStore::in_memory().into_shared();
    let old_session = {
        let mut s = lock_store(&store);
        let id = s.start_session(Mode::Inquiry);
        s.add_message(Role::User, "tell me a lot");
        s.add_message(Role::Assistant, "");
        id
    };

    let (switched_tx, switched_rx) = oneshot::channel::<()>();
    let first = stream::once(async { Ok::<_, io::Error>(b"early ".to_vec()) });
    let rest = stream::once(async move {
        let _ = switched_rx.await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, io::Error>(b"late".to_vec())
    });
    let body = first.chain(rest);

    let consumer_store = store.clone();
    let consumer = tokio::spawn(async move {
        let mut sink = SessionSink::new(consumer_store, old_session);
        StreamConsumer::default().consume(body, &mut sink).await
    });

    tokio::task::yield_now().await;
    {
        let mut s = lock_store(&store);
        s.start_session(Mode::Story);
        s.add_message(Role::Assistant, Mode::Story.welcome_message());
    }
    switched_tx.send(()).unwrap();

    let report = consumer.await.unwrap();
    assert_eq!(report.content, "early late");

    let s = lock_store(&store);
    assert_eq!(s.mode(), Some(Mode::Story));
    assert_eq!(s.messages().len(), 1);
    assert_eq!(s.messages()[0].content, Mode::Story.welcome_message());
}

#[tokio::test]
async fn test_truncated_reply_is_kept_with_notice() {
    let store = SessionStore::in_memory().into_shared();
    let session_id = {
        let mut s = lock_store(&store);
        let id = s.start_session(Mode::Document);
        s.add_message(Role::Assistant, "");
        id
    };

    let items: Vec<Result<Vec<u8>, io::Error>> = vec![
        Ok("部分的な".as_bytes().to_vec()),
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")),
    ];
    let mut sink = SessionSink::new(store.clone(), session_id);
    let report = StreamConsumer::default()
        .consume(stream::iter(items), &mut sink)
        .await;

    assert_eq!(report.outcome, StreamOutcome::Truncated);
    assert_eq!(
        lock_store(&store).last_message().unwrap().content,
        format!("部分的な{}", TRUNCATION_NOTICE)
    );
}

#[test]
fn test_session_survives_restart_through_files() {
    let temp_dir = TempDir::new().unwrap();
    let note_id;
    {
        let mut store = SessionStore::open(Arc::new(FilePersistence::new(temp_dir.path())));
        store.start_session(Mode::Goal);
        let message_id = store.add_message(Role::Assistant, "What is your goal?");
        note_id = store.add_note(message_id, "What is your goal?", "answer tomorrow", vec!["todo".into()]);
        store.toggle_review();
    }

    assert!(temp_dir.path().join("learning-agency-chat.json").exists());

    let store = SessionStore::open(Arc::new(FilePersistence::new(temp_dir.path())));
    assert_eq!(store.mode(), Some(Mode::Goal));
    assert_eq!(store.messages()[0].content, "What is your goal?");
    assert_eq!(store.notes()[0].id, note_id);
    assert!(store.show_review());
}

#[test]
fn test_corrupt_snapshot_starts_fresh() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("learning-agency-chat.json"), "{ not json").unwrap();

    let store = SessionStore::open(Arc::new(FilePersistence::new(temp_dir.path())));
    assert!(store.session_id().is_none());
    assert!(store.messages().is_empty());
}
