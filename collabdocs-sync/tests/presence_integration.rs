//! Presence over a real relay: cursors, typing indicators, identity changes.

mod common;

use collabdocs_sync::{color_for_name, CursorRange, Edit, SessionEvent};
use common::{eventually, join, wait_for, Relay};
use uuid::Uuid;

#[tokio::test]
async fn test_cursor_and_typing_reach_peer() {
    let relay = Relay::start().await;
    let doc_id = Uuid::new_v4();

    let (alice, mut alice_events) = join(&relay, doc_id, "Alice");
    let (bob, mut bob_events) = join(&relay, doc_id, "Bob");
    wait_for(&mut alice_events, SessionEvent::Connected).await;
    wait_for(&mut bob_events, SessionEvent::Connected).await;

    alice.select(CursorRange::new(3, 7)).unwrap();
    wait_for(&mut bob_events, SessionEvent::PresenceChanged).await;

    let typing = bob.typing_collaborators().await.unwrap();
    assert_eq!(typing.len(), 1);
    assert_eq!(typing[0].name, "Alice");
    assert_eq!(typing[0].cursor, Some(CursorRange::new(3, 7)));
    assert_eq!(typing[0].color, color_for_name("Alice"));

    let names: Vec<_> = bob
        .collaborators()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.name, c.is_local))
        .collect();
    assert_eq!(
        names,
        vec![("Alice".to_string(), false), ("Bob".to_string(), true)]
    );
}

#[tokio::test]
async fn test_typing_clears_after_idle() {
    let relay = Relay::start().await;
    let doc_id = Uuid::new_v4();

    let (alice, mut alice_events) = join(&relay, doc_id, "Alice");
    let (bob, mut bob_events) = join(&relay, doc_id, "Bob");
    wait_for(&mut alice_events, SessionEvent::Connected).await;
    wait_for(&mut bob_events, SessionEvent::Connected).await;

    alice.edit(Edit::insert(0, "hi")).unwrap();
    eventually(|| async { !bob.typing_collaborators().await.unwrap().is_empty() }).await;

    // The idle follow-up flips Alice back to not typing.
    eventually(|| async { bob.typing_collaborators().await.unwrap().is_empty() }).await;
    let alice_seen = bob
        .collaborators()
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.name == "Alice")
        .expect("Alice still visible");
    assert!(!alice_seen.is_typing);
    assert_eq!(alice_seen.cursor, Some(CursorRange::caret(2)));
}

#[tokio::test]
async fn test_alone_shows_only_self() {
    let relay = Relay::start().await;
    let (alice, mut events) = join(&relay, Uuid::new_v4(), "Alice");
    wait_for(&mut events, SessionEvent::Connected).await;

    let visible = alice.collaborators().await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].name, "Alice");
    assert!(visible[0].is_local);
    assert!(alice.typing_collaborators().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_identity_change_reconnects_under_new_name() {
    let relay = Relay::start().await;
    let doc_id = Uuid::new_v4();

    let (alice, mut alice_events) = join(&relay, doc_id, "Alice");
    let (bob, mut bob_events) = join(&relay, doc_id, "Bob");
    wait_for(&mut alice_events, SessionEvent::Connected).await;
    wait_for(&mut bob_events, SessionEvent::Connected).await;

    alice.set_identity("Alicia").unwrap();
    wait_for(&mut alice_events, SessionEvent::Connected).await;
    assert_eq!(
        alice.status().await.unwrap().identity.as_deref(),
        Some("Alicia")
    );

    alice.select(CursorRange::caret(0)).unwrap();
    eventually(|| async {
        bob.collaborators()
            .await
            .unwrap()
            .iter()
            .any(|c| c.name == "Alicia")
    })
    .await;
}
