//! End-to-end document sessions over the in-memory backend.
//!
//! Heartbeats are slowed to an hour so the only presence traffic is what
//! each test writes itself.

mod common;

use common::{eventually, presence};
use folio_collab::config::CollabConfig;
use folio_collab::session::{DocumentSession, Services, SessionUser};
use folio_collab::store::PresenceStore;
use folio_core::collab::{Anchor, CommentBody, CommentStore, CreateThreadArgs, Step};
use folio_core::{BlockId, DocId, DocumentId, UserId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn quiet_config() -> CollabConfig {
    CollabConfig {
        heartbeat_interval: Duration::from_secs(3600),
        ..CollabConfig::for_testing()
    }
}

/// A page whose editor document holds one block, `b1` = "Hello world".
async fn seeded_page(services: &Services) -> DocId {
    let page = services
        .page_tree()
        .create(&DocumentId::from("D"), "Notes", None)
        .await
        .unwrap();
    services
        .engine
        .apply_steps(
            &page.doc_id,
            vec![Step::AppendBlock {
                block_id: BlockId::from("b1"),
                text: "Hello world".into(),
            }],
        )
        .await
        .unwrap();
    page.doc_id
}

async fn own_row_written(services: &Services, doc: &DocId, user: &str) {
    eventually("own presence row", || {
        let store = services.presence.clone();
        let doc = doc.clone();
        let user = UserId::from(user);
        async move {
            store
                .presence_by_doc(&doc)
                .await
                .map(|rows| rows.iter().any(|r| r.user_id == user))
                .unwrap_or(false)
        }
    })
    .await;
}

async fn cursor_of(session: &Arc<DocumentSession>, user: &str) -> Option<usize> {
    session
        .cursors()
        .await
        .into_iter()
        .find(|d| d.user_id == UserId::from(user))
        .map(|d| d.pos)
}

#[tokio::test]
async fn test_remote_cursor_follows_local_edits() {
    let services = Services::in_memory(quiet_config());
    let doc = seeded_page(&services).await;
    let bob = Arc::new(
        DocumentSession::open(doc.clone(), SessionUser::new("bob"), &services)
            .await
            .unwrap(),
    );
    own_row_written(&services, &doc, "bob").await;
    assert!(bob.cursors().await.is_empty());

    let carol = presence(doc.as_str(), "carol", 6, folio_core::now_millis());
    services.presence.upsert_presence(carol).await.unwrap();
    eventually("carol's cursor at 6", || {
        let bob = bob.clone();
        async move { cursor_of(&bob, "carol").await == Some(6) }
    })
    .await;

    bob.apply_steps(vec![Step::InsertText {
        pos: 0,
        text: "Big ".into(),
    }])
    .await
    .unwrap();
    eventually("carol's cursor shifted to 10", || {
        let bob = bob.clone();
        async move { cursor_of(&bob, "carol").await == Some(10) }
    })
    .await;

    let decoration = bob.cursors().await.remove(0);
    assert_eq!(decoration.key, "cursor-carol");
    assert_eq!(decoration.name, "carol@example.com");
}

#[tokio::test]
async fn test_peer_leaving_removes_cursor() {
    let services = Services::in_memory(quiet_config());
    let doc = seeded_page(&services).await;
    let bob = Arc::new(
        DocumentSession::open(doc.clone(), SessionUser::new("bob"), &services)
            .await
            .unwrap(),
    );
    let alice = DocumentSession::open(
        doc.clone(),
        SessionUser::new("alice").with_email("alice@example.com"),
        &services,
    )
    .await
    .unwrap();

    eventually("alice's cursor", || {
        let bob = bob.clone();
        async move { cursor_of(&bob, "alice").await.is_some() }
    })
    .await;
    assert_eq!(bob.cursors().await[0].name, "alice@example.com");

    alice.close().await.unwrap();
    eventually("alice's cursor gone", || {
        let bob = bob.clone();
        async move { bob.cursors().await.is_empty() }
    })
    .await;
}

#[tokio::test]
async fn test_threads_reach_other_sessions() {
    let services = Services::in_memory(quiet_config());
    let doc = seeded_page(&services).await;
    let alice = DocumentSession::open(doc.clone(), SessionUser::new("alice"), &services)
        .await
        .unwrap();
    let bob = Arc::new(
        DocumentSession::open(doc.clone(), SessionUser::new("bob"), &services)
            .await
            .unwrap(),
    );

    let view = alice
        .comments()
        .create_thread(CreateThreadArgs {
            anchor_block_id: BlockId::from("b1"),
            body: CommentBody::plain("typo here"),
        })
        .await
        .unwrap();

    eventually("bob sees alice's thread", || {
        let bob = bob.clone();
        let id = view.thread.id.clone();
        async move { bob.comments().thread(&id).await.is_some() }
    })
    .await;
    let seen = bob.comments().thread(&view.thread.id).await.unwrap();
    assert_eq!(seen.root().unwrap().comment.content, "typo here");
    assert_eq!(
        bob.comments().blocks_with_comments().await,
        BTreeSet::from([BlockId::from("b1")])
    );
}

#[tokio::test]
async fn test_anchors_detach_when_block_is_gone() {
    let services = Services::in_memory(quiet_config());
    let doc = seeded_page(&services).await;
    let alice = DocumentSession::open(doc.clone(), SessionUser::new("alice"), &services)
        .await
        .unwrap();

    let kept = alice
        .comments()
        .create_thread(CreateThreadArgs {
            anchor_block_id: BlockId::from("b1"),
            body: CommentBody::plain("on b1"),
        })
        .await
        .unwrap();
    let lost = alice
        .comments()
        .create_thread(CreateThreadArgs {
            anchor_block_id: BlockId::from("b-removed"),
            body: CommentBody::plain("on a block that is gone"),
        })
        .await
        .unwrap();

    let anchors = alice.anchors().await.unwrap();
    assert_eq!(anchors.len(), 2);
    for (id, anchor) in anchors {
        if id == kept.thread.id {
            assert!(matches!(anchor, Anchor::Attached { range, .. } if range == (0..11)));
        } else {
            assert_eq!(id, lost.thread.id);
            assert!(matches!(anchor, Anchor::Unattached));
        }
    }
}
