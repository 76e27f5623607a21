//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use folio_collab::broadcast::{StoreEvent, Topic};
use folio_collab::store::{ChangeFeed, CommentRepo, MemoryStore, PresenceStore, StoreError};
use folio_core::{
    Comment, CommentId, CommentThread, DocId, Millis, NewComment, NewThread, PresenceRecord,
    ThreadId, ThreadRows, UserId,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

/// A [`MemoryStore`] whose writes can be made to fail or to wait.
///
/// Reads always go straight through.
pub struct ScriptedStore {
    pub inner: Arc<MemoryStore>,
    failures: AtomicUsize,
    gated: AtomicBool,
    gate: Semaphore,
    writes: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MemoryStore::new()),
            failures: AtomicUsize::new(0),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    /// Fail the next `n` writes.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Hold every write until [`release`](Self::release) is called.
    pub fn hold_writes(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let one held write through.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Writes that reached this store, failed or not.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate
                .acquire()
                .await
                .map_err(|e| StoreError::DatabaseError(e.to_string()))?
                .forget();
        }
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::DatabaseError("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CommentRepo for ScriptedStore {
    async fn create_thread(&self, new: NewThread) -> Result<ThreadRows, StoreError> {
        self.enter().await?;
        self.inner.create_thread(new).await
    }

    async fn add_comment(&self, new: NewComment) -> Result<Comment, StoreError> {
        self.enter().await?;
        self.inner.add_comment(new).await
    }

    async fn update_comment(
        &self,
        id: &CommentId,
        editor: &UserId,
        content: String,
        now: Millis,
    ) -> Result<Comment, StoreError> {
        self.enter().await?;
        self.inner.update_comment(id, editor, content, now).await
    }

    async fn delete_comment(&self, id: &CommentId, editor: &UserId, now: Millis) -> Result<Comment, StoreError> {
        self.enter().await?;
        self.inner.delete_comment(id, editor, now).await
    }

    async fn set_thread_resolved(
        &self,
        id: &ThreadId,
        caller: &UserId,
        resolved: bool,
    ) -> Result<CommentThread, StoreError> {
        self.enter().await?;
        self.inner.set_thread_resolved(id, caller, resolved).await
    }

    async fn threads_by_doc(&self, doc_id: &DocId) -> Result<Vec<ThreadRows>, StoreError> {
        self.inner.threads_by_doc(doc_id).await
    }
}

#[async_trait]
impl PresenceStore for ScriptedStore {
    async fn upsert_presence(&self, record: PresenceRecord) -> Result<(), StoreError> {
        self.enter().await?;
        self.inner.upsert_presence(record).await
    }

    async fn presence_by_doc(&self, doc_id: &DocId) -> Result<Vec<PresenceRecord>, StoreError> {
        self.inner.presence_by_doc(doc_id).await
    }

    async fn remove_presence(&self, doc_id: &DocId, user_id: &UserId) -> Result<(), StoreError> {
        self.enter().await?;
        self.inner.remove_presence(doc_id, user_id).await
    }
}

#[async_trait]
impl ChangeFeed for ScriptedStore {
    async fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe(topic).await
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn presence(doc: &str, user: &str, cursor: usize, updated_at: Millis) -> PresenceRecord {
    PresenceRecord {
        doc_id: DocId::from(doc),
        user_id: UserId::from(user),
        name: format!("{user}@example.com"),
        color: "hsl(200 70% 45%)".into(),
        cursor: cursor.to_string(),
        updated_at,
    }
}
