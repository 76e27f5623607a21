use super::{CommentError, ThreadCache, Tracked};
use crate::clock::Clock;
use crate::config::CollabConfig;
use crate::store::{CommentRepo, StoreError};
use async_trait::async_trait;
use folio_core::collab::{
    AddCommentArgs, Anchor, BlockLookup, CommentBody, CommentStore, CommentView, CreateThreadArgs,
    ReplyArgs, SyncStatus, ThreadFilter, ThreadView, UpdateCommentArgs,
};
use folio_core::{
    BlockId, Comment, CommentId, CommentThread, DocId, Millis, NewComment, NewThread, ThreadId,
    ThreadRows, UserId,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The editor's comment store for one document and one signed-in user.
///
/// Every mutation lands in the [`ThreadCache`] first, then goes to the
/// [`CommentRepo`]. The cache lock is released before the remote call and
/// re-taken to settle or revert.
pub struct CommentThreadAdapter {
    doc_id: DocId,
    user_id: UserId,
    repo: Arc<dyn CommentRepo>,
    clock: Arc<dyn Clock>,
    cache: RwLock<ThreadCache>,
}

impl CommentThreadAdapter {
    pub fn new(
        doc_id: DocId,
        user_id: UserId,
        repo: Arc<dyn CommentRepo>,
        clock: Arc<dyn Clock>,
        config: &CollabConfig,
    ) -> Self {
        let cache = ThreadCache::new(doc_id.clone(), config.grace_ms());
        Self {
            doc_id,
            user_id,
            repo,
            clock,
            cache: RwLock::new(cache),
        }
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Re-read every thread of the document and merge it.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let rows = self.repo.threads_by_doc(&self.doc_id).await?;
        self.cache.write().await.merge_remote(rows, self.clock.now());
        Ok(())
    }

    /// A copy of the cache as it is right now.
    pub async fn snapshot(&self) -> ThreadCache {
        self.cache.read().await.clone()
    }

    pub async fn thread(&self, id: &ThreadId) -> Option<ThreadView> {
        self.cache.read().await.thread(id)
    }

    pub async fn threads_for_block(&self, block_id: &BlockId) -> Vec<ThreadView> {
        self.cache.read().await.threads_for_block(block_id)
    }

    pub async fn filtered(&self, filter: ThreadFilter) -> Vec<ThreadView> {
        self.cache.read().await.filtered(filter)
    }

    pub async fn blocks_with_comments(&self) -> BTreeSet<BlockId> {
        self.cache.read().await.blocks_with_comments()
    }

    pub async fn resolve_anchors(&self, doc: &(impl BlockLookup + Sync)) -> Vec<(ThreadId, Anchor)> {
        self.cache.read().await.resolve_anchors(doc)
    }

    /// Editor body for a stored comment.
    pub fn body_of(comment: &Comment) -> CommentBody {
        CommentBody::plain(&comment.content)
    }

    fn pending_comment(
        &self,
        thread: &CommentThread,
        parent: Option<CommentId>,
        content: String,
        now: Millis,
    ) -> Comment {
        Comment {
            id: CommentId::temporary(),
            thread_id: thread.id.clone(),
            doc_id: self.doc_id.clone(),
            block_id: thread.block_id.clone(),
            author_id: self.user_id.clone(),
            content,
            created_at: now,
            updated_at: now,
            deleted: false,
            parent_comment_id: parent,
        }
    }

    /// Send a comment already inserted as pending, then confirm or discard it.
    async fn send_comment(&self, pending: Comment) -> Result<CommentView, CommentError> {
        let result = self
            .repo
            .add_comment(NewComment {
                thread_id: pending.thread_id.clone(),
                author_id: pending.author_id.clone(),
                content: pending.content.clone(),
                created_at: pending.created_at,
                parent_comment_id: pending.parent_comment_id.clone(),
            })
            .await;

        let mut cache = self.cache.write().await;
        match result {
            Ok(row) => {
                cache.confirm_comment(&pending.id, row.clone(), self.clock.now());
                log::debug!("comment {} confirmed as {}", pending.id, row.id);
                Ok(CommentView {
                    comment: row,
                    status: SyncStatus::Synced,
                })
            }
            Err(e) => {
                cache.discard_comment(&pending.id);
                log::warn!("add comment to {} reverted: {e}", pending.thread_id);
                Err(e.into())
            }
        }
    }

    fn check_author(&self, comment: &Comment) -> Result<(), CommentError> {
        if comment.author_id != self.user_id {
            return Err(CommentError::Unauthorized(format!(
                "user {} is not the author of comment {}",
                self.user_id, comment.id
            )));
        }
        Ok(())
    }
}

/// A thread comments can be added to: visible and known to the store.
fn synced_thread(cache: &ThreadCache, id: &ThreadId) -> Result<CommentThread, CommentError> {
    match cache.thread_entry(id) {
        Some(Tracked::Pending { .. }) => Err(CommentError::ThreadNotSynced(id.clone())),
        Some(entry) if entry.is_visible() => Ok(entry.value().clone()),
        _ => Err(CommentError::ThreadNotFound(id.clone())),
    }
}

fn confirmed_view(rows: ThreadRows) -> ThreadView {
    let root_id = rows.root().map(|c| c.id.clone());
    let mut comments: Vec<CommentView> = rows
        .comments
        .into_iter()
        .filter(|c| !c.deleted)
        .map(|comment| CommentView {
            comment,
            status: SyncStatus::Synced,
        })
        .collect();
    comments.sort_by(|a, b| {
        a.comment
            .created_at
            .cmp(&b.comment.created_at)
            .then_with(|| a.comment.id.cmp(&b.comment.id))
    });
    ThreadView {
        thread: rows.thread,
        root_id,
        comments,
        status: SyncStatus::Synced,
    }
}

#[async_trait]
impl CommentStore for CommentThreadAdapter {
    type Error = CommentError;

    async fn set_threads_from_remote(&self, rows: Vec<ThreadRows>) {
        self.cache.write().await.merge_remote(rows, self.clock.now());
    }

    async fn create_thread(&self, args: CreateThreadArgs) -> Result<ThreadView, CommentError> {
        let now = self.clock.now();
        let content = args.body.to_plain_text();
        let thread = CommentThread {
            id: ThreadId::temporary(),
            doc_id: self.doc_id.clone(),
            block_id: args.anchor_block_id.clone(),
            created_at: now,
            resolved: false,
            creator_id: self.user_id.clone(),
        };
        let root = self.pending_comment(&thread, None, content.clone(), now);
        let (temp_thread, temp_root) = (thread.id.clone(), root.id.clone());
        self.cache.write().await.insert_pending_thread(thread, root, now);

        let result = self
            .repo
            .create_thread(NewThread {
                doc_id: self.doc_id.clone(),
                block_id: args.anchor_block_id,
                creator_id: self.user_id.clone(),
                content,
                created_at: now,
            })
            .await;

        let mut cache = self.cache.write().await;
        match result {
            Ok(rows) => {
                let id = rows.thread.id.clone();
                let fallback = rows.clone();
                cache.confirm_thread(&temp_thread, &temp_root, rows, self.clock.now());
                log::debug!("thread {temp_thread} confirmed as {id}");
                Ok(cache.thread(&id).unwrap_or_else(|| confirmed_view(fallback)))
            }
            Err(e) => {
                cache.discard_thread(&temp_thread, &temp_root);
                log::warn!("create thread on {} reverted: {e}", self.doc_id);
                Err(e.into())
            }
        }
    }

    async fn add_comment(&self, args: AddCommentArgs) -> Result<CommentView, CommentError> {
        let now = self.clock.now();
        let pending = {
            let mut cache = self.cache.write().await;
            let thread = synced_thread(&cache, &args.thread_id)?;
            let pending = self.pending_comment(&thread, None, args.body.to_plain_text(), now);
            cache.insert_pending_comment(pending.clone(), now);
            pending
        };
        self.send_comment(pending).await
    }

    async fn reply_to_comment(&self, args: ReplyArgs) -> Result<CommentView, CommentError> {
        let now = self.clock.now();
        let pending = {
            let mut cache = self.cache.write().await;
            let thread_id = match cache.comment_entry(&args.parent_comment_id) {
                Some(Tracked::Pending { .. }) => {
                    return Err(CommentError::CommentNotSynced(args.parent_comment_id));
                }
                Some(entry) if entry.is_visible() => entry.value().thread_id.clone(),
                _ => return Err(CommentError::CommentNotFound(args.parent_comment_id)),
            };
            let thread = synced_thread(&cache, &thread_id)?;
            let pending = self.pending_comment(
                &thread,
                Some(args.parent_comment_id),
                args.body.to_plain_text(),
                now,
            );
            cache.insert_pending_comment(pending.clone(), now);
            pending
        };
        self.send_comment(pending).await
    }

    async fn update_comment(&self, args: UpdateCommentArgs) -> Result<(), CommentError> {
        let now = self.clock.now();
        let id = args.comment_id;
        let content = args.body.to_plain_text();
        {
            let mut cache = self.cache.write().await;
            let current = cache.writable_comment(&id)?;
            self.check_author(current)?;
            let mut edited = current.clone();
            edited.content = content.clone();
            edited.updated_at = now;
            cache.begin_comment_edit(edited, now)?;
        }

        let result = self.repo.update_comment(&id, &self.user_id, content, now).await;
        let mut cache = self.cache.write().await;
        match result {
            Ok(row) => {
                cache.settle_comment(&id, row, self.clock.now());
                Ok(())
            }
            Err(e) => {
                cache.revert_comment(&id);
                log::warn!("update of comment {id} reverted: {e}");
                Err(e.into())
            }
        }
    }

    async fn delete_comment(&self, comment_id: &CommentId) -> Result<(), CommentError> {
        let now = self.clock.now();
        {
            let mut cache = self.cache.write().await;
            let current = cache.writable_comment(comment_id)?;
            self.check_author(current)?;
            cache.begin_comment_delete(comment_id, now)?;
        }

        let result = self.repo.delete_comment(comment_id, &self.user_id, now).await;
        let mut cache = self.cache.write().await;
        match result {
            Ok(row) => {
                cache.settle_comment(comment_id, row, self.clock.now());
                Ok(())
            }
            Err(e) => {
                cache.revert_comment(comment_id);
                log::warn!("delete of comment {comment_id} reverted: {e}");
                Err(e.into())
            }
        }
    }

    async fn resolve_thread(&self, thread_id: &ThreadId, resolved: bool) -> Result<(), CommentError> {
        let now = self.clock.now();
        {
            let mut cache = self.cache.write().await;
            let current = cache.writable_thread(thread_id)?;
            if current.creator_id != self.user_id {
                return Err(CommentError::Unauthorized(format!(
                    "user {} did not create thread {}",
                    self.user_id, thread_id
                )));
            }
            let mut edited = current.clone();
            edited.resolved = resolved;
            cache.begin_thread_edit(edited, now)?;
        }

        let result = self
            .repo
            .set_thread_resolved(thread_id, &self.user_id, resolved)
            .await;
        let mut cache = self.cache.write().await;
        match result {
            Ok(row) => {
                cache.settle_thread(thread_id, row, self.clock.now());
                Ok(())
            }
            Err(e) => {
                cache.revert_thread(thread_id);
                log::warn!("resolve of thread {thread_id} reverted: {e}");
                Err(e.into())
            }
        }
    }

    async fn threads(&self) -> Vec<ThreadView> {
        self.cache.read().await.threads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn adapter(store: &Arc<MemoryStore>, user: &str) -> CommentThreadAdapter {
        CommentThreadAdapter::new(
            DocId::from("d1"),
            UserId::from(user),
            store.clone(),
            Arc::new(ManualClock::new(1_000)),
            &CollabConfig::for_testing(),
        )
    }

    fn create_args(block: &str, text: &str) -> CreateThreadArgs {
        CreateThreadArgs {
            anchor_block_id: BlockId::from(block),
            body: CommentBody::plain(text),
        }
    }

    #[tokio::test]
    async fn test_create_thread_returns_permanent_ids() {
        let store = Arc::new(MemoryStore::new());
        let alice = adapter(&store, "alice");
        let view = alice.create_thread(create_args("b1", "first")).await.unwrap();
        assert!(!view.thread.id.is_temporary());
        assert_eq!(view.status, SyncStatus::Synced);
        assert_eq!(view.root().unwrap().comment.content, "first");

        let threads = alice.threads().await;
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].thread.id, view.thread.id);
    }

    #[tokio::test]
    async fn test_reply_records_parent() {
        let store = Arc::new(MemoryStore::new());
        let alice = adapter(&store, "alice");
        let view = alice.create_thread(create_args("b1", "question")).await.unwrap();
        let root_id = view.root().unwrap().comment.id.clone();
        let reply = alice
            .reply_to_comment(ReplyArgs {
                parent_comment_id: root_id.clone(),
                body: CommentBody::plain("answer"),
            })
            .await
            .unwrap();
        assert_eq!(reply.comment.parent_comment_id, Some(root_id));
        assert_eq!(reply.comment.thread_id, view.thread.id);
    }

    #[tokio::test]
    async fn test_edit_requires_author() {
        let store = Arc::new(MemoryStore::new());
        let alice = adapter(&store, "alice");
        let bob = adapter(&store, "bob");
        let view = alice.create_thread(create_args("b1", "mine")).await.unwrap();
        bob.refresh().await.unwrap();

        let root_id = view.root().unwrap().comment.id.clone();
        let before = bob.snapshot().await;
        let err = bob
            .update_comment(UpdateCommentArgs {
                comment_id: root_id.clone(),
                body: CommentBody::plain("hijacked"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommentError::Unauthorized(_)));
        assert!(matches!(
            bob.delete_comment(&root_id).await,
            Err(CommentError::Unauthorized(_))
        ));
        assert!(matches!(
            bob.resolve_thread(&view.thread.id, true).await,
            Err(CommentError::Unauthorized(_))
        ));
        assert_eq!(bob.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_unknown_targets() {
        let store = Arc::new(MemoryStore::new());
        let alice = adapter(&store, "alice");
        let err = alice
            .add_comment(AddCommentArgs {
                thread_id: ThreadId::from("ghost"),
                body: CommentBody::plain("hi"),
            })
            .await
            .unwrap_err();
        assert_eq!(err, CommentError::ThreadNotFound(ThreadId::from("ghost")));
        let err = alice.delete_comment(&CommentId::from("ghost")).await.unwrap_err();
        assert_eq!(err, CommentError::CommentNotFound(CommentId::from("ghost")));
    }

    #[tokio::test]
    async fn test_body_of_splits_lines() {
        let comment = Comment {
            id: CommentId::from("c1"),
            thread_id: ThreadId::from("t1"),
            doc_id: DocId::from("d1"),
            block_id: BlockId::from("b1"),
            author_id: UserId::from("alice"),
            content: "one\ntwo".into(),
            created_at: 0,
            updated_at: 0,
            deleted: false,
            parent_comment_id: None,
        };
        let body = CommentThreadAdapter::body_of(&comment);
        assert_eq!(body.content.len(), 2);
        assert_eq!(body.to_plain_text(), "one\ntwo");
    }
}
