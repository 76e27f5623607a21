//! Backing store: the authoritative home of every row.
//!
//! ```text
//! ┌──────────────┐   single-record writes   ┌─────────────────────┐
//! │ PageTree     │ ───────────────────────► │ PageStore           │
//! │ Comments     │ ───────────────────────► │ CommentRepo         │
//! │ Presence     │ ───────────────────────► │ PresenceStore       │
//! │ Engine       │ ───────────────────────► │ SnapshotStore       │
//! └──────┬───────┘                          └─────────┬───────────┘
//!        │           re-query on event                │ publish
//!        └──────────────◄──── ChangeFeed ◄────────────┘
//! ```
//!
//! Two implementations: [`MemoryStore`] for tests and ephemeral sessions,
//! [`RocksStore`] for durable storage.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use crate::broadcast::{StoreEvent, Topic};
use async_trait::async_trait;
use folio_core::{
    Comment, CommentId, CommentThread, DocId, DocumentId, Millis, NewComment, NewPage, NewThread,
    Page, PageId, PagePatch, PresenceRecord, ThreadId, ThreadRows, UserId,
};
use tokio::sync::broadcast;

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Row not found
    NotFound(String),
    /// Caller may not perform this write
    Forbidden(String),
    /// Row failed validation
    InvalidRecord(String),
    /// RocksDB internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "Not found: {what}"),
            StoreError::Forbidden(what) => write!(f, "Forbidden: {what}"),
            StoreError::InvalidRecord(e) => write!(f, "Invalid record: {e}"),
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// Page table.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Insert a page; the store assigns its id.
    async fn insert_page(&self, page: NewPage) -> Result<Page, StoreError>;

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>, StoreError>;

    async fn patch_page(&self, id: &PageId, patch: PagePatch) -> Result<Page, StoreError>;

    /// Returns whether a row was removed.
    async fn delete_page(&self, id: &PageId) -> Result<bool, StoreError>;

    /// One sibling group, in display order.
    async fn pages_by_parent(
        &self,
        document_id: &DocumentId,
        parent: Option<&PageId>,
    ) -> Result<Vec<Page>, StoreError>;

    /// Every page of a document, in key order.
    async fn pages_by_document(&self, document_id: &DocumentId) -> Result<Vec<Page>, StoreError>;
}

/// Thread and comment tables.
#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Create a thread together with its root comment.
    async fn create_thread(&self, new: NewThread) -> Result<ThreadRows, StoreError>;

    async fn add_comment(&self, new: NewComment) -> Result<Comment, StoreError>;

    /// Replace a comment's content. Only its author may do this.
    async fn update_comment(
        &self,
        id: &CommentId,
        editor: &UserId,
        content: String,
        now: Millis,
    ) -> Result<Comment, StoreError>;

    /// Soft-delete a comment. Only its author may do this.
    async fn delete_comment(
        &self,
        id: &CommentId,
        editor: &UserId,
        now: Millis,
    ) -> Result<Comment, StoreError>;

    /// Only the thread creator may change `resolved`.
    async fn set_thread_resolved(
        &self,
        id: &ThreadId,
        caller: &UserId,
        resolved: bool,
    ) -> Result<CommentThread, StoreError>;

    /// Every thread of a document with all of its comments, deleted included.
    async fn threads_by_doc(&self, doc_id: &DocId) -> Result<Vec<ThreadRows>, StoreError>;
}

/// Presence table. Records older than the stored one are ignored.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn upsert_presence(&self, record: PresenceRecord) -> Result<(), StoreError>;

    async fn presence_by_doc(&self, doc_id: &DocId) -> Result<Vec<PresenceRecord>, StoreError>;

    async fn remove_presence(&self, doc_id: &DocId, user_id: &UserId) -> Result<(), StoreError>;
}

/// Durable editor document state: one base snapshot plus numbered updates.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_snapshot(&self, doc_id: &DocId, snapshot: &[u8]) -> Result<(), StoreError>;

    async fn load_snapshot(&self, doc_id: &DocId) -> Result<Option<Vec<u8>>, StoreError>;

    async fn append_update(&self, doc_id: &DocId, seq: u64, update: &[u8]) -> Result<(), StoreError>;

    /// Updates in sequence order.
    async fn load_updates(&self, doc_id: &DocId) -> Result<Vec<(u64, Vec<u8>)>, StoreError>;

    /// Drop updates with `seq <= up_to`. Returns how many were removed.
    async fn truncate_updates(&self, doc_id: &DocId, up_to: u64) -> Result<u64, StoreError>;
}

/// Write notifications, one feed per [`Topic`].
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<StoreEvent>;
}

/// Everything a session needs from one backend.
pub trait Backend: PageStore + CommentRepo + PresenceStore + SnapshotStore + ChangeFeed {}

impl<T> Backend for T where T: PageStore + CommentRepo + PresenceStore + SnapshotStore + ChangeFeed {}

pub(crate) fn not_found(kind: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{kind} {id}"))
}

/// Authorization shared by both stores.
pub(crate) fn check_author(comment: &Comment, editor: &UserId) -> Result<(), StoreError> {
    if &comment.author_id != editor {
        return Err(StoreError::Forbidden(format!(
            "user {} is not the author of comment {}",
            editor, comment.id
        )));
    }
    Ok(())
}

pub(crate) fn check_creator(thread: &CommentThread, caller: &UserId) -> Result<(), StoreError> {
    if &thread.creator_id != caller {
        return Err(StoreError::Forbidden(format!(
            "user {} did not create thread {}",
            caller, thread.id
        )));
    }
    Ok(())
}

pub(crate) fn check_new_page(page: &NewPage) -> Result<(), StoreError> {
    if !page.order_key.is_finite() {
        return Err(StoreError::InvalidRecord(format!(
            "order key {} is not finite",
            page.order_key
        )));
    }
    Ok(())
}

pub(crate) fn check_content(content: &str) -> Result<(), StoreError> {
    if content.trim().is_empty() {
        return Err(StoreError::InvalidRecord("comment content is empty".into()));
    }
    Ok(())
}

/// Build the rows for a new thread and its root comment.
pub(crate) fn thread_rows(new: NewThread) -> ThreadRows {
    let thread = CommentThread {
        id: ThreadId::generate(),
        doc_id: new.doc_id.clone(),
        block_id: new.block_id.clone(),
        created_at: new.created_at,
        resolved: false,
        creator_id: new.creator_id.clone(),
    };
    let root = Comment {
        id: CommentId::generate(),
        thread_id: thread.id.clone(),
        doc_id: new.doc_id,
        block_id: new.block_id,
        author_id: new.creator_id,
        content: new.content,
        created_at: new.created_at,
        updated_at: new.created_at,
        deleted: false,
        parent_comment_id: None,
    };
    ThreadRows {
        thread,
        comments: vec![root],
    }
}

pub(crate) fn comment_row(thread: &CommentThread, new: NewComment) -> Comment {
    Comment {
        id: CommentId::generate(),
        thread_id: thread.id.clone(),
        doc_id: thread.doc_id.clone(),
        block_id: thread.block_id.clone(),
        author_id: new.author_id,
        content: new.content,
        created_at: new.created_at,
        updated_at: new.created_at,
        deleted: false,
        parent_comment_id: new.parent_comment_id,
    }
}

pub(crate) fn page_row(new: NewPage) -> Page {
    Page {
        id: PageId::generate(),
        document_id: new.document_id,
        parent_page_id: new.parent_page_id,
        order_key: new.order_key,
        title: new.title,
        icon: None,
        doc_id: new.doc_id,
        created_at: new.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        assert_eq!(
            StoreError::NotFound("page p1".into()).to_string(),
            "Not found: page p1"
        );
        assert!(StoreError::Forbidden("x".into()).to_string().starts_with("Forbidden"));
    }

    #[test]
    fn test_thread_rows_share_anchor() {
        let rows = thread_rows(NewThread {
            doc_id: DocId::from("d1"),
            block_id: folio_core::BlockId::from("b1"),
            creator_id: UserId::from("u1"),
            content: "hello".into(),
            created_at: 10,
        });
        let root = &rows.comments[0];
        assert_eq!(root.thread_id, rows.thread.id);
        assert_eq!(root.block_id, rows.thread.block_id);
        assert_eq!(root.author_id, rows.thread.creator_id);
        assert!(!rows.thread.id.is_temporary());
    }

    #[test]
    fn test_empty_thread_content_rejected() {
        assert!(matches!(check_content("   "), Err(StoreError::InvalidRecord(_))));
        assert!(check_content("ok").is_ok());
    }
}
