//! Editor seam.
//!
//! The text-editing engine is reached through a handful of narrow types:
//!
//! ```text
//!   Editor ──steps──▶ EditorDocument ──Mapping──▶ PositionMapper consumers
//!     │                    │
//!     │                    └── BlockLookup (block id → byte range)
//!     │
//!     └── CommentStore (thread/comment CRUD, implemented by folio-collab)
//! ```

use crate::{BlockId, Comment, CommentId, CommentThread, ThreadId, ThreadRows};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub mod body;
pub mod document;
pub mod mapping;

pub use body::CommentBody;
pub use document::{AppliedSteps, BlockLookup, DocumentError, EditorDocument, Step};
pub use mapping::{Bias, Mapping, PositionMapper, StepMap};

/// Local synchronization state of a thread or comment, as shown to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Created locally, remote write in flight. The id is temporary.
    Pending,
    /// Authoritative id known.
    Synced,
    /// Local edit in flight over a synced row.
    Editing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentView {
    pub comment: Comment,
    pub status: SyncStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadView {
    pub thread: CommentThread,
    /// Earliest comment of the thread, deleted or not.
    pub root_id: Option<CommentId>,
    /// Visible comments in creation order.
    pub comments: Vec<CommentView>,
    pub status: SyncStatus,
}

impl ThreadView {
    /// The root comment, unless it was deleted. A reply never stands in for it.
    pub fn root(&self) -> Option<&CommentView> {
        let root_id = self.root_id.as_ref()?;
        self.comments.iter().find(|c| &c.comment.id == root_id)
    }

    /// Drop the sync state, leaving plain rows.
    pub fn into_rows(self) -> ThreadRows {
        ThreadRows {
            thread: self.thread,
            comments: self.comments.into_iter().map(|c| c.comment).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreadFilter {
    #[default]
    All,
    Open,
    Resolved,
}

impl ThreadFilter {
    pub fn matches(&self, thread: &CommentThread) -> bool {
        match self {
            ThreadFilter::All => true,
            ThreadFilter::Open => !thread.resolved,
            ThreadFilter::Resolved => thread.resolved,
        }
    }
}

/// Where a thread currently sits in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Attached { block_id: BlockId, range: Range<usize> },
    /// The anchor block no longer exists. The thread stays listed.
    Unattached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateThreadArgs {
    pub anchor_block_id: BlockId,
    pub body: CommentBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddCommentArgs {
    pub thread_id: ThreadId,
    pub body: CommentBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyArgs {
    pub parent_comment_id: CommentId,
    pub body: CommentBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommentArgs {
    pub comment_id: CommentId,
    pub body: CommentBody,
}

/// Thread/comment CRUD as the editor consumes it.
///
/// Mutations are reflected locally before the remote call resolves; a failed
/// remote call reverts the local change and surfaces the error.
#[async_trait]
pub trait CommentStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Merge an authoritative snapshot of every thread of the document.
    async fn set_threads_from_remote(&self, rows: Vec<ThreadRows>);

    async fn create_thread(&self, args: CreateThreadArgs) -> Result<ThreadView, Self::Error>;

    async fn add_comment(&self, args: AddCommentArgs) -> Result<CommentView, Self::Error>;

    async fn reply_to_comment(&self, args: ReplyArgs) -> Result<CommentView, Self::Error>;

    async fn update_comment(&self, args: UpdateCommentArgs) -> Result<(), Self::Error>;

    async fn delete_comment(&self, comment_id: &CommentId) -> Result<(), Self::Error>;

    async fn resolve_thread(&self, thread_id: &ThreadId, resolved: bool) -> Result<(), Self::Error>;

    /// Visible threads, oldest first.
    async fn threads(&self) -> Vec<ThreadView>;
}
