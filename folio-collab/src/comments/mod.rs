//! Comment threads: optimistic local cache plus the editor-facing adapter.
//!
//! ```text
//!   editor ──CommentStore──► CommentThreadAdapter ──► CommentRepo (remote)
//!                                   │    ▲
//!                       optimistic  │    │ set_threads_from_remote
//!                                   ▼    │
//!                               ThreadCache
//! ```
//!
//! Each cached row is a [`Tracked`] value:
//!
//! ```text
//!   Pending ──confirm──► Confirmed ──feed catches up──► Reconciled
//!      │                                                  │   ▲
//!      └──fail──► (removed)              edit / delete    ▼   │ feed
//!                                        Editing / Tombstoned ┘
//! ```

mod adapter;
mod cache;

pub use adapter::CommentThreadAdapter;
pub use cache::{Row, ThreadCache, Tracked};

use crate::store::StoreError;
use folio_core::{CommentId, ThreadId};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentError {
    /// The remote write failed and the local change was reverted.
    OptimisticWriteFailed(StoreError),
    /// Only the author may edit a comment, only the creator may resolve a thread.
    Unauthorized(String),
    ThreadNotFound(ThreadId),
    CommentNotFound(CommentId),
    /// The thread is still local; its remote id is not known yet.
    ThreadNotSynced(ThreadId),
    CommentNotSynced(CommentId),
    /// Another write to the same row has not resolved yet.
    MutationInFlight(String),
}

impl fmt::Display for CommentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentError::OptimisticWriteFailed(e) => write!(f, "Write failed and was reverted: {e}"),
            CommentError::Unauthorized(why) => write!(f, "Unauthorized: {why}"),
            CommentError::ThreadNotFound(id) => write!(f, "Thread not found: {id}"),
            CommentError::CommentNotFound(id) => write!(f, "Comment not found: {id}"),
            CommentError::ThreadNotSynced(id) => write!(f, "Thread {id} is not synced yet"),
            CommentError::CommentNotSynced(id) => write!(f, "Comment {id} is not synced yet"),
            CommentError::MutationInFlight(id) => write!(f, "A write to {id} is still in flight"),
        }
    }
}

impl std::error::Error for CommentError {}

impl From<StoreError> for CommentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Forbidden(why) => CommentError::Unauthorized(why),
            other => CommentError::OptimisticWriteFailed(other),
        }
    }
}
