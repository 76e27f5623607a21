//! # folio-core: data model and editor seam for Folio workspaces
//!
//! A workspace is a set of documents; each document is an ordered tree of
//! pages (one level of sub-pages), and each page owns exactly one
//! collaborative editor document addressed by an opaque [`DocId`].
//!
//! ## Modules
//!
//! - [`ordering`]: fractional order keys for same-parent siblings
//! - [`collab`]: the narrow boundary to the text-editing engine: steps,
//!   position mapping, block layout and the comment-store capability
//!
//! Rows defined here are owned by the backing store. Everything a client
//! holds in memory is a projection that can be rebuilt from a fresh read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

pub mod collab;
pub mod ordering;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Millis {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or_default()
}

/// Prefix carried by ids minted locally before the store has assigned one.
pub const TEMP_ID_PREFIX: &str = "tmp-";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a fresh random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Mint a temporary id for an optimistic local entity.
            pub fn temporary() -> Self {
                Self(format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()))
            }

            /// Whether this id was minted locally and never confirmed.
            pub fn is_temporary(&self) -> bool {
                self.0.starts_with(TEMP_ID_PREFIX)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// A workspace document (the container of pages).
    DocumentId
);
string_id!(PageId);
string_id!(
    /// Opaque address of an editor document owned by exactly one page.
    DocId
);
string_id!(
    /// A content block inside an editor document.
    BlockId
);
string_id!(ThreadId);
string_id!(CommentId);
string_id!(UserId);

// ───────────────────────────────────────────────────────────────────
// Pages
// ───────────────────────────────────────────────────────────────────

/// A page row.
///
/// Siblings are the pages sharing `(document_id, parent_page_id)`; their
/// `order_key`s induce the display order. A page with a parent is a
/// sub-page and can never itself be a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub document_id: DocumentId,
    pub parent_page_id: Option<PageId>,
    pub order_key: f64,
    pub title: String,
    pub icon: Option<String>,
    pub doc_id: DocId,
    pub created_at: Millis,
}

impl Page {
    pub fn is_subpage(&self) -> bool {
        self.parent_page_id.is_some()
    }

    /// Whether `other` belongs to the same sibling group.
    pub fn is_sibling_of(&self, other: &Page) -> bool {
        self.document_id == other.document_id && self.parent_page_id == other.parent_page_id
    }
}

/// Insert payload for a page; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPage {
    pub document_id: DocumentId,
    pub parent_page_id: Option<PageId>,
    pub order_key: f64,
    pub title: String,
    pub doc_id: DocId,
    pub created_at: Millis,
}

/// Single-field page patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PagePatch {
    Title(String),
    Icon(Option<String>),
    OrderKey(f64),
}

impl PagePatch {
    pub fn apply(self, page: &mut Page) {
        match self {
            PagePatch::Title(title) => page.title = title,
            PagePatch::Icon(icon) => page.icon = icon,
            PagePatch::OrderKey(key) => page.order_key = key,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Comments
// ───────────────────────────────────────────────────────────────────

/// A comment thread anchored to one block of one editor document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentThread {
    pub id: ThreadId,
    pub doc_id: DocId,
    pub block_id: BlockId,
    pub created_at: Millis,
    pub resolved: bool,
    pub creator_id: UserId,
}

/// A flat comment row. The earliest comment of a thread is its root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub thread_id: ThreadId,
    pub doc_id: DocId,
    pub block_id: BlockId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: Millis,
    pub updated_at: Millis,
    pub deleted: bool,
    pub parent_comment_id: Option<CommentId>,
}

/// One row of the remote "threads + comments by doc" feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRows {
    pub thread: CommentThread,
    pub comments: Vec<Comment>,
}

impl ThreadRows {
    /// The root comment: earliest by creation, regardless of deletion.
    pub fn root(&self) -> Option<&Comment> {
        self.comments
            .iter()
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
    }

    /// A thread whose comments are all deleted is empty but still exists.
    pub fn is_empty(&self) -> bool {
        self.comments.iter().all(|c| c.deleted)
    }
}

/// Remote create-thread payload: the thread plus its root comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewThread {
    pub doc_id: DocId,
    pub block_id: BlockId,
    pub creator_id: UserId,
    pub content: String,
    pub created_at: Millis,
}

/// Remote add-comment payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComment {
    pub thread_id: ThreadId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: Millis,
    pub parent_comment_id: Option<CommentId>,
}

// ───────────────────────────────────────────────────────────────────
// Presence
// ───────────────────────────────────────────────────────────────────

/// Ephemeral "who is here and where" row, one per `(doc_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub doc_id: DocId,
    pub user_id: UserId,
    pub name: String,
    pub color: String,
    /// Cursor offset, string-encoded as on the wire.
    pub cursor: String,
    pub updated_at: Millis,
}

impl PresenceRecord {
    /// Parsed cursor offset. Anything non-numeric reads as the document start.
    pub fn cursor_offset(&self) -> usize {
        self.cursor.trim().parse::<usize>().unwrap_or(0)
    }

    /// Fresh while `now - updated_at` does not exceed `window_ms`.
    pub fn is_fresh(&self, now: Millis, window_ms: Millis) -> bool {
        now - self.updated_at <= window_ms
    }
}
