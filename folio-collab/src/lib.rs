//! # folio-collab: collaboration layer for Folio workspaces
//!
//! Client-side consistency mechanisms over a shared backing store: sibling
//! page ordering, optimistic comment threads reconciled against a remote
//! feed, and self-expiring presence rendered as cursor decorations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐        ┌──────────────────────────────────────┐
//! │ PageTreeService │───────►│ Backing store                        │
//! └─────────────────┘        │  PageStore · CommentRepo             │
//!                            │  PresenceStore · SnapshotStore       │
//! ┌─────────────────┐        │  (MemoryStore | RocksStore)          │
//! │ DocumentSession │───────►└──────────────┬───────────────────────┘
//! │  ├ CommentThreadAdapter ◄─ ThreadCache  │ ChangeFeed
//! │  ├ PresenceChannel (heartbeat)          │ (per-topic broadcast)
//! │  └ CursorDecorationProjector ◄──────────┤
//! └────────┬────────┘                       │
//!          ▼                                │
//! ┌─────────────────┐   DocumentFeedEvent   │
//! │ DocumentEngine  │───────────────────────┘
//! │ (yrs replicas)  │
//! └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`pages`]: page tree create/reorder/remove over fractional order keys
//! - [`comments`]: `ThreadCache` state machine and the editor comment store
//! - [`presence`]: heartbeat publisher and stale-record filtering
//! - [`cursors`]: remote cursor decorations remapped through local edits
//! - [`session`]: per-document lifecycle wiring the above to the feeds
//! - [`engine`]: editor document host with a compacted update log
//! - [`store`]: backing store traits, in-memory and RocksDB implementations
//! - [`broadcast`]: per-topic change feeds

pub mod broadcast;
pub mod clock;
pub mod comments;
pub mod config;
pub mod cursors;
pub mod engine;
pub mod pages;
pub mod presence;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use broadcast::{FeedGroup, FeedHub, FeedStats, StoreEvent, Topic};
pub use clock::{Clock, ManualClock, SystemClock};
pub use comments::{CommentError, CommentThreadAdapter, ThreadCache, Tracked};
pub use config::CollabConfig;
pub use cursors::{CursorDecoration, CursorDecorationProjector};
pub use engine::{DocumentEngine, DocumentFeedEvent, DocumentProvisioner, DocumentStats, EngineError};
pub use pages::{PageError, PageNode, PageTreeService};
pub use presence::{HeartbeatHandle, PresenceChannel};
pub use session::{DocumentSession, Services, SessionError, SessionUser};
pub use store::{
    Backend, ChangeFeed, CommentRepo, MemoryStore, PageStore, PresenceStore, RocksStore,
    SnapshotStore, StoreConfig, StoreError,
};
