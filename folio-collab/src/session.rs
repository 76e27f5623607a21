//! Per-document session lifecycle.
//!
//! Opening a document builds a fresh comment cache, presence channel and
//! cursor projector for it, and wires them to three feeds:
//!
//! ```text
//!   threads:<docId>   ──► CommentThreadAdapter::refresh
//!   presence:<docId>  ──► active_peers ──► CursorDecorationProjector::set_peers
//!   engine doc feed   ──► Steps.mapping ──► CursorDecorationProjector::map_through
//! ```
//!
//! Closing the session stops the heartbeat, drops the caches and removes
//! the local presence record. Nothing outlives the session.

use crate::broadcast::{StoreEvent, Topic};
use crate::clock::{Clock, SystemClock};
use crate::comments::CommentThreadAdapter;
use crate::config::CollabConfig;
use crate::cursors::{CursorDecoration, CursorDecorationProjector};
use crate::engine::{DocumentEngine, DocumentFeedEvent, EngineError};
use crate::pages::PageTreeService;
use crate::presence::{HeartbeatHandle, PresenceChannel};
use crate::store::{Backend, ChangeFeed, CommentRepo, MemoryStore, PageStore, PresenceStore, StoreError};
use folio_core::collab::{Anchor, BlockLookup, Mapping, Step};
use folio_core::{DocId, ThreadId, UserId};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Store(StoreError),
    Engine(EngineError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Store(e) => write!(f, "Store error: {e}"),
            SessionError::Engine(e) => write!(f, "Engine error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Store(e)
    }
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        SessionError::Engine(e)
    }
}

/// Shared collaborators, one set per process.
#[derive(Clone)]
pub struct Services {
    pub pages: Arc<dyn PageStore>,
    pub comments: Arc<dyn CommentRepo>,
    pub presence: Arc<dyn PresenceStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub engine: Arc<DocumentEngine>,
    pub clock: Arc<dyn Clock>,
    pub config: CollabConfig,
}

impl Services {
    pub fn new<B: Backend + 'static>(
        backend: Arc<B>,
        engine: Arc<DocumentEngine>,
        clock: Arc<dyn Clock>,
        config: CollabConfig,
    ) -> Self {
        Self {
            pages: backend.clone(),
            comments: backend.clone(),
            presence: backend.clone(),
            feed: backend,
            engine,
            clock,
            config,
        }
    }

    /// Everything in memory, on the wall clock.
    pub fn in_memory(config: CollabConfig) -> Self {
        let store = Arc::new(MemoryStore::with_feed_capacity(config.feed_capacity));
        let engine = Arc::new(DocumentEngine::new(store.clone(), &config));
        Self::new(store, engine, Arc::new(SystemClock), config)
    }

    pub fn page_tree(&self) -> PageTreeService {
        PageTreeService::new(self.pages.clone(), self.engine.clone(), self.clock.clone())
    }
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: UserId,
    pub email: Option<String>,
}

impl SessionUser {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }
}

/// One user with one editor document open.
pub struct DocumentSession {
    doc_id: DocId,
    user: SessionUser,
    engine: Arc<DocumentEngine>,
    comments: Arc<CommentThreadAdapter>,
    presence: Arc<PresenceChannel>,
    cursors: Arc<RwLock<CursorDecorationProjector>>,
    heartbeat: Option<HeartbeatHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl DocumentSession {
    pub async fn open(doc_id: DocId, user: SessionUser, services: &Services) -> Result<Self, SessionError> {
        let engine = services.engine.clone();
        // Fails with NotFound for a document that was never provisioned
        engine.stats(&doc_id).await?;

        let comments = Arc::new(CommentThreadAdapter::new(
            doc_id.clone(),
            user.id.clone(),
            services.comments.clone(),
            services.clock.clone(),
            &services.config,
        ));
        let presence = Arc::new(PresenceChannel::new(
            doc_id.clone(),
            user.id.clone(),
            services.presence.clone(),
            services.feed.clone(),
            services.clock.clone(),
            &services.config,
        ));
        if let Some(email) = &user.email {
            presence.set_email(email).await;
        }
        let cursors = Arc::new(RwLock::new(CursorDecorationProjector::new()));

        // Subscribe before the first read so no change slips between them
        let thread_rx = services.feed.subscribe(&Topic::Threads(doc_id.clone())).await;
        let presence_rx = presence.watch().await;
        let doc_rx = engine.subscribe(&doc_id).await;

        comments.refresh().await?;
        recompute_cursors(&doc_id, &engine, &presence, &cursors).await;

        let tasks = vec![
            tokio::spawn(follow_threads(thread_rx, comments.clone())),
            tokio::spawn(follow_presence(
                presence_rx,
                doc_id.clone(),
                engine.clone(),
                presence.clone(),
                cursors.clone(),
            )),
            tokio::spawn(follow_document(
                doc_rx,
                doc_id.clone(),
                engine.clone(),
                presence.clone(),
                cursors.clone(),
            )),
        ];
        let heartbeat = Some(presence.start());

        log::info!("{} opened {}", user.id, doc_id);
        Ok(Self {
            doc_id,
            user,
            engine,
            comments,
            presence,
            cursors,
            heartbeat,
            tasks,
        })
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    pub fn user(&self) -> &SessionUser {
        &self.user
    }

    /// The editor's comment store.
    pub fn comments(&self) -> &Arc<CommentThreadAdapter> {
        &self.comments
    }

    pub fn presence(&self) -> &Arc<PresenceChannel> {
        &self.presence
    }

    pub async fn cursors(&self) -> Vec<CursorDecoration> {
        self.cursors.read().await.decorations().to_vec()
    }

    pub async fn set_cursor(&self, offset: usize) {
        self.presence.set_cursor(offset).await;
    }

    /// Apply local edits. Decorations follow through the document feed.
    pub async fn apply_steps(&self, steps: Vec<Step>) -> Result<Mapping, SessionError> {
        Ok(self.engine.apply_steps(&self.doc_id, steps).await?)
    }

    /// Where each visible thread currently sits.
    pub async fn anchors(&self) -> Result<Vec<(ThreadId, Anchor)>, SessionError> {
        let cache = self.comments.snapshot().await;
        Ok(self
            .engine
            .read(&self.doc_id, |doc| cache.resolve_anchors(doc))
            .await?)
    }

    /// Rebuild decorations from a fresh presence read.
    pub async fn refresh_cursors(&self) {
        recompute_cursors(&self.doc_id, &self.engine, &self.presence, &self.cursors).await;
    }

    /// Stop the heartbeat and feed tasks and withdraw the presence record.
    pub async fn close(mut self) -> Result<(), SessionError> {
        self.shutdown();
        self.presence.leave().await?;
        log::info!("{} closed {}", self.user.id, self.doc_id);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn recompute_cursors(
    doc_id: &DocId,
    engine: &DocumentEngine,
    presence: &PresenceChannel,
    cursors: &RwLock<CursorDecorationProjector>,
) {
    let peers = match presence.active_peers().await {
        Ok(peers) => peers,
        Err(e) => {
            log::debug!("presence read for {doc_id} failed: {e}");
            return;
        }
    };
    match engine.read(doc_id, |doc| doc.size()).await {
        Ok(size) => cursors.write().await.set_peers(&peers, size),
        Err(e) => log::debug!("document {doc_id} unavailable for cursors: {e}"),
    }
}

async fn follow_threads(mut rx: broadcast::Receiver<StoreEvent>, comments: Arc<CommentThreadAdapter>) {
    loop {
        match rx.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => {
                if let Err(e) = comments.refresh().await {
                    log::debug!("thread refresh for {} failed: {e}", comments.doc_id());
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn follow_presence(
    mut rx: broadcast::Receiver<StoreEvent>,
    doc_id: DocId,
    engine: Arc<DocumentEngine>,
    presence: Arc<PresenceChannel>,
    cursors: Arc<RwLock<CursorDecorationProjector>>,
) {
    loop {
        match rx.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => {
                recompute_cursors(&doc_id, &engine, &presence, &cursors).await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn follow_document(
    mut rx: broadcast::Receiver<DocumentFeedEvent>,
    doc_id: DocId,
    engine: Arc<DocumentEngine>,
    presence: Arc<PresenceChannel>,
    cursors: Arc<RwLock<CursorDecorationProjector>>,
) {
    loop {
        match rx.recv().await {
            Ok(DocumentFeedEvent::Steps { mapping, .. }) => match engine.read(&doc_id, |doc| doc.size()).await {
                Ok(size) => cursors.write().await.map_through(mapping.as_ref(), size),
                Err(e) => log::debug!("document {doc_id} unavailable for cursors: {e}"),
            },
            Ok(DocumentFeedEvent::Snapshot { .. }) => {}
            // Mappings were missed: start over from presence
            Err(RecvError::Lagged(_)) => recompute_cursors(&doc_id, &engine, &presence, &cursors).await,
            Err(RecvError::Closed) => break,
        }
    }
}
