use super::{DocumentFeedEvent, DocumentProvisioner, EngineError};
use crate::broadcast::FeedHub;
use crate::config::CollabConfig;
use crate::store::SnapshotStore;
use async_trait::async_trait;
use folio_core::collab::{EditorDocument, Mapping, Step};
use folio_core::DocId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

struct Room {
    doc: EditorDocument,
    /// Sequence number of the last logged update.
    seq: u64,
    /// Sequence number folded into the stored snapshot.
    base_seq: u64,
}

/// Update log position of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStats {
    pub seq: u64,
    pub base_seq: u64,
    pub pending_updates: u64,
}

/// Hosts the authoritative replica of every open editor document.
pub struct DocumentEngine {
    store: Arc<dyn SnapshotStore>,
    rooms: RwLock<HashMap<DocId, Arc<Mutex<Room>>>>,
    feeds: FeedHub<DocId, DocumentFeedEvent>,
    compaction_threshold: u64,
}

impl DocumentEngine {
    pub fn new(store: Arc<dyn SnapshotStore>, config: &CollabConfig) -> Self {
        Self {
            store,
            rooms: RwLock::new(HashMap::new()),
            feeds: FeedHub::new(config.feed_capacity),
            compaction_threshold: config.step_compaction_threshold.max(1),
        }
    }

    /// Register a new document seeded from `initial_snapshot` (may be empty).
    pub async fn create_document(&self, doc_id: &DocId, initial_snapshot: &[u8]) -> Result<(), EngineError> {
        let doc = EditorDocument::from_snapshot(initial_snapshot)?;
        let snapshot = doc.snapshot();
        let room = Arc::new(Mutex::new(Room { doc, seq: 0, base_seq: 0 }));

        // Reserve the id in memory before touching the store.
        {
            let mut rooms = self.rooms.write().await;
            if rooms.contains_key(doc_id) {
                return Err(EngineError::AlreadyExists(doc_id.clone()));
            }
            rooms.insert(doc_id.clone(), room);
        }

        let persisted = match self.store.load_snapshot(doc_id).await {
            Ok(Some(_)) => Err(EngineError::AlreadyExists(doc_id.clone())),
            Ok(None) => self.store.save_snapshot(doc_id, &snapshot).await.map_err(EngineError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = persisted {
            self.rooms.write().await.remove(doc_id);
            return Err(e);
        }

        log::info!("created document {doc_id}");
        self.feeds
            .publish(
                doc_id,
                DocumentFeedEvent::Snapshot {
                    doc_id: doc_id.clone(),
                    snapshot: Arc::new(snapshot),
                },
            )
            .await;
        Ok(())
    }

    /// Apply steps to the authoritative replica and log the resulting update.
    ///
    /// The replica and the sequence only move once the update is logged. A
    /// failed compaction leaves the update in the log and is retried on the
    /// next edit.
    pub async fn apply_steps(&self, doc_id: &DocId, steps: Vec<Step>) -> Result<Mapping, EngineError> {
        let room = self.room(doc_id).await?;
        let mut room = room.lock().await;

        let applied = room.doc.stage_steps(&steps)?;
        let seq = room.seq + 1;
        if let Err(e) = self.store.append_update(doc_id, seq, &applied.update).await {
            log::warn!("update {seq} of {doc_id} not logged, edit dropped: {e}");
            return Err(e.into());
        }
        room.doc.apply_update(&applied.update)?;
        room.seq = seq;

        if seq - room.base_seq >= self.compaction_threshold {
            if let Err(e) = self.compact(doc_id, &mut room).await {
                log::warn!("compaction of {doc_id} at {seq} failed: {e}");
            }
        }

        self.feeds
            .publish(
                doc_id,
                DocumentFeedEvent::Steps {
                    doc_id: doc_id.clone(),
                    seq,
                    steps: Arc::new(steps),
                    mapping: Arc::new(applied.mapping.clone()),
                    update: Arc::new(applied.update),
                },
            )
            .await;
        Ok(applied.mapping)
    }

    async fn compact(&self, doc_id: &DocId, room: &mut Room) -> Result<(), EngineError> {
        let snapshot = room.doc.snapshot();
        self.store.save_snapshot(doc_id, &snapshot).await?;
        let removed = self.store.truncate_updates(doc_id, room.seq).await?;
        room.base_seq = room.seq;
        log::info!(
            "compacted {doc_id}: {removed} updates folded into a {} byte snapshot",
            snapshot.len()
        );
        Ok(())
    }

    /// Full encoded state of a document.
    pub async fn snapshot(&self, doc_id: &DocId) -> Result<Vec<u8>, EngineError> {
        let room = self.room(doc_id).await?;
        let room = room.lock().await;
        Ok(room.doc.snapshot())
    }

    /// Run `f` against the current replica.
    pub async fn read<R>(&self, doc_id: &DocId, f: impl FnOnce(&EditorDocument) -> R) -> Result<R, EngineError> {
        let room = self.room(doc_id).await?;
        let room = room.lock().await;
        Ok(f(&room.doc))
    }

    pub async fn subscribe(&self, doc_id: &DocId) -> broadcast::Receiver<DocumentFeedEvent> {
        self.feeds.subscribe(doc_id).await
    }

    pub async fn stats(&self, doc_id: &DocId) -> Result<DocumentStats, EngineError> {
        let room = self.room(doc_id).await?;
        let room = room.lock().await;
        Ok(DocumentStats {
            seq: room.seq,
            base_seq: room.base_seq,
            pending_updates: room.seq - room.base_seq,
        })
    }

    /// Drop the in-memory replica. The next access recovers it from the store.
    pub async fn evict(&self, doc_id: &DocId) -> bool {
        self.rooms.write().await.remove(doc_id).is_some()
    }

    pub async fn is_loaded(&self, doc_id: &DocId) -> bool {
        self.rooms.read().await.contains_key(doc_id)
    }

    async fn room(&self, doc_id: &DocId) -> Result<Arc<Mutex<Room>>, EngineError> {
        if let Some(room) = self.rooms.read().await.get(doc_id) {
            return Ok(room.clone());
        }

        let recovered = self.recover(doc_id).await?;

        let mut rooms = self.rooms.write().await;
        // Another task may have recovered it meanwhile
        if let Some(room) = rooms.get(doc_id) {
            return Ok(room.clone());
        }
        let room = Arc::new(Mutex::new(recovered));
        rooms.insert(doc_id.clone(), room.clone());
        Ok(room)
    }

    async fn recover(&self, doc_id: &DocId) -> Result<Room, EngineError> {
        let snapshot = self
            .store
            .load_snapshot(doc_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(doc_id.clone()))?;
        let mut doc = EditorDocument::from_snapshot(&snapshot)?;

        let updates = self.store.load_updates(doc_id).await?;
        // Everything before the first surviving update is in the snapshot
        let base_seq = updates.first().map_or(0, |(seq, _)| seq.saturating_sub(1));
        let mut seq = base_seq;
        for (update_seq, update) in &updates {
            doc.apply_update(update)?;
            seq = *update_seq;
        }
        log::info!("recovered {doc_id} with {} logged updates", updates.len());
        Ok(Room { doc, seq, base_seq })
    }
}

#[async_trait]
impl DocumentProvisioner for DocumentEngine {
    async fn create_document(&self, doc_id: &DocId, initial_snapshot: &[u8]) -> Result<(), EngineError> {
        DocumentEngine::create_document(self, doc_id, initial_snapshot).await
    }
}
