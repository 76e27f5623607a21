//! Presence: who is in a document and where their cursor is.
//!
//! ## Architecture
//!
//! ```text
//! set_cursor()                       every heartbeat_interval
//!      │                                      │
//!      ▼                                      ▼
//! LocalPresence ──────────────► PresenceStore.upsert_presence()
//!                                             │
//!                                             ▼  presence:<docId>
//!                                        ChangeFeed
//!                                             │
//!                                             ▼
//!                     active_peers(): drop self, drop stale, sort by user
//! ```
//!
//! A record is stale once `now - updated_at` exceeds the staleness window.
//! Heartbeat failures are logged at debug and retried on the next tick.

use crate::broadcast::{StoreEvent, Topic};
use crate::clock::Clock;
use crate::config::CollabConfig;
use crate::store::{ChangeFeed, PresenceStore, StoreError};
use folio_core::{DocId, Millis, PresenceRecord, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

/// Display name used until the user's email is known.
pub const DEFAULT_NAME: &str = "User";

/// A stable `hsl(H 70% 45%)` color with the hue taken from `seed`.
pub fn session_color(seed: Uuid) -> String {
    format!("hsl({} 70% 45%)", seed.as_u128() % 360)
}

/// Records worth rendering: not ours, not stale, ordered by user id.
pub fn fresh_peers(
    records: Vec<PresenceRecord>,
    local_user: &UserId,
    now: Millis,
    staleness_ms: Millis,
) -> Vec<PresenceRecord> {
    let mut peers: Vec<PresenceRecord> = records
        .into_iter()
        .filter(|r| &r.user_id != local_user && r.is_fresh(now, staleness_ms))
        .collect();
    peers.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    peers
}

#[derive(Debug, Clone)]
struct LocalPresence {
    name: String,
    cursor: usize,
}

/// Heartbeat publisher and presence reader for one user in one document.
pub struct PresenceChannel {
    doc_id: DocId,
    user_id: UserId,
    color: String,
    store: Arc<dyn PresenceStore>,
    feed: Arc<dyn ChangeFeed>,
    clock: Arc<dyn Clock>,
    heartbeat_interval: Duration,
    staleness_ms: Millis,
    local: RwLock<LocalPresence>,
}

impl PresenceChannel {
    pub fn new(
        doc_id: DocId,
        user_id: UserId,
        store: Arc<dyn PresenceStore>,
        feed: Arc<dyn ChangeFeed>,
        clock: Arc<dyn Clock>,
        config: &CollabConfig,
    ) -> Self {
        Self {
            doc_id,
            user_id,
            color: session_color(Uuid::new_v4()),
            store,
            feed,
            clock,
            heartbeat_interval: config.heartbeat_interval,
            staleness_ms: config.staleness_ms(),
            local: RwLock::new(LocalPresence {
                name: DEFAULT_NAME.to_string(),
                cursor: 0,
            }),
        }
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Chosen once per channel.
    pub fn color(&self) -> &str {
        &self.color
    }

    pub async fn name(&self) -> String {
        self.local.read().await.name.clone()
    }

    /// Replace the placeholder name with the user's email. Later calls are
    /// ignored.
    pub async fn set_email(&self, email: &str) {
        let mut local = self.local.write().await;
        if local.name == DEFAULT_NAME && !email.is_empty() {
            local.name = email.to_string();
        }
    }

    /// Remember the cursor; it goes out with the next heartbeat.
    pub async fn set_cursor(&self, offset: usize) {
        self.local.write().await.cursor = offset;
    }

    /// The record the next heartbeat would publish.
    pub async fn local_record(&self) -> PresenceRecord {
        let local = self.local.read().await.clone();
        PresenceRecord {
            doc_id: self.doc_id.clone(),
            user_id: self.user_id.clone(),
            name: local.name,
            color: self.color.clone(),
            cursor: local.cursor.to_string(),
            updated_at: self.clock.now(),
        }
    }

    /// Publish the local record once.
    pub async fn heartbeat(&self) -> Result<(), StoreError> {
        let record = self.local_record().await;
        self.store.upsert_presence(record).await
    }

    async fn beat(&self) {
        if let Err(e) = self.heartbeat().await {
            log::debug!("heartbeat for {} in {} failed: {e}", self.user_id, self.doc_id);
        }
    }

    /// Start publishing on a fixed interval. The first heartbeat goes out
    /// immediately. Dropping the handle stops the loop.
    pub fn start(self: &Arc<Self>) -> HeartbeatHandle {
        let channel = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = interval(channel.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                channel.beat().await;
            }
        });
        log::debug!("presence heartbeat started for {} in {}", self.user_id, self.doc_id);
        HeartbeatHandle { task }
    }

    /// Everyone else currently in the document.
    pub async fn active_peers(&self) -> Result<Vec<PresenceRecord>, StoreError> {
        let records = self.store.presence_by_doc(&self.doc_id).await?;
        Ok(fresh_peers(
            records,
            &self.user_id,
            self.clock.now(),
            self.staleness_ms,
        ))
    }

    /// Change notifications for this document's presence rows.
    pub async fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.feed.subscribe(&Topic::Presence(self.doc_id.clone())).await
    }

    /// Remove the local record so peers stop rendering it right away.
    pub async fn leave(&self) -> Result<(), StoreError> {
        self.store.remove_presence(&self.doc_id, &self.user_id).await
    }
}

/// Owns the heartbeat task.
#[derive(Debug)]
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
