//! In-memory backing store.
//!
//! Same contract as the RocksDB store, held in plain maps behind one
//! `tokio::sync::RwLock`. The lock is released before change events go out.

use super::{
    check_author, check_content, check_creator, check_new_page, comment_row, not_found, page_row,
    thread_rows, ChangeFeed, CommentRepo, PageStore, PresenceStore, SnapshotStore, StoreError,
};
use crate::broadcast::{FeedHub, StoreEvent, Topic};
use async_trait::async_trait;
use folio_core::ordering::sort_siblings;
use folio_core::{
    Comment, CommentId, CommentThread, DocId, DocumentId, Millis, NewComment, NewPage, NewThread,
    Page, PageId, PagePatch, PresenceRecord, ThreadId, ThreadRows, UserId,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{broadcast, RwLock};

#[derive(Default)]
struct Tables {
    pages: HashMap<PageId, Page>,
    threads: HashMap<ThreadId, CommentThread>,
    comments: HashMap<CommentId, Comment>,
    presence: HashMap<(DocId, UserId), PresenceRecord>,
    snapshots: HashMap<DocId, Vec<u8>>,
    updates: HashMap<DocId, BTreeMap<u64, Vec<u8>>>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    feeds: FeedHub<Topic, StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(256)
    }

    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            feeds: FeedHub::new(capacity),
        }
    }

    async fn announce(&self, event: StoreEvent) {
        self.feeds.publish(&event.topic(), event).await;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn insert_page(&self, page: NewPage) -> Result<Page, StoreError> {
        check_new_page(&page)?;
        let page = page_row(page);
        self.tables.write().await.pages.insert(page.id.clone(), page.clone());
        log::debug!("inserted page {} into document {}", page.id, page.document_id);
        self.announce(StoreEvent::PagesChanged(page.document_id.clone())).await;
        Ok(page)
    }

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>, StoreError> {
        Ok(self.tables.read().await.pages.get(id).cloned())
    }

    async fn patch_page(&self, id: &PageId, patch: PagePatch) -> Result<Page, StoreError> {
        let page = {
            let mut tables = self.tables.write().await;
            let page = tables.pages.get_mut(id).ok_or_else(|| not_found("page", id))?;
            patch.apply(page);
            page.clone()
        };
        self.announce(StoreEvent::PagesChanged(page.document_id.clone())).await;
        Ok(page)
    }

    async fn delete_page(&self, id: &PageId) -> Result<bool, StoreError> {
        let removed = self.tables.write().await.pages.remove(id);
        match removed {
            Some(page) => {
                self.announce(StoreEvent::PagesChanged(page.document_id)).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pages_by_parent(
        &self,
        document_id: &DocumentId,
        parent: Option<&PageId>,
    ) -> Result<Vec<Page>, StoreError> {
        let mut pages: Vec<Page> = self
            .tables
            .read()
            .await
            .pages
            .values()
            .filter(|p| &p.document_id == document_id && p.parent_page_id.as_ref() == parent)
            .cloned()
            .collect();
        sort_siblings(&mut pages);
        Ok(pages)
    }

    async fn pages_by_document(&self, document_id: &DocumentId) -> Result<Vec<Page>, StoreError> {
        let mut pages: Vec<Page> = self
            .tables
            .read()
            .await
            .pages
            .values()
            .filter(|p| &p.document_id == document_id)
            .cloned()
            .collect();
        sort_siblings(&mut pages);
        Ok(pages)
    }
}

#[async_trait]
impl CommentRepo for MemoryStore {
    async fn create_thread(&self, new: NewThread) -> Result<ThreadRows, StoreError> {
        check_content(&new.content)?;
        let rows = thread_rows(new);
        {
            let mut tables = self.tables.write().await;
            tables.threads.insert(rows.thread.id.clone(), rows.thread.clone());
            for comment in &rows.comments {
                tables.comments.insert(comment.id.clone(), comment.clone());
            }
        }
        self.announce(StoreEvent::ThreadsChanged(rows.thread.doc_id.clone())).await;
        Ok(rows)
    }

    async fn add_comment(&self, new: NewComment) -> Result<Comment, StoreError> {
        check_content(&new.content)?;
        let comment = {
            let mut tables = self.tables.write().await;
            let thread = tables
                .threads
                .get(&new.thread_id)
                .ok_or_else(|| not_found("thread", &new.thread_id))?;
            let comment = comment_row(thread, new);
            tables.comments.insert(comment.id.clone(), comment.clone());
            comment
        };
        self.announce(StoreEvent::ThreadsChanged(comment.doc_id.clone())).await;
        Ok(comment)
    }

    async fn update_comment(
        &self,
        id: &CommentId,
        editor: &UserId,
        content: String,
        now: Millis,
    ) -> Result<Comment, StoreError> {
        check_content(&content)?;
        let comment = {
            let mut tables = self.tables.write().await;
            let comment = tables
                .comments
                .get_mut(id)
                .filter(|c| !c.deleted)
                .ok_or_else(|| not_found("comment", id))?;
            check_author(comment, editor)?;
            comment.content = content;
            comment.updated_at = now;
            comment.clone()
        };
        self.announce(StoreEvent::ThreadsChanged(comment.doc_id.clone())).await;
        Ok(comment)
    }

    async fn delete_comment(
        &self,
        id: &CommentId,
        editor: &UserId,
        now: Millis,
    ) -> Result<Comment, StoreError> {
        let comment = {
            let mut tables = self.tables.write().await;
            let comment = tables
                .comments
                .get_mut(id)
                .ok_or_else(|| not_found("comment", id))?;
            check_author(comment, editor)?;
            if !comment.deleted {
                comment.deleted = true;
                comment.updated_at = now;
            }
            comment.clone()
        };
        self.announce(StoreEvent::ThreadsChanged(comment.doc_id.clone())).await;
        Ok(comment)
    }

    async fn set_thread_resolved(
        &self,
        id: &ThreadId,
        caller: &UserId,
        resolved: bool,
    ) -> Result<CommentThread, StoreError> {
        let thread = {
            let mut tables = self.tables.write().await;
            let thread = tables
                .threads
                .get_mut(id)
                .ok_or_else(|| not_found("thread", id))?;
            check_creator(thread, caller)?;
            thread.resolved = resolved;
            thread.clone()
        };
        self.announce(StoreEvent::ThreadsChanged(thread.doc_id.clone())).await;
        Ok(thread)
    }

    async fn threads_by_doc(&self, doc_id: &DocId) -> Result<Vec<ThreadRows>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<ThreadRows> = tables
            .threads
            .values()
            .filter(|t| &t.doc_id == doc_id)
            .map(|thread| {
                let mut comments: Vec<Comment> = tables
                    .comments
                    .values()
                    .filter(|c| c.thread_id == thread.id)
                    .cloned()
                    .collect();
                comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                ThreadRows {
                    thread: thread.clone(),
                    comments,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            a.thread
                .created_at
                .cmp(&b.thread.created_at)
                .then_with(|| a.thread.id.cmp(&b.thread.id))
        });
        Ok(rows)
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn upsert_presence(&self, record: PresenceRecord) -> Result<(), StoreError> {
        let doc_id = record.doc_id.clone();
        {
            let mut tables = self.tables.write().await;
            let key = (record.doc_id.clone(), record.user_id.clone());
            if let Some(existing) = tables.presence.get(&key) {
                if existing.updated_at > record.updated_at {
                    return Ok(());
                }
            }
            tables.presence.insert(key, record);
        }
        self.announce(StoreEvent::PresenceChanged(doc_id)).await;
        Ok(())
    }

    async fn presence_by_doc(&self, doc_id: &DocId) -> Result<Vec<PresenceRecord>, StoreError> {
        let mut records: Vec<PresenceRecord> = self
            .tables
            .read()
            .await
            .presence
            .values()
            .filter(|r| &r.doc_id == doc_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(records)
    }

    async fn remove_presence(&self, doc_id: &DocId, user_id: &UserId) -> Result<(), StoreError> {
        let removed = self
            .tables
            .write()
            .await
            .presence
            .remove(&(doc_id.clone(), user_id.clone()));
        if removed.is_some() {
            self.announce(StoreEvent::PresenceChanged(doc_id.clone())).await;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save_snapshot(&self, doc_id: &DocId, snapshot: &[u8]) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .snapshots
            .insert(doc_id.clone(), snapshot.to_vec());
        Ok(())
    }

    async fn load_snapshot(&self, doc_id: &DocId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tables.read().await.snapshots.get(doc_id).cloned())
    }

    async fn append_update(&self, doc_id: &DocId, seq: u64, update: &[u8]) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .updates
            .entry(doc_id.clone())
            .or_default()
            .insert(seq, update.to_vec());
        Ok(())
    }

    async fn load_updates(&self, doc_id: &DocId) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .updates
            .get(doc_id)
            .map(|log| log.iter().map(|(seq, u)| (*seq, u.clone())).collect())
            .unwrap_or_default())
    }

    async fn truncate_updates(&self, doc_id: &DocId, up_to: u64) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(log) = tables.updates.get_mut(doc_id) else {
            return Ok(0);
        };
        let keep = log.split_off(&up_to.saturating_add(1));
        let removed = log.len() as u64;
        *log = keep;
        Ok(removed)
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<StoreEvent> {
        self.feeds.subscribe(topic).await
    }
}
