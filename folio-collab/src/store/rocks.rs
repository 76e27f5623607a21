//! RocksDB-backed persistent store.
//!
//! Column families:
//! - `pages`         : page rows (bincode), keyed by page id
//! - `page_index`    : `document 0x1F parent 0x1F page` → empty, prefix-scanned per sibling group
//! - `threads`       : thread rows, keyed by thread id
//! - `thread_index`  : `doc 0x1F thread` → empty
//! - `comments`      : comment rows, keyed by comment id
//! - `comment_index` : `thread 0x1F comment` → empty
//! - `presence`      : `doc 0x1F user` → presence row
//! - `snapshots`     : editor document snapshots (LZ4 compressed)
//! - `updates`       : `doc 0x1F seq:8 bytes BE` → LZ4-compressed update
//!
//! Every write of a row and its index entry goes through one `WriteBatch`.

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
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

const CF_PAGES: &str = "pages";
const CF_PAGE_INDEX: &str = "page_index";
const CF_THREADS: &str = "threads";
const CF_THREAD_INDEX: &str = "thread_index";
const CF_COMMENTS: &str = "comments";
const CF_COMMENT_INDEX: &str = "comment_index";
const CF_PRESENCE: &str = "presence";
const CF_SNAPSHOTS: &str = "snapshots";
const CF_UPDATES: &str = "updates";

const COLUMN_FAMILIES: &[&str] = &[
    CF_PAGES,
    CF_PAGE_INDEX,
    CF_THREADS,
    CF_THREAD_INDEX,
    CF_COMMENTS,
    CF_COMMENT_INDEX,
    CF_PRESENCE,
    CF_SNAPSHOTS,
    CF_UPDATES,
];

/// Separates the parts of a composite key.
const KEY_SEP: u8 = 0x1F;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
    /// Messages buffered per change-feed subscriber (default: 256)
    pub feed_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("folio_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
            feed_capacity: 256,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
            feed_capacity: 64,
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

fn composite_key(parts: &[&[u8]]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEP);
        }
        key.extend_from_slice(part);
    }
    key
}

/// A composite key prefix, separator included, for prefix scans.
fn prefix(parts: &[&[u8]]) -> Vec<u8> {
    let mut key = composite_key(parts);
    key.push(KEY_SEP);
    key
}

/// An id as one part of a composite key. Ids holding the separator would
/// alias other keys in prefix scans, so they are refused.
fn id_part(id: &str) -> Result<&[u8], StoreError> {
    if id.as_bytes().contains(&KEY_SEP) {
        return Err(StoreError::InvalidRecord(format!("id {id:?} contains the key separator")));
    }
    Ok(id.as_bytes())
}

fn parent_part(parent: Option<&PageId>) -> Result<&[u8], StoreError> {
    match parent {
        Some(p) => id_part(p.as_str()),
        None => Ok(&[]),
    }
}

fn page_index_key(page: &Page) -> Result<Vec<u8>, StoreError> {
    Ok(composite_key(&[
        id_part(page.document_id.as_str())?,
        parent_part(page.parent_page_id.as_ref())?,
        id_part(page.id.as_str())?,
    ]))
}

fn update_key(doc_id: &DocId, seq: u64) -> Result<Vec<u8>, StoreError> {
    Ok(composite_key(&[id_part(doc_id.as_str())?, &seq.to_be_bytes()]))
}

/// RocksDB-backed store for every table.
pub struct RocksStore {
    /// RocksDB instance (single-threaded mode, concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    feeds: FeedHub<Topic, StoreEvent>,
}

impl RocksStore {
    /// Open the store at the configured path, creating it if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("opened store at {}", config.path.display());

        Ok(Self {
            db,
            feeds: FeedHub::new(config.feed_capacity),
            config,
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_PAGES | CF_THREADS | CF_COMMENTS => {
                // Point lookups by id
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_SNAPSHOTS | CF_UPDATES => {
                // Payloads are already LZ4 compressed
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, StoreError> {
        let cf = self.cf(cf)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Keys and values under `prefix`, in key order.
    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError> {
        let cf = self.cf(cf)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    /// Trailing id component of an index key.
    fn last_part(key: &[u8]) -> Result<String, StoreError> {
        let tail = key
            .rsplit(|b| *b == KEY_SEP)
            .next()
            .unwrap_or_default();
        String::from_utf8(tail.to_vec())
            .map_err(|e| StoreError::DeserializationError(format!("Invalid index key: {e}")))
    }

    fn pages_under(&self, prefix: &[u8]) -> Result<Vec<Page>, StoreError> {
        let mut pages = Vec::new();
        for (key, _) in self.scan_prefix(CF_PAGE_INDEX, prefix)? {
            let id = Self::last_part(&key)?;
            if let Some(page) = self.get_row::<Page>(CF_PAGES, id.as_bytes())? {
                pages.push(page);
            }
        }
        sort_siblings(&mut pages);
        Ok(pages)
    }

    fn comments_of(&self, thread_id: &ThreadId) -> Result<Vec<Comment>, StoreError> {
        let mut comments = Vec::new();
        for (key, _) in self.scan_prefix(CF_COMMENT_INDEX, &prefix(&[id_part(thread_id.as_str())?]))? {
            let id = Self::last_part(&key)?;
            if let Some(comment) = self.get_row::<Comment>(CF_COMMENTS, id.as_bytes())? {
                comments.push(comment);
            }
        }
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(comments)
    }

    fn put_comment(&self, comment: &Comment) -> Result<(), StoreError> {
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_COMMENTS)?, comment.id.as_str(), encode(comment)?);
        batch.put_cf(
            self.cf(CF_COMMENT_INDEX)?,
            composite_key(&[id_part(comment.thread_id.as_str())?, id_part(comment.id.as_str())?]),
            b"",
        );
        self.write(batch)
    }

    fn load_comment(&self, id: &CommentId) -> Result<Comment, StoreError> {
        self.get_row::<Comment>(CF_COMMENTS, id.as_str().as_bytes())?
            .ok_or_else(|| not_found("comment", id))
    }

    async fn announce(&self, event: StoreEvent) {
        self.feeds.publish(&event.topic(), event).await;
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[async_trait]
impl PageStore for RocksStore {
    async fn insert_page(&self, page: NewPage) -> Result<Page, StoreError> {
        check_new_page(&page)?;
        let page = page_row(page);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PAGES)?, page.id.as_str(), encode(&page)?);
        batch.put_cf(self.cf(CF_PAGE_INDEX)?, page_index_key(&page)?, b"");
        self.write(batch)?;
        log::debug!("inserted page {} into document {}", page.id, page.document_id);
        self.announce(StoreEvent::PagesChanged(page.document_id.clone())).await;
        Ok(page)
    }

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>, StoreError> {
        self.get_row(CF_PAGES, id.as_str().as_bytes())
    }

    async fn patch_page(&self, id: &PageId, patch: PagePatch) -> Result<Page, StoreError> {
        let mut page: Page = self
            .get_row(CF_PAGES, id.as_str().as_bytes())?
            .ok_or_else(|| not_found("page", id))?;
        patch.apply(&mut page);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PAGES)?, page.id.as_str(), encode(&page)?);
        self.write(batch)?;
        self.announce(StoreEvent::PagesChanged(page.document_id.clone())).await;
        Ok(page)
    }

    async fn delete_page(&self, id: &PageId) -> Result<bool, StoreError> {
        let Some(page) = self.get_row::<Page>(CF_PAGES, id.as_str().as_bytes())? else {
            return Ok(false);
        };
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_PAGES)?, page.id.as_str());
        batch.delete_cf(self.cf(CF_PAGE_INDEX)?, page_index_key(&page)?);
        self.write(batch)?;
        self.announce(StoreEvent::PagesChanged(page.document_id)).await;
        Ok(true)
    }

    async fn pages_by_parent(
        &self,
        document_id: &DocumentId,
        parent: Option<&PageId>,
    ) -> Result<Vec<Page>, StoreError> {
        self.pages_under(&prefix(&[id_part(document_id.as_str())?, parent_part(parent)?]))
    }

    async fn pages_by_document(&self, document_id: &DocumentId) -> Result<Vec<Page>, StoreError> {
        self.pages_under(&prefix(&[id_part(document_id.as_str())?]))
    }
}

#[async_trait]
impl CommentRepo for RocksStore {
    async fn create_thread(&self, new: NewThread) -> Result<ThreadRows, StoreError> {
        check_content(&new.content)?;
        let rows = thread_rows(new);
        let thread = &rows.thread;
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_THREADS)?, thread.id.as_str(), encode(thread)?);
        batch.put_cf(
            self.cf(CF_THREAD_INDEX)?,
            composite_key(&[id_part(thread.doc_id.as_str())?, id_part(thread.id.as_str())?]),
            b"",
        );
        for comment in &rows.comments {
            batch.put_cf(self.cf(CF_COMMENTS)?, comment.id.as_str(), encode(comment)?);
            batch.put_cf(
                self.cf(CF_COMMENT_INDEX)?,
                composite_key(&[id_part(thread.id.as_str())?, id_part(comment.id.as_str())?]),
                b"",
            );
        }
        self.write(batch)?;
        self.announce(StoreEvent::ThreadsChanged(thread.doc_id.clone())).await;
        Ok(rows)
    }

    async fn add_comment(&self, new: NewComment) -> Result<Comment, StoreError> {
        check_content(&new.content)?;
        let thread: CommentThread = self
            .get_row(CF_THREADS, new.thread_id.as_str().as_bytes())?
            .ok_or_else(|| not_found("thread", &new.thread_id))?;
        let comment = comment_row(&thread, new);
        self.put_comment(&comment)?;
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
        let mut comment = self.load_comment(id)?;
        if comment.deleted {
            return Err(not_found("comment", id));
        }
        check_author(&comment, editor)?;
        comment.content = content;
        comment.updated_at = now;
        self.put_comment(&comment)?;
        self.announce(StoreEvent::ThreadsChanged(comment.doc_id.clone())).await;
        Ok(comment)
    }

    async fn delete_comment(
        &self,
        id: &CommentId,
        editor: &UserId,
        now: Millis,
    ) -> Result<Comment, StoreError> {
        let mut comment = self.load_comment(id)?;
        check_author(&comment, editor)?;
        if !comment.deleted {
            comment.deleted = true;
            comment.updated_at = now;
            self.put_comment(&comment)?;
        }
        self.announce(StoreEvent::ThreadsChanged(comment.doc_id.clone())).await;
        Ok(comment)
    }

    async fn set_thread_resolved(
        &self,
        id: &ThreadId,
        caller: &UserId,
        resolved: bool,
    ) -> Result<CommentThread, StoreError> {
        let mut thread: CommentThread = self
            .get_row(CF_THREADS, id.as_str().as_bytes())?
            .ok_or_else(|| not_found("thread", id))?;
        check_creator(&thread, caller)?;
        thread.resolved = resolved;
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_THREADS)?, thread.id.as_str(), encode(&thread)?);
        self.write(batch)?;
        self.announce(StoreEvent::ThreadsChanged(thread.doc_id.clone())).await;
        Ok(thread)
    }

    async fn threads_by_doc(&self, doc_id: &DocId) -> Result<Vec<ThreadRows>, StoreError> {
        let mut rows = Vec::new();
        for (key, _) in self.scan_prefix(CF_THREAD_INDEX, &prefix(&[id_part(doc_id.as_str())?]))? {
            let id = ThreadId::from(Self::last_part(&key)?);
            if let Some(thread) = self.get_row::<CommentThread>(CF_THREADS, id.as_str().as_bytes())? {
                let comments = self.comments_of(&id)?;
                rows.push(ThreadRows { thread, comments });
            }
        }
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
impl PresenceStore for RocksStore {
    async fn upsert_presence(&self, record: PresenceRecord) -> Result<(), StoreError> {
        let key = composite_key(&[id_part(record.doc_id.as_str())?, id_part(record.user_id.as_str())?]);
        if let Some(existing) = self.get_row::<PresenceRecord>(CF_PRESENCE, &key)? {
            if existing.updated_at > record.updated_at {
                return Ok(());
            }
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PRESENCE)?, &key, encode(&record)?);
        self.write(batch)?;
        self.announce(StoreEvent::PresenceChanged(record.doc_id)).await;
        Ok(())
    }

    async fn presence_by_doc(&self, doc_id: &DocId) -> Result<Vec<PresenceRecord>, StoreError> {
        self.scan_prefix(CF_PRESENCE, &prefix(&[id_part(doc_id.as_str())?]))?
            .iter()
            .map(|(_, value)| decode::<PresenceRecord>(value))
            .collect()
    }

    async fn remove_presence(&self, doc_id: &DocId, user_id: &UserId) -> Result<(), StoreError> {
        let key = composite_key(&[id_part(doc_id.as_str())?, id_part(user_id.as_str())?]);
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_PRESENCE)?, &key);
        self.write(batch)?;
        self.announce(StoreEvent::PresenceChanged(doc_id.clone())).await;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for RocksStore {
    async fn save_snapshot(&self, doc_id: &DocId, snapshot: &[u8]) -> Result<(), StoreError> {
        let compressed = lz4_flex::compress_prepend_size(snapshot);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_SNAPSHOTS)?, doc_id.as_str(), &compressed);
        self.write(batch)?;
        log::debug!(
            "saved snapshot for {doc_id}: {} bytes ({} compressed)",
            snapshot.len(),
            compressed.len()
        );
        Ok(())
    }

    async fn load_snapshot(&self, doc_id: &DocId) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_SNAPSHOTS)?;
        match self.db.get_cf(cf, doc_id.as_str())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map(Some)
                .map_err(|e| StoreError::CompressionError(e.to_string())),
            None => Ok(None),
        }
    }

    async fn append_update(&self, doc_id: &DocId, seq: u64, update: &[u8]) -> Result<(), StoreError> {
        let compressed = lz4_flex::compress_prepend_size(update);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_UPDATES)?, update_key(doc_id, seq)?, &compressed);
        self.write(batch)
    }

    async fn load_updates(&self, doc_id: &DocId) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let prefix = prefix(&[id_part(doc_id.as_str())?]);
        let mut updates = Vec::new();
        for (key, value) in self.scan_prefix(CF_UPDATES, &prefix)? {
            let seq_bytes: [u8; 8] = key[prefix.len()..]
                .try_into()
                .map_err(|_| StoreError::DeserializationError("Invalid update key".into()))?;
            let update = lz4_flex::decompress_size_prepended(&value)
                .map_err(|e| StoreError::CompressionError(e.to_string()))?;
            updates.push((u64::from_be_bytes(seq_bytes), update));
        }
        Ok(updates)
    }

    async fn truncate_updates(&self, doc_id: &DocId, up_to: u64) -> Result<u64, StoreError> {
        let prefix = prefix(&[id_part(doc_id.as_str())?]);
        let end_key = update_key(doc_id, up_to)?;
        let cf = self.cf(CF_UPDATES)?;

        let mut count = 0u64;
        let mut batch = WriteBatch::default();
        for (key, _) in self.scan_prefix(CF_UPDATES, &prefix)? {
            if key.as_ref() > end_key.as_slice() {
                break;
            }
            batch.delete_cf(cf, &key);
            count += 1;
        }

        if count > 0 {
            self.write(batch)?;
        }
        Ok(count)
    }
}

#[async_trait]
impl ChangeFeed for RocksStore {
    async fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<StoreEvent> {
        self.feeds.subscribe(topic).await
    }
}
