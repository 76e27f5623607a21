use super::CommentError;
use folio_core::collab::{Anchor, BlockLookup, CommentView, SyncStatus, ThreadFilter, ThreadView};
use folio_core::{BlockId, Comment, CommentId, CommentThread, DocId, Millis, ThreadId, ThreadRows};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

/// A row type the cache can track.
pub trait Row: Clone + PartialEq {
    /// Soft-deleted rows stay in the table but are never shown.
    fn is_deleted(&self) -> bool {
        false
    }
}

impl Row for CommentThread {}

impl Row for Comment {
    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Local synchronization state of one cached row.
#[derive(Debug, Clone, PartialEq)]
pub enum Tracked<T> {
    /// Created locally under a temporary id; the remote create is in flight.
    Pending { value: T, issued_at: Millis },
    /// The remote write succeeded but the feed has not shown it yet.
    Confirmed { value: T, confirmed_at: Millis },
    /// The feed row is the value.
    Reconciled { value: T },
    /// A local edit is in flight. `prior` is restored if it fails.
    Editing {
        value: T,
        prior: Box<Tracked<T>>,
        issued_at: Millis,
    },
    /// Deleted locally. Hidden until the feed agrees.
    Tombstoned {
        value: T,
        prior: Box<Tracked<T>>,
        issued_at: Millis,
        /// `None` while the remote delete is in flight.
        confirmed_at: Option<Millis>,
    },
}

impl<T: Row> Tracked<T> {
    pub fn value(&self) -> &T {
        match self {
            Tracked::Pending { value, .. }
            | Tracked::Confirmed { value, .. }
            | Tracked::Reconciled { value }
            | Tracked::Editing { value, .. }
            | Tracked::Tombstoned { value, .. } => value,
        }
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self, Tracked::Tombstoned { .. }) && !self.value().is_deleted()
    }

    /// Whether a remote call for this row has not resolved yet.
    pub fn in_flight(&self) -> bool {
        matches!(
            self,
            Tracked::Pending { .. } | Tracked::Editing { .. } | Tracked::Tombstoned { confirmed_at: None, .. }
        )
    }

    pub fn status(&self) -> SyncStatus {
        match self {
            Tracked::Pending { .. } => SyncStatus::Pending,
            Tracked::Editing { .. } => SyncStatus::Editing,
            _ => SyncStatus::Synced,
        }
    }

    /// Fold the feed's view of this row (`None` when the feed lacks it).
    ///
    /// In-flight entries always survive. Settled local writes hold against a
    /// lagging feed for `grace_ms`, after which the feed wins.
    fn merge(self, row: Option<&T>, now: Millis, grace_ms: Millis) -> Option<Self> {
        match self {
            Tracked::Pending { .. } => Some(self),
            Tracked::Confirmed { value, confirmed_at } => {
                let expired = now - confirmed_at > grace_ms;
                match row {
                    Some(row) if *row == value || expired => Some(Tracked::Reconciled { value: row.clone() }),
                    Some(_) => Some(Tracked::Confirmed { value, confirmed_at }),
                    None if expired => None,
                    None => Some(Tracked::Confirmed { value, confirmed_at }),
                }
            }
            Tracked::Reconciled { .. } => row.map(|row| Tracked::Reconciled { value: row.clone() }),
            Tracked::Editing { value, prior, issued_at } => Some(Tracked::Editing {
                value,
                prior: refreshed(prior, row),
                issued_at,
            }),
            Tracked::Tombstoned {
                value,
                prior,
                issued_at,
                confirmed_at: None,
            } => Some(Tracked::Tombstoned {
                value,
                prior: refreshed(prior, row),
                issued_at,
                confirmed_at: None,
            }),
            Tracked::Tombstoned {
                value,
                prior,
                issued_at,
                confirmed_at: Some(confirmed_at),
            } => match row {
                Some(row) if row.is_deleted() || now - confirmed_at > grace_ms => {
                    Some(Tracked::Reconciled { value: row.clone() })
                }
                Some(_) => Some(Tracked::Tombstoned {
                    value,
                    prior,
                    issued_at,
                    confirmed_at: Some(confirmed_at),
                }),
                None => None,
            },
        }
    }
}

fn refreshed<T: Row>(prior: Box<Tracked<T>>, row: Option<&T>) -> Box<Tracked<T>> {
    match row {
        Some(row) => Box::new(Tracked::Reconciled { value: row.clone() }),
        None => prior,
    }
}

/// Why a row cannot take a local write right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blocked {
    Missing,
    NotSynced,
    InFlight,
}

/// Tracked rows of one kind, keyed by id.
#[derive(Debug, Clone, PartialEq)]
struct Table<K: Ord, T> {
    entries: BTreeMap<K, Tracked<T>>,
}

impl<K: Ord + Clone + Display, T: Row> Table<K, T> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    fn get(&self, id: &K) -> Option<&Tracked<T>> {
        self.entries.get(id)
    }

    fn insert_pending(&mut self, id: K, value: T, now: Millis) {
        self.entries.insert(id, Tracked::Pending { value, issued_at: now });
    }

    /// Record a successful remote create. An entry the feed already
    /// delivered under the same id is left alone.
    fn confirm(&mut self, id: K, value: T, now: Millis) {
        self.entries.entry(id).or_insert(Tracked::Confirmed {
            value,
            confirmed_at: now,
        });
    }

    fn discard(&mut self, id: &K) -> bool {
        self.entries.remove(id).is_some()
    }

    fn writable(&self, id: &K) -> Result<&Tracked<T>, Blocked> {
        let entry = self.entries.get(id).ok_or(Blocked::Missing)?;
        match entry {
            Tracked::Pending { .. } => Err(Blocked::NotSynced),
            e if e.in_flight() => Err(Blocked::InFlight),
            e if !e.is_visible() => Err(Blocked::Missing),
            e => Ok(e),
        }
    }

    fn begin_edit(&mut self, id: &K, value: T, now: Millis) -> Result<(), Blocked> {
        self.writable(id)?;
        if let Some(prior) = self.entries.remove(id) {
            self.entries.insert(
                id.clone(),
                Tracked::Editing {
                    value,
                    prior: Box::new(prior),
                    issued_at: now,
                },
            );
        }
        Ok(())
    }

    fn begin_delete(&mut self, id: &K, now: Millis) -> Result<(), Blocked> {
        self.writable(id)?;
        if let Some(prior) = self.entries.remove(id) {
            self.entries.insert(
                id.clone(),
                Tracked::Tombstoned {
                    value: prior.value().clone(),
                    prior: Box::new(prior),
                    issued_at: now,
                    confirmed_at: None,
                },
            );
        }
        Ok(())
    }

    /// The remote write for `id` succeeded and returned `row`.
    fn settle(&mut self, id: &K, row: T, now: Millis) {
        let Some(entry) = self.entries.remove(id) else {
            return;
        };
        let next = match entry {
            Tracked::Editing { .. } => Tracked::Confirmed {
                value: row,
                confirmed_at: now,
            },
            Tracked::Tombstoned {
                prior,
                issued_at,
                confirmed_at: None,
                ..
            } => Tracked::Tombstoned {
                value: row,
                prior,
                issued_at,
                confirmed_at: Some(now),
            },
            other => other,
        };
        self.entries.insert(id.clone(), next);
    }

    /// The remote write for `id` failed: restore what was there before.
    fn revert(&mut self, id: &K) {
        let Some(entry) = self.entries.remove(id) else {
            return;
        };
        let restored = match entry {
            Tracked::Editing { prior, .. }
            | Tracked::Tombstoned {
                prior,
                confirmed_at: None,
                ..
            } => *prior,
            other => other,
        };
        self.entries.insert(id.clone(), restored);
    }

    fn merge(&mut self, mut rows: BTreeMap<K, T>, now: Millis, grace_ms: Millis) {
        let current = std::mem::take(&mut self.entries);
        for (id, entry) in current {
            let row = rows.remove(&id);
            if let Some(next) = entry.merge(row.as_ref(), now, grace_ms) {
                self.entries.insert(id, next);
            }
        }
        for (id, row) in rows {
            self.entries.insert(id, Tracked::Reconciled { value: row });
        }
    }

    fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.in_flight()).count()
    }
}

fn thread_blocked(id: &ThreadId, blocked: Blocked) -> CommentError {
    match blocked {
        Blocked::Missing => CommentError::ThreadNotFound(id.clone()),
        Blocked::NotSynced => CommentError::ThreadNotSynced(id.clone()),
        Blocked::InFlight => CommentError::MutationInFlight(id.to_string()),
    }
}

fn comment_blocked(id: &CommentId, blocked: Blocked) -> CommentError {
    match blocked {
        Blocked::Missing => CommentError::CommentNotFound(id.clone()),
        Blocked::NotSynced => CommentError::CommentNotSynced(id.clone()),
        Blocked::InFlight => CommentError::MutationInFlight(id.to_string()),
    }
}

/// Per-document projection of the thread and comment tables.
///
/// Never the source of truth: dropping it and merging a fresh remote read
/// rebuilds everything except writes still in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadCache {
    doc_id: DocId,
    grace_ms: Millis,
    threads: Table<ThreadId, CommentThread>,
    comments: Table<CommentId, Comment>,
    /// Visible threads by anchor block.
    anchors: BTreeMap<BlockId, BTreeSet<ThreadId>>,
}

impl ThreadCache {
    pub fn new(doc_id: DocId, grace_ms: Millis) -> Self {
        Self {
            doc_id,
            grace_ms,
            threads: Table::new(),
            comments: Table::new(),
            anchors: BTreeMap::new(),
        }
    }

    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    // ─── Reconciliation ───────────────────────────────────────────

    /// Merge an authoritative snapshot of every thread of the document.
    /// Rows of other documents are ignored.
    pub fn merge_remote(&mut self, snapshot: Vec<ThreadRows>, now: Millis) {
        let mut threads = BTreeMap::new();
        let mut comments = BTreeMap::new();
        for rows in snapshot {
            if rows.thread.doc_id != self.doc_id {
                log::debug!("ignoring thread {} of {}", rows.thread.id, rows.thread.doc_id);
                continue;
            }
            for comment in rows.comments {
                comments.insert(comment.id.clone(), comment);
            }
            threads.insert(rows.thread.id.clone(), rows.thread);
        }
        let remote = threads.len();

        self.threads.merge(threads, now, self.grace_ms);
        self.comments.merge(comments, now, self.grace_ms);
        self.reindex();
        log::debug!(
            "merged {remote} remote threads into {}; {} local writes outstanding",
            self.doc_id,
            self.threads.pending_count() + self.comments.pending_count()
        );
    }

    fn reindex(&mut self) {
        self.anchors.clear();
        for (id, entry) in &self.threads.entries {
            if entry.is_visible() {
                self.anchors
                    .entry(entry.value().block_id.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
    }

    // ─── Optimistic writes ────────────────────────────────────────

    pub fn insert_pending_thread(&mut self, thread: CommentThread, root: Comment, now: Millis) {
        self.threads.insert_pending(thread.id.clone(), thread, now);
        self.comments.insert_pending(root.id.clone(), root, now);
        self.reindex();
    }

    /// Swap a pending thread and its root for the rows the store created.
    pub fn confirm_thread(&mut self, temp_thread: &ThreadId, temp_root: &CommentId, rows: ThreadRows, now: Millis) {
        self.threads.discard(temp_thread);
        self.comments.discard(temp_root);
        self.threads.confirm(rows.thread.id.clone(), rows.thread, now);
        for comment in rows.comments {
            self.comments.confirm(comment.id.clone(), comment, now);
        }
        self.reindex();
    }

    pub fn discard_thread(&mut self, temp_thread: &ThreadId, temp_root: &CommentId) {
        self.threads.discard(temp_thread);
        self.comments.discard(temp_root);
        self.reindex();
    }

    pub fn insert_pending_comment(&mut self, comment: Comment, now: Millis) {
        self.comments.insert_pending(comment.id.clone(), comment, now);
    }

    pub fn confirm_comment(&mut self, temp: &CommentId, row: Comment, now: Millis) {
        self.comments.discard(temp);
        self.comments.confirm(row.id.clone(), row, now);
    }

    pub fn discard_comment(&mut self, temp: &CommentId) {
        self.comments.discard(temp);
    }

    pub fn begin_comment_edit(&mut self, value: Comment, now: Millis) -> Result<(), CommentError> {
        let id = value.id.clone();
        self.comments
            .begin_edit(&id, value, now)
            .map_err(|b| comment_blocked(&id, b))
    }

    pub fn begin_comment_delete(&mut self, id: &CommentId, now: Millis) -> Result<(), CommentError> {
        self.comments.begin_delete(id, now).map_err(|b| comment_blocked(id, b))
    }

    pub fn settle_comment(&mut self, id: &CommentId, row: Comment, now: Millis) {
        self.comments.settle(id, row, now);
    }

    pub fn revert_comment(&mut self, id: &CommentId) {
        self.comments.revert(id);
    }

    pub fn begin_thread_edit(&mut self, value: CommentThread, now: Millis) -> Result<(), CommentError> {
        let id = value.id.clone();
        self.threads
            .begin_edit(&id, value, now)
            .map_err(|b| thread_blocked(&id, b))?;
        self.reindex();
        Ok(())
    }

    pub fn settle_thread(&mut self, id: &ThreadId, row: CommentThread, now: Millis) {
        self.threads.settle(id, row, now);
        self.reindex();
    }

    pub fn revert_thread(&mut self, id: &ThreadId) {
        self.threads.revert(id);
        self.reindex();
    }

    /// Writable thread: synced, visible and not mid-write.
    pub fn writable_thread(&self, id: &ThreadId) -> Result<&CommentThread, CommentError> {
        self.threads
            .writable(id)
            .map(Tracked::value)
            .map_err(|b| thread_blocked(id, b))
    }

    pub fn writable_comment(&self, id: &CommentId) -> Result<&Comment, CommentError> {
        self.comments
            .writable(id)
            .map(Tracked::value)
            .map_err(|b| comment_blocked(id, b))
    }

    pub fn thread_entry(&self, id: &ThreadId) -> Option<&Tracked<CommentThread>> {
        self.threads.get(id)
    }

    pub fn comment_entry(&self, id: &CommentId) -> Option<&Tracked<Comment>> {
        self.comments.get(id)
    }

    /// Rows with a remote call still outstanding.
    pub fn in_flight(&self) -> usize {
        self.threads.pending_count() + self.comments.pending_count()
    }

    // ─── Queries ──────────────────────────────────────────────────

    fn comments_by_thread(&self) -> BTreeMap<&ThreadId, Vec<CommentView>> {
        let mut grouped: BTreeMap<&ThreadId, Vec<CommentView>> = BTreeMap::new();
        for entry in self.comments.entries.values().filter(|e| e.is_visible()) {
            let comment = entry.value();
            grouped.entry(&comment.thread_id).or_default().push(CommentView {
                comment: comment.clone(),
                status: entry.status(),
            });
        }
        for views in grouped.values_mut() {
            views.sort_by(|a, b| {
                a.comment
                    .created_at
                    .cmp(&b.comment.created_at)
                    .then_with(|| a.comment.id.cmp(&b.comment.id))
            });
        }
        grouped
    }

    /// Earliest comment per thread over every row held, deleted ones included.
    fn roots(&self) -> BTreeMap<&ThreadId, &Comment> {
        let mut roots: BTreeMap<&ThreadId, &Comment> = BTreeMap::new();
        for comment in self.comments.entries.values().map(|e| e.value()) {
            let root = roots.entry(&comment.thread_id).or_insert(comment);
            if (comment.created_at, &comment.id) < (root.created_at, &root.id) {
                *root = comment;
            }
        }
        roots
    }

    fn views<'a>(&self, ids: impl Iterator<Item = &'a ThreadId>) -> Vec<ThreadView> {
        let mut grouped = self.comments_by_thread();
        let roots = self.roots();
        let mut views: Vec<ThreadView> = ids
            .filter_map(|id| {
                let entry = self.threads.get(id).filter(|e| e.is_visible())?;
                Some(ThreadView {
                    thread: entry.value().clone(),
                    root_id: roots.get(id).map(|c| c.id.clone()),
                    comments: grouped.remove(id).unwrap_or_default(),
                    status: entry.status(),
                })
            })
            .collect();
        views.sort_by(|a, b| {
            a.thread
                .created_at
                .cmp(&b.thread.created_at)
                .then_with(|| a.thread.id.cmp(&b.thread.id))
        });
        views
    }

    /// Every visible thread, oldest first. Threads whose comments were all
    /// deleted are still listed, with no comments.
    pub fn threads(&self) -> Vec<ThreadView> {
        self.views(self.threads.entries.keys())
    }

    pub fn thread(&self, id: &ThreadId) -> Option<ThreadView> {
        self.views(std::iter::once(id)).into_iter().next()
    }

    pub fn threads_for_block(&self, block_id: &BlockId) -> Vec<ThreadView> {
        match self.anchors.get(block_id) {
            Some(ids) => self.views(ids.iter()),
            None => Vec::new(),
        }
    }

    pub fn filtered(&self, filter: ThreadFilter) -> Vec<ThreadView> {
        let mut views = self.threads();
        views.retain(|view| filter.matches(&view.thread));
        views
    }

    /// Blocks carrying an open thread with at least one visible comment.
    pub fn blocks_with_comments(&self) -> BTreeSet<BlockId> {
        self.threads()
            .into_iter()
            .filter(|view| !view.thread.resolved && !view.comments.is_empty())
            .map(|view| view.thread.block_id)
            .collect()
    }

    /// Where each visible thread sits in `doc`. A missing block leaves the
    /// thread unattached.
    pub fn resolve_anchors(&self, doc: &impl BlockLookup) -> Vec<(ThreadId, Anchor)> {
        self.threads()
            .into_iter()
            .map(|view| {
                let anchor = match doc.block_range(&view.thread.block_id) {
                    Some(range) => Anchor::Attached {
                        block_id: view.thread.block_id.clone(),
                        range,
                    },
                    None => Anchor::Unattached,
                };
                (view.thread.id, anchor)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::UserId;
    use std::ops::Range;

    const GRACE: Millis = 5_000;

    fn thread(id: &str, block: &str, created_at: Millis) -> CommentThread {
        CommentThread {
            id: ThreadId::from(id),
            doc_id: DocId::from("d1"),
            block_id: BlockId::from(block),
            created_at,
            resolved: false,
            creator_id: UserId::from("alice"),
        }
    }

    fn comment(id: &str, thread_id: &str, created_at: Millis) -> Comment {
        Comment {
            id: CommentId::from(id),
            thread_id: ThreadId::from(thread_id),
            doc_id: DocId::from("d1"),
            block_id: BlockId::from("b1"),
            author_id: UserId::from("alice"),
            content: format!("comment {id}"),
            created_at,
            updated_at: created_at,
            deleted: false,
            parent_comment_id: None,
        }
    }

    fn rows(thread: CommentThread, comments: Vec<Comment>) -> ThreadRows {
        ThreadRows { thread, comments }
    }

    fn seeded() -> ThreadCache {
        let mut cache = ThreadCache::new(DocId::from("d1"), GRACE);
        cache.merge_remote(
            vec![
                rows(thread("t1", "b1", 10), vec![comment("c1", "t1", 10), comment("c2", "t1", 20)]),
                rows(thread("t2", "b2", 30), vec![comment("c3", "t2", 30)]),
            ],
            1_000,
        );
        cache
    }

    struct Blocks(Vec<(BlockId, Range<usize>)>);

    impl BlockLookup for Blocks {
        fn block_range(&self, block_id: &BlockId) -> Option<Range<usize>> {
            self.0.iter().find(|(id, _)| id == block_id).map(|(_, r)| r.clone())
        }

        fn size(&self) -> usize {
            self.0.iter().map(|(_, r)| r.end).max().unwrap_or(0)
        }
    }

    #[test]
    fn test_merge_builds_views() {
        let cache = seeded();
        let threads = cache.threads();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].thread.id.as_str(), "t1");
        assert_eq!(threads[0].root().unwrap().comment.id.as_str(), "c1");
        assert_eq!(threads[0].comments.len(), 2);
        assert!(threads.iter().all(|t| t.status == SyncStatus::Synced));
        assert_eq!(cache.threads_for_block(&BlockId::from("b2")).len(), 1);
        assert!(cache.threads_for_block(&BlockId::from("b9")).is_empty());
    }

    #[test]
    fn test_deleted_root_is_not_replaced_by_reply() {
        let mut root = comment("c1", "t1", 10);
        root.deleted = true;
        let mut cache = ThreadCache::new(DocId::from("d1"), GRACE);
        cache.merge_remote(
            vec![rows(thread("t1", "b1", 10), vec![comment("c2", "t1", 20), root])],
            1_000,
        );

        let view = cache.thread(&ThreadId::from("t1")).unwrap();
        assert_eq!(view.root_id, Some(CommentId::from("c1")));
        assert_eq!(view.comments.len(), 1);
        assert!(view.root().is_none());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let snapshot = vec![rows(thread("t1", "b1", 10), vec![comment("c1", "t1", 10)])];
        let mut cache = ThreadCache::new(DocId::from("d1"), GRACE);
        cache.insert_pending_thread(thread("tmp-x", "b3", 50), comment("tmp-y", "tmp-x", 50), 900);
        cache.merge_remote(snapshot.clone(), 1_000);
        let once = cache.clone();
        cache.merge_remote(snapshot, 1_000);
        assert_eq!(cache, once);
        assert_eq!(cache.threads().len(), 2);
    }

    #[test]
    fn test_merge_ignores_other_documents() {
        let mut foreign = thread("t9", "b1", 10);
        foreign.doc_id = DocId::from("elsewhere");
        let mut cache = ThreadCache::new(DocId::from("d1"), GRACE);
        cache.merge_remote(vec![rows(foreign, vec![])], 0);
        assert!(cache.threads().is_empty());
    }

    #[test]
    fn test_pending_survives_stale_snapshot() {
        let mut cache = seeded();
        cache.insert_pending_thread(thread("tmp-t", "b5", 100), comment("tmp-c", "tmp-t", 100), 1_000);
        cache.merge_remote(vec![], 1_000_000);
        let threads = cache.threads();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].status, SyncStatus::Pending);
        assert_eq!(threads[0].comments[0].status, SyncStatus::Pending);
    }

    #[test]
    fn test_confirmed_held_during_grace_then_dropped() {
        let mut cache = ThreadCache::new(DocId::from("d1"), GRACE);
        cache.insert_pending_thread(thread("tmp-t", "b1", 0), comment("tmp-c", "tmp-t", 0), 0);
        cache.confirm_thread(
            &ThreadId::from("tmp-t"),
            &CommentId::from("tmp-c"),
            rows(thread("t1", "b1", 0), vec![comment("c1", "t1", 0)]),
            1_000,
        );
        assert!(cache.thread(&ThreadId::from("tmp-t")).is_none());
        assert!(cache.thread(&ThreadId::from("t1")).is_some());

        // Feed has not caught up yet
        cache.merge_remote(vec![], 2_000);
        assert!(cache.thread(&ThreadId::from("t1")).is_some());

        cache.merge_remote(vec![], 1_000 + GRACE + 1);
        assert!(cache.thread(&ThreadId::from("t1")).is_none());
    }

    #[test]
    fn test_confirmed_becomes_reconciled() {
        let mut cache = ThreadCache::new(DocId::from("d1"), GRACE);
        let confirmed = rows(thread("t1", "b1", 0), vec![comment("c1", "t1", 0)]);
        cache.confirm_thread(&ThreadId::from("tmp-t"), &CommentId::from("tmp-c"), confirmed.clone(), 0);
        cache.merge_remote(vec![confirmed], 10);
        assert!(matches!(
            cache.thread_entry(&ThreadId::from("t1")),
            Some(Tracked::Reconciled { .. })
        ));
    }

    #[test]
    fn test_feed_first_then_confirm_keeps_feed_row() {
        let mut cache = ThreadCache::new(DocId::from("d1"), GRACE);
        cache.insert_pending_thread(thread("tmp-t", "b1", 0), comment("tmp-c", "tmp-t", 0), 0);
        let remote = rows(thread("t1", "b1", 0), vec![comment("c1", "t1", 0)]);
        cache.merge_remote(vec![remote.clone()], 5);
        cache.confirm_thread(&ThreadId::from("tmp-t"), &CommentId::from("tmp-c"), remote, 6);
        assert_eq!(cache.threads().len(), 1);
        assert!(matches!(
            cache.comment_entry(&CommentId::from("c1")),
            Some(Tracked::Reconciled { .. })
        ));
    }

    #[test]
    fn test_discard_restores_prior_state() {
        let mut cache = seeded();
        let before = cache.clone();
        cache.insert_pending_thread(thread("tmp-t", "b9", 100), comment("tmp-c", "tmp-t", 100), 100);
        assert_ne!(cache, before);
        cache.discard_thread(&ThreadId::from("tmp-t"), &CommentId::from("tmp-c"));
        assert_eq!(cache, before);
    }

    #[test]
    fn test_edit_revert() {
        let mut cache = seeded();
        let before = cache.clone();
        let mut edited = cache.writable_comment(&CommentId::from("c1")).unwrap().clone();
        edited.content = "changed".into();
        cache.begin_comment_edit(edited.clone(), 2_000).unwrap();
        assert_eq!(cache.thread(&ThreadId::from("t1")).unwrap().comments[0].status, SyncStatus::Editing);

        let again = cache.begin_comment_edit(edited, 2_001).unwrap_err();
        assert!(matches!(again, CommentError::MutationInFlight(_)));

        cache.revert_comment(&CommentId::from("c1"));
        assert_eq!(cache, before);
    }

    #[test]
    fn test_edit_settles_and_holds_over_stale_feed() {
        let mut cache = seeded();
        let original = cache.writable_comment(&CommentId::from("c1")).unwrap().clone();
        let mut edited = original.clone();
        edited.content = "changed".into();
        cache.begin_comment_edit(edited.clone(), 2_000).unwrap();
        cache.settle_comment(&CommentId::from("c1"), edited.clone(), 2_100);

        let stale = vec![
            rows(thread("t1", "b1", 10), vec![original.clone(), comment("c2", "t1", 20)]),
            rows(thread("t2", "b2", 30), vec![comment("c3", "t2", 30)]),
        ];
        cache.merge_remote(stale.clone(), 3_000);
        let shown = &cache.thread(&ThreadId::from("t1")).unwrap().comments[0].comment;
        assert_eq!(shown.content, "changed");

        // Grace over: the feed wins
        cache.merge_remote(stale, 2_100 + GRACE + 1);
        let shown = &cache.thread(&ThreadId::from("t1")).unwrap().comments[0].comment;
        assert_eq!(shown.content, original.content);
    }

    #[test]
    fn test_tombstone_hides_until_feed_agrees() {
        let mut cache = seeded();
        let snapshot = vec![
            rows(thread("t1", "b1", 10), vec![comment("c1", "t1", 10), comment("c2", "t1", 20)]),
            rows(thread("t2", "b2", 30), vec![comment("c3", "t2", 30)]),
        ];
        cache.begin_comment_delete(&CommentId::from("c2"), 2_000).unwrap();
        assert_eq!(cache.thread(&ThreadId::from("t1")).unwrap().comments.len(), 1);

        // Refresh lands while the delete is in flight
        cache.merge_remote(snapshot.clone(), 2_050);
        assert_eq!(cache.thread(&ThreadId::from("t1")).unwrap().comments.len(), 1);

        let mut deleted = comment("c2", "t1", 20);
        deleted.deleted = true;
        cache.settle_comment(&CommentId::from("c2"), deleted.clone(), 2_100);
        cache.merge_remote(snapshot, 2_200);
        assert_eq!(cache.thread(&ThreadId::from("t1")).unwrap().comments.len(), 1);

        let caught_up = vec![
            rows(thread("t1", "b1", 10), vec![comment("c1", "t1", 10), deleted]),
            rows(thread("t2", "b2", 30), vec![comment("c3", "t2", 30)]),
        ];
        cache.merge_remote(caught_up, 2_300);
        assert!(matches!(
            cache.comment_entry(&CommentId::from("c2")),
            Some(Tracked::Reconciled { .. })
        ));
        assert_eq!(cache.thread(&ThreadId::from("t1")).unwrap().comments.len(), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_pending_rows_are_not_writable() {
        let mut cache = seeded();
        cache.insert_pending_comment(comment("tmp-c", "t1", 50), 50);
        let err = cache.begin_comment_delete(&CommentId::from("tmp-c"), 60).unwrap_err();
        assert_eq!(err, CommentError::CommentNotSynced(CommentId::from("tmp-c")));
        let err = cache.writable_thread(&ThreadId::from("nope")).unwrap_err();
        assert_eq!(err, CommentError::ThreadNotFound(ThreadId::from("nope")));
    }

    #[test]
    fn test_empty_thread_still_listed() {
        let mut cache = ThreadCache::new(DocId::from("d1"), GRACE);
        let mut gone = comment("c1", "t1", 10);
        gone.deleted = true;
        cache.merge_remote(vec![rows(thread("t1", "b1", 10), vec![gone])], 0);
        let threads = cache.threads();
        assert_eq!(threads.len(), 1);
        assert!(threads[0].comments.is_empty());
        assert!(cache.blocks_with_comments().is_empty());
    }

    #[test]
    fn test_filters_and_markers() {
        let mut cache = seeded();
        let mut resolved = cache.writable_thread(&ThreadId::from("t2")).unwrap().clone();
        resolved.resolved = true;
        cache.begin_thread_edit(resolved.clone(), 2_000).unwrap();
        cache.settle_thread(&ThreadId::from("t2"), resolved, 2_001);

        assert_eq!(cache.filtered(ThreadFilter::All).len(), 2);
        let open = cache.filtered(ThreadFilter::Open);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].thread.id.as_str(), "t1");
        assert_eq!(cache.filtered(ThreadFilter::Resolved)[0].thread.id.as_str(), "t2");

        let markers = cache.blocks_with_comments();
        assert_eq!(markers.into_iter().collect::<Vec<_>>(), vec![BlockId::from("b1")]);
    }

    #[test]
    fn test_resolve_anchors_tolerates_missing_blocks() {
        let cache = seeded();
        let doc = Blocks(vec![(BlockId::from("b1"), 0..5)]);
        let anchors = cache.resolve_anchors(&doc);
        assert_eq!(
            anchors,
            vec![
                (
                    ThreadId::from("t1"),
                    Anchor::Attached {
                        block_id: BlockId::from("b1"),
                        range: 0..5
                    }
                ),
                (ThreadId::from("t2"), Anchor::Unattached),
            ]
        );
    }
}
