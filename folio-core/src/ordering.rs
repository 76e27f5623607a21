//! Fractional order keys for sibling pages.
//!
//! A sibling group is the set of pages sharing `(document_id, parent_page_id)`.
//! Positions inside a group are plain `f64` keys; inserting or moving one
//! item only ever computes a key for that item, never rewrites its siblings.
//!
//! ```text
//!   append        : max(keys) + 1        (1.0 for an empty group)
//!   before first  : key(first) - 1
//!   before X      : (key(prev) + key(X)) / 2
//! ```
//!
//! Repeated midpoint insertion into the same gap halves it each time; after
//! roughly fifty splits two neighbours can no longer be separated.
//! [`gap_exhausted`] detects that state. Nothing here renumbers a group.

use crate::{Millis, Page, PageId};
use std::cmp::Ordering;

/// Key of the first item in an empty group.
pub const INITIAL_KEY: f64 = 1.0;

/// Key between two optional neighbours.
pub fn midpoint(prev: Option<f64>, next: Option<f64>) -> f64 {
    match (prev, next) {
        (None, None) => INITIAL_KEY,
        (None, Some(next)) => next - 1.0,
        (Some(prev), None) => prev + 1.0,
        (Some(prev), Some(next)) => (prev + next) / 2.0,
    }
}

/// Whether `prev` and `next` are too close for a midpoint to fall strictly
/// between them.
pub fn gap_exhausted(prev: f64, next: f64) -> bool {
    let mid = (prev + next) / 2.0;
    !mid.is_finite() || mid <= prev || mid >= next
}

/// Anything that occupies a slot in a sibling group.
pub trait Sibling {
    type Id: Ord + Clone;

    fn sibling_id(&self) -> &Self::Id;
    fn order_key(&self) -> f64;
    fn created_at(&self) -> Millis;
}

impl Sibling for Page {
    type Id = PageId;

    fn sibling_id(&self) -> &PageId {
        &self.id
    }

    fn order_key(&self) -> f64 {
        self.order_key
    }

    fn created_at(&self) -> Millis {
        self.created_at
    }
}

/// Total order over siblings: key, then creation time, then id.
pub fn compare_siblings<S: Sibling>(a: &S, b: &S) -> Ordering {
    a.order_key()
        .total_cmp(&b.order_key())
        .then_with(|| a.created_at().cmp(&b.created_at()))
        .then_with(|| a.sibling_id().cmp(b.sibling_id()))
}

/// Sort a sibling group into display order.
pub fn sort_siblings<S: Sibling>(items: &mut [S]) {
    items.sort_by(compare_siblings);
}

/// Where a moved or inserted item should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement<Id> {
    End,
    Before(Id),
}

#[derive(Debug, Clone)]
struct Slot<Id> {
    id: Id,
    key: f64,
    created_at: Millis,
}

/// A sorted snapshot of one sibling group's keys.
#[derive(Debug, Clone)]
pub struct OrderedSiblingSet<Id> {
    slots: Vec<Slot<Id>>,
}

impl<Id: Ord + Clone> Default for OrderedSiblingSet<Id> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<Id: Ord + Clone> OrderedSiblingSet<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows already filtered to one sibling group.
    pub fn from_siblings<'a, S>(items: impl IntoIterator<Item = &'a S>) -> Self
    where
        S: Sibling<Id = Id> + 'a,
    {
        let mut set = Self::new();
        for item in items {
            set.insert(item.sibling_id().clone(), item.order_key(), item.created_at());
        }
        set
    }

    /// Insert or replace an entry, keeping the set sorted.
    pub fn insert(&mut self, id: Id, key: f64, created_at: Millis) {
        self.remove(&id);
        let slot = Slot { id, key, created_at };
        let at = self
            .slots
            .partition_point(|s| compare_slots(s, &slot) == Ordering::Less);
        self.slots.insert(at, slot);
    }

    pub fn remove(&mut self, id: &Id) -> Option<f64> {
        let idx = self.slots.iter().position(|s| &s.id == id)?;
        Some(self.slots.remove(idx).key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn key_of(&self, id: &Id) -> Option<f64> {
        self.slots.iter().find(|s| &s.id == id).map(|s| s.key)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.slots.iter().any(|s| &s.id == id)
    }

    /// Ids in display order.
    pub fn ids(&self) -> impl Iterator<Item = &Id> {
        self.slots.iter().map(|s| &s.id)
    }

    /// Key for a new item appended after every current sibling.
    pub fn append_key(&self) -> f64 {
        let max = self.slots.iter().map(|s| s.key).reduce(f64::max);
        midpoint(max, None)
    }

    /// Key for `moving` (or a brand new item when `None`) at `placement`.
    ///
    /// The moving item is excluded before neighbours are resolved, so it can
    /// never be its own neighbour. A `Before` target that is not in the group
    /// resolves to append. Placing an item before itself keeps its key.
    pub fn key_for(&self, moving: Option<&Id>, placement: &Placement<Id>) -> f64 {
        let current = moving.and_then(|id| self.key_of(id));
        let rest: Vec<&Slot<Id>> = self
            .slots
            .iter()
            .filter(|s| Some(&s.id) != moving)
            .collect();

        let target = match placement {
            Placement::End => None,
            Placement::Before(target) => {
                if Some(target) == moving {
                    if let Some(key) = current {
                        return key;
                    }
                }
                rest.iter().position(|s| &s.id == target)
            }
        };

        match target {
            Some(idx) => {
                let prev = idx.checked_sub(1).map(|p| rest[p].key);
                midpoint(prev, Some(rest[idx].key))
            }
            None => midpoint(rest.iter().map(|s| s.key).reduce(f64::max), None),
        }
    }

    /// Whether any adjacent pair can no longer be split by a midpoint.
    pub fn has_exhausted_gap(&self) -> bool {
        self.slots
            .windows(2)
            .any(|pair| gap_exhausted(pair[0].key, pair[1].key))
    }
}

fn compare_slots<Id: Ord>(a: &Slot<Id>, b: &Slot<Id>) -> Ordering {
    a.key
        .total_cmp(&b.key)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
