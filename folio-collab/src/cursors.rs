//! Remote cursor decorations.
//!
//! Presence updates rebuild the decoration set from scratch. Local document
//! changes only shift the positions already held, through the change's
//! [`PositionMapper`]. Decorations are plain values: nothing here can touch
//! document content.

use crate::presence::DEFAULT_NAME;
use folio_core::collab::{Bias, PositionMapper};
use folio_core::{PresenceRecord, UserId};

/// Used when a peer's record carries no color.
pub const DEFAULT_CURSOR_COLOR: &str = "#3b82f6";

/// One remote caret: a widget at `pos` with a name label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorDecoration {
    /// Stable widget key, `cursor-<userId>`.
    pub key: String,
    pub user_id: UserId,
    pub name: String,
    pub color: String,
    pub pos: usize,
}

impl CursorDecoration {
    /// Clamp the record's offset into `0..=doc_size`.
    pub fn from_record(record: &PresenceRecord, doc_size: usize) -> Self {
        let name = if record.name.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            record.name.clone()
        };
        let color = if record.color.is_empty() {
            DEFAULT_CURSOR_COLOR.to_string()
        } else {
            record.color.clone()
        };
        Self {
            key: format!("cursor-{}", record.user_id),
            user_id: record.user_id.clone(),
            name,
            color,
            pos: record.cursor_offset().min(doc_size),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CursorDecorationProjector {
    decorations: Vec<CursorDecoration>,
}

impl CursorDecorationProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every decoration with one per peer record.
    pub fn set_peers(&mut self, peers: &[PresenceRecord], doc_size: usize) {
        let mut records: Vec<&PresenceRecord> = peers.iter().collect();
        // Newest first within a user, so dedup keeps the latest record
        records.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        records.dedup_by(|later, kept| later.user_id == kept.user_id);
        self.decorations = records
            .into_iter()
            .map(|record| CursorDecoration::from_record(record, doc_size))
            .collect();
    }

    /// Shift every decoration through a local change.
    pub fn map_through(&mut self, mapper: &impl PositionMapper, doc_size: usize) {
        for decoration in &mut self.decorations {
            decoration.pos = mapper.map_pos(decoration.pos, Bias::After).min(doc_size);
        }
    }

    pub fn decorations(&self) -> &[CursorDecoration] {
        &self.decorations
    }

    pub fn get(&self, user_id: &UserId) -> Option<&CursorDecoration> {
        self.decorations.iter().find(|d| &d.user_id == user_id)
    }

    pub fn len(&self) -> usize {
        self.decorations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorations.is_empty()
    }

    pub fn clear(&mut self) {
        self.decorations.clear();
    }
}
