//! The editor document replica.
//!
//! ```text
//!   yrs Doc
//!   ├── Text "content" : block texts joined by '\n'
//!   └── Text "blocks"  : block ids joined by '\n', one per content line
//! ```
//!
//! Positions are UTF-8 byte offsets into the content text. A [`Step`] is
//! validated against a plain-string layout first and only then written to
//! the yrs document, so a rejected batch leaves the replica untouched.

use super::mapping::{Mapping, StepMap};
use crate::BlockId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use yrs::updates::decoder::Decode;
use yrs::{
    Doc, GetString, OffsetKind, Options, ReadTxn, StateVector, Text, TextRef, Transact, Update,
};
use yrs::updates::encoder::Encode;

const CONTENT: &str = "content";
const BLOCKS: &str = "blocks";
const SEPARATOR: char = '\n';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    InvalidStep(String),
    Decode(String),
    Apply(String),
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::InvalidStep(msg) => write!(f, "Invalid step: {}", msg),
            DocumentError::Decode(msg) => write!(f, "Update decode error: {}", msg),
            DocumentError::Apply(msg) => write!(f, "Update apply error: {}", msg),
        }
    }
}

impl std::error::Error for DocumentError {}

impl From<yrs::encoding::read::Error> for DocumentError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        DocumentError::Decode(e.to_string())
    }
}

/// One atomic document change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// Insert single-line text at `pos`.
    InsertText { pos: usize, text: String },
    /// Delete `from..to`. Deleting a block boundary merges the two blocks.
    Delete { from: usize, to: usize },
    /// Split the block containing `pos`; the tail becomes block `block_id`.
    SplitBlock { pos: usize, block_id: BlockId },
    /// Add a new last block.
    AppendBlock { block_id: BlockId, text: String },
}

/// Read access to the block layout of a document.
pub trait BlockLookup {
    /// Byte range of a block's text, separator excluded.
    fn block_range(&self, block_id: &BlockId) -> Option<Range<usize>>;
    /// Total content size in bytes.
    fn size(&self) -> usize;
}

/// Outcome of [`EditorDocument::apply_steps`].
#[derive(Debug, Clone)]
pub struct AppliedSteps {
    pub mapping: Mapping,
    /// Encoded v1 update carrying exactly these steps.
    pub update: Vec<u8>,
}

// ───────────────────────────────────────────────────────────────────
// Layout
// ───────────────────────────────────────────────────────────────────

enum Target {
    Content,
    Blocks,
}

enum Edit {
    Insert { target: Target, at: usize, text: String },
    Remove { target: Target, at: usize, len: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Layout {
    content: String,
    blocks: Vec<BlockId>,
}

impl Layout {
    fn read(content: String, blocks: &str) -> Self {
        let blocks = if blocks.is_empty() {
            Vec::new()
        } else {
            blocks.split(SEPARATOR).map(BlockId::from).collect()
        };
        Self { content, blocks }
    }

    fn block_index_at(&self, pos: usize) -> usize {
        self.content[..pos].matches(SEPARATOR).count()
    }

    /// Byte offset just past block id `idx` in the blocks text.
    fn id_line_end(&self, idx: usize) -> usize {
        self.blocks[..=idx].iter().map(|b| b.as_str().len()).sum::<usize>() + idx
    }

    fn check_pos(&self, pos: usize) -> Result<(), DocumentError> {
        if pos > self.content.len() || !self.content.is_char_boundary(pos) {
            return Err(DocumentError::InvalidStep(format!(
                "position {} is outside the document or inside a character",
                pos
            )));
        }
        Ok(())
    }

    fn check_new_block(&self, block_id: &BlockId) -> Result<(), DocumentError> {
        if block_id.as_str().is_empty() || block_id.as_str().contains(SEPARATOR) {
            return Err(DocumentError::InvalidStep(format!("malformed block id {:?}", block_id.as_str())));
        }
        if self.blocks.contains(block_id) {
            return Err(DocumentError::InvalidStep(format!("block {} already exists", block_id)));
        }
        Ok(())
    }

    fn check_line(text: &str) -> Result<(), DocumentError> {
        if text.contains(SEPARATOR) {
            return Err(DocumentError::InvalidStep("text may not contain a line break".into()));
        }
        Ok(())
    }

    /// Apply one step in place, returning its step map and the text edits
    /// that reproduce it on the yrs document.
    fn apply(&mut self, step: &Step) -> Result<(StepMap, Vec<Edit>), DocumentError> {
        match step {
            Step::InsertText { pos, text } => {
                Self::check_line(text)?;
                self.check_pos(*pos)?;
                if self.blocks.is_empty() {
                    return Err(DocumentError::InvalidStep("document has no block to insert into".into()));
                }
                self.content.insert_str(*pos, text);
                let edits = vec![Edit::Insert { target: Target::Content, at: *pos, text: text.clone() }];
                Ok((StepMap::replace(*pos, 0, text.len()), edits))
            }
            Step::Delete { from, to } => {
                if from > to {
                    return Err(DocumentError::InvalidStep(format!("empty range {}..{}", from, to)));
                }
                self.check_pos(*from)?;
                self.check_pos(*to)?;
                if from == to {
                    return Ok((StepMap::identity(), Vec::new()));
                }
                let merged = self.content[*from..*to].matches(SEPARATOR).count();
                let mut edits = vec![Edit::Remove { target: Target::Content, at: *from, len: to - from }];
                if merged > 0 {
                    let idx = self.block_index_at(*from);
                    let at = self.id_line_end(idx);
                    let len: usize = self.blocks[idx + 1..=idx + merged]
                        .iter()
                        .map(|b| b.as_str().len() + 1)
                        .sum();
                    edits.push(Edit::Remove { target: Target::Blocks, at, len });
                    self.blocks.drain(idx + 1..=idx + merged);
                }
                self.content.replace_range(*from..*to, "");
                Ok((StepMap::replace(*from, to - from, 0), edits))
            }
            Step::SplitBlock { pos, block_id } => {
                self.check_pos(*pos)?;
                self.check_new_block(block_id)?;
                if self.blocks.is_empty() {
                    return Err(DocumentError::InvalidStep("document has no block to split".into()));
                }
                let idx = self.block_index_at(*pos);
                let at = self.id_line_end(idx);
                self.content.insert(*pos, SEPARATOR);
                self.blocks.insert(idx + 1, block_id.clone());
                let edits = vec![
                    Edit::Insert { target: Target::Content, at: *pos, text: SEPARATOR.to_string() },
                    Edit::Insert { target: Target::Blocks, at, text: format!("{}{}", SEPARATOR, block_id) },
                ];
                Ok((StepMap::replace(*pos, 0, 1), edits))
            }
            Step::AppendBlock { block_id, text } => {
                Self::check_line(text)?;
                self.check_new_block(block_id)?;
                let content_at = self.content.len();
                let (content_text, id_text, blocks_at) = if self.blocks.is_empty() {
                    (text.clone(), block_id.to_string(), 0)
                } else {
                    (
                        format!("{}{}", SEPARATOR, text),
                        format!("{}{}", SEPARATOR, block_id),
                        self.id_line_end(self.blocks.len() - 1),
                    )
                };
                self.content.push_str(&content_text);
                self.blocks.push(block_id.clone());
                let map = StepMap::replace(content_at, 0, content_text.len());
                let edits = vec![
                    Edit::Insert { target: Target::Content, at: content_at, text: content_text },
                    Edit::Insert { target: Target::Blocks, at: blocks_at, text: id_text },
                ];
                Ok((map, edits))
            }
        }
    }

    fn block_range(&self, block_id: &BlockId) -> Option<Range<usize>> {
        let idx = self.blocks.iter().position(|b| b == block_id)?;
        let mut start = 0;
        for (i, line) in self.content.split(SEPARATOR).enumerate() {
            if i == idx {
                return Some(start..start + line.len());
            }
            start += line.len() + 1;
        }
        None
    }
}

// ───────────────────────────────────────────────────────────────────
// EditorDocument
// ───────────────────────────────────────────────────────────────────

/// A yrs-backed editor document with a cached block layout.
pub struct EditorDocument {
    doc: Doc,
    content: TextRef,
    blocks: TextRef,
    layout: Layout,
}

impl EditorDocument {
    pub fn new() -> Self {
        Self::with_options(Options {
            offset_kind: OffsetKind::Bytes,
            ..Options::default()
        })
    }

    fn with_options(options: Options) -> Self {
        let doc = Doc::with_options(options);
        let content = doc.get_or_insert_text(CONTENT);
        let blocks = doc.get_or_insert_text(BLOCKS);
        Self {
            doc,
            content,
            blocks,
            layout: Layout::default(),
        }
    }

    /// Rebuild a replica from [`snapshot`](Self::snapshot) bytes.
    pub fn from_snapshot(snapshot: &[u8]) -> Result<Self, DocumentError> {
        let mut document = Self::new();
        if !snapshot.is_empty() {
            document.apply_update(snapshot)?;
        }
        Ok(document)
    }

    /// Full document state as a v1 update.
    pub fn snapshot(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Run `steps` against a private copy of this replica and return the
    /// result without touching `self`. Merge the returned update with
    /// [`apply_update`](Self::apply_update) to commit it.
    pub fn stage_steps(&self, steps: &[Step]) -> Result<AppliedSteps, DocumentError> {
        let mut fork = Self::with_options(Options {
            client_id: self.doc.client_id(),
            offset_kind: OffsetKind::Bytes,
            ..Options::default()
        });
        fork.apply_update(&self.snapshot())?;
        fork.apply_steps(steps)
    }

    /// Apply a batch of steps. Either every step applies or none does.
    pub fn apply_steps(&mut self, steps: &[Step]) -> Result<AppliedSteps, DocumentError> {
        let mut next = self.layout.clone();
        let mut mapping = Mapping::new();
        let mut edits = Vec::new();
        for step in steps {
            let (map, step_edits) = next.apply(step).inspect_err(|e| {
                log::debug!("rejected {step:?}: {e}");
            })?;
            mapping.push(map);
            edits.extend(step_edits);
        }

        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            for edit in edits {
                match edit {
                    Edit::Insert { target, at, text } => {
                        self.text_ref(&target).insert(&mut txn, at as u32, &text);
                    }
                    Edit::Remove { target, at, len } => {
                        self.text_ref(&target).remove_range(&mut txn, at as u32, len as u32);
                    }
                }
            }
        }
        let update = self.doc.transact().encode_diff_v1(&before);
        self.layout = next;
        Ok(AppliedSteps { mapping, update })
    }

    /// Merge an encoded update produced by another replica.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<(), DocumentError> {
        let update = Update::decode_v1(update).inspect_err(|e| {
            log::warn!("dropping undecodable update: {e}");
        })?;
        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| DocumentError::Apply(e.to_string()))?;
        }
        self.refresh_layout();
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.layout.content
    }

    pub fn block_ids(&self) -> &[BlockId] {
        &self.layout.blocks
    }

    pub fn block_text(&self, block_id: &BlockId) -> Option<&str> {
        self.layout
            .block_range(block_id)
            .map(|range| &self.layout.content[range])
    }

    fn text_ref(&self, target: &Target) -> &TextRef {
        match target {
            Target::Content => &self.content,
            Target::Blocks => &self.blocks,
        }
    }

    fn refresh_layout(&mut self) {
        let txn = self.doc.transact();
        let content = self.content.get_string(&txn);
        let blocks = self.blocks.get_string(&txn);
        self.layout = Layout::read(content, &blocks);
    }
}

impl Default for EditorDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockLookup for EditorDocument {
    fn block_range(&self, block_id: &BlockId) -> Option<Range<usize>> {
        self.layout.block_range(block_id)
    }

    fn size(&self) -> usize {
        self.layout.content.len()
    }
}
