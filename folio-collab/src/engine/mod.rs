//! Editor document host.
//!
//! Holds the authoritative replica of every open editor document and
//! persists it as a base snapshot plus a log of numbered updates:
//!
//! ```text
//!   apply_steps ──► EditorDocument ──► update ──► SnapshotStore.append_update
//!                         │                              │
//!                         │              seq - base ≥ threshold
//!                         ▼                              ▼
//!                 DocumentFeedEvent::Steps      save_snapshot + truncate_updates
//! ```
//!
//! A document not yet in memory is recovered from its snapshot and the
//! updates logged after it.

mod host;

pub use host::{DocumentEngine, DocumentStats};

use crate::store::StoreError;
use async_trait::async_trait;
use folio_core::collab::{DocumentError, Mapping, Step};
use folio_core::DocId;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    AlreadyExists(DocId),
    NotFound(DocId),
    InvalidStep(String),
    Decode(String),
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AlreadyExists(id) => write!(f, "Document already exists: {id}"),
            EngineError::NotFound(id) => write!(f, "Document not found: {id}"),
            EngineError::InvalidStep(e) => write!(f, "Invalid step: {e}"),
            EngineError::Decode(e) => write!(f, "Decode error: {e}"),
            EngineError::Store(e) => write!(f, "Store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

impl From<DocumentError> for EngineError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::InvalidStep(msg) => EngineError::InvalidStep(msg),
            DocumentError::Decode(msg) | DocumentError::Apply(msg) => EngineError::Decode(msg),
        }
    }
}

/// Published on a document's feed after every change.
#[derive(Debug, Clone)]
pub enum DocumentFeedEvent {
    /// Full state, sent when a document is created.
    Snapshot { doc_id: DocId, snapshot: Arc<Vec<u8>> },
    /// One applied batch of steps.
    Steps {
        doc_id: DocId,
        seq: u64,
        steps: Arc<Vec<Step>>,
        mapping: Arc<Mapping>,
        update: Arc<Vec<u8>>,
    },
}

/// Registers new editor documents.
#[async_trait]
pub trait DocumentProvisioner: Send + Sync {
    async fn create_document(&self, doc_id: &DocId, initial_snapshot: &[u8]) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_error_conversion() {
        let err: EngineError = DocumentError::InvalidStep("bad".into()).into();
        assert_eq!(err, EngineError::InvalidStep("bad".into()));
        let err: EngineError = DocumentError::Apply("broken".into()).into();
        assert!(matches!(err, EngineError::Decode(_)));
    }
}
