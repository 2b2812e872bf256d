//! Error types for the editor

use folio_common::NodeId;
use folio_schema::{SchemaError, ValidationResult};
use thiserror::Error;

/// Failure of a single operation. Aborts the enclosing transaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("Schema violation: {0}")]
    Schema(ValidationResult),

    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Node already exists: {0}")]
    AlreadyExists(NodeId),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid payload for '{op}': {reason}")]
    InvalidPayload { op: String, reason: String },

    #[error("Would create cycle")]
    CycleDetected,

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Offset {offset} out of range for node {id} (length {len})")]
    OffsetOutOfRange { id: NodeId, offset: usize, len: usize },

    #[error("Mark '{kind}' not found on node {id}")]
    MarkNotFound { id: NodeId, kind: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("Lock {lock_id} timed out after {waited_ms}ms")]
    LockTimeout { lock_id: String, waited_ms: u64 },

    #[error("Operation {index} ('{op_type}') failed: {source}")]
    Operation {
        index: usize,
        op_type: String,
        source: OperationError,
    },

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("An overlay is already open on this store")]
    OverlayBusy,
}

impl TransactionError {
    /// The operation error behind this failure, if any
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            TransactionError::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("Offset {offset} is outside the document (end {end})")]
    OutOfBounds { offset: usize, end: usize },

    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Node {0} is not attached to a document")]
    NotInDocument(NodeId),

    #[error("Local offset {offset} is not addressable in node {id} (length {len})")]
    LocalOffsetOutOfRange { id: NodeId, offset: usize, len: usize },
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot was taken with schema '{found}', expected '{expected}'")]
    SchemaMismatch { expected: String, found: String },

    #[error("Snapshot failed validation: {0}")]
    Validation(ValidationResult),

    #[error("Snapshot integrity violation: {0}")]
    Integrity(String),
}

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Position error: {0}")]
    Position(#[from] PositionError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}
