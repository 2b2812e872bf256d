//! # Folio Editor
//!
//! Transactional document store for schema-validated structured text.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Editor: apply / undo / redo                 │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ TransactionManager                          │
//! │  - FIFO lock with timeout                   │
//! │  - one overlay per transaction              │
//! │  - commit or discard, then publish event    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ OperationRegistry → StoreView → NodeStore   │
//! │  every operation validates against Schema   │
//! │  and returns its inverse                    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **All or nothing**: a failed transaction leaves the store exactly as it was
//! 2. **Every edit is reversible**: operations return exact inverses
//! 3. **Readers see committed state only**: queries never observe an overlay
//! 4. **`content` is authoritative**: parent links follow child lists
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_editor::{Editor, Operation};
//! use folio_common::NodeData;
//!
//! let editor = Editor::new(schema);
//!
//! let result = editor
//!     .apply(vec![
//!         Operation::create(NodeData::text("t", "text", "Hello")),
//!         Operation::create(NodeData::element("p", "paragraph").with_content(vec!["t".into()])),
//!         Operation::create(NodeData::element("d", "doc").with_content(vec!["p".into()])),
//!     ])
//!     .await;
//! assert!(result.success);
//!
//! assert_eq!(editor.store().to_absolute(&"t".into(), 0)?, 2);
//!
//! editor.undo().await?;
//! ```

mod config;
mod editor;
mod errors;
mod events;
mod history;
mod lock;
pub mod operations;
mod position;
mod registry;
mod snapshot;
mod store;
mod transaction;

pub use config::{EditorConfig, HistoryConfig, DEFAULT_CONFIG_NAME};
pub use editor::Editor;
pub use errors::{EditorError, OperationError, PositionError, SnapshotError, TransactionError};
pub use events::{EditorEvent, EventBus, DEFAULT_EVENT_CAPACITY};
pub use history::{History, HistoryEntry};
pub use lock::{LockGuard, TransactionLock, DEFAULT_LOCK_TIMEOUT};
pub use position::{MapStep, NodePosition, PositionCalculator, PositionMapping, Selection};
pub use registry::{
    Operation, OperationHandler, OperationOutcome, OperationRegistry, TypedOperation,
};
pub use snapshot::Snapshot;
pub use store::{
    Committed, DocumentInfo, KeepTombstones, NodeStore, Overlay, PurgeOlderThan, PurgePolicy,
    QueryOptions, StoreView,
};
pub use transaction::{
    OperationRecord, Origin, TransactionManager, TransactionRecord, TransactionResult,
};

// Re-export common types for convenience
pub use folio_common::{Mark, MarkRange, Node, NodeData, NodeId};
pub use folio_schema::Schema;
