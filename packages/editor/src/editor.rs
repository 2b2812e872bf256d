//! # Editor
//!
//! One store, its transaction manager and the user's undo history.

use crate::config::EditorConfig;
use crate::errors::{EditorError, SnapshotError, TransactionError};
use crate::events::EditorEvent;
use crate::history::History;
use crate::position::Selection;
use crate::registry::{Operation, OperationRegistry};
use crate::snapshot::Snapshot;
use crate::store::{NodeStore, PurgePolicy};
use crate::transaction::{Origin, TransactionManager, TransactionResult};
use folio_common::NodeId;
use folio_schema::Schema;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub struct Editor {
    manager: TransactionManager,
    history: Mutex<History>,
    config: EditorConfig,
}

impl Editor {
    pub fn new(schema: Schema) -> Self {
        Self::with_config(schema, EditorConfig::default())
    }

    pub fn with_config(schema: Schema, config: EditorConfig) -> Self {
        Self::from_store(NodeStore::new(schema), OperationRegistry::with_builtins(), config)
    }

    /// Editor over an existing store, e.g. one restored from a snapshot or
    /// with a registry carrying custom operations
    pub fn from_store(store: NodeStore, registry: OperationRegistry, config: EditorConfig) -> Self {
        let manager = TransactionManager::with_config(Arc::new(store), registry, &config);
        Self {
            manager,
            history: Mutex::new(History::with_config(&config.history)),
            config,
        }
    }

    pub fn from_snapshot(
        schema: Schema,
        snapshot: Snapshot,
        config: EditorConfig,
    ) -> Result<Self, SnapshotError> {
        let store = NodeStore::from_snapshot(schema, snapshot)?;
        Ok(Self::from_store(store, OperationRegistry::with_builtins(), config))
    }

    pub fn store(&self) -> &Arc<NodeStore> {
        self.manager.store()
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub fn schema(&self) -> &Schema {
        self.manager.schema()
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.manager.subscribe()
    }

    pub fn new_id(&self) -> NodeId {
        self.store().new_id()
    }

    /// Run a user edit and record it for undo
    pub async fn apply(&self, ops: Vec<Operation>) -> TransactionResult {
        self.apply_with_selection(ops, None).await
    }

    pub async fn apply_with_selection(
        &self,
        ops: Vec<Operation>,
        selection: Option<Selection>,
    ) -> TransactionResult {
        // History is locked first so records reach it in commit order
        let mut history = self.history.lock().await;
        let result = self
            .manager
            .execute_with_selection(ops, Origin::User, selection)
            .await;
        history.push(Arc::clone(&result.record));
        result
    }

    /// Apply an edit made elsewhere. Never enters the local history.
    pub async fn apply_remote(&self, ops: Vec<Operation>) -> TransactionResult {
        self.manager.execute(ops, Origin::Remote).await
    }

    pub async fn undo(&self) -> Result<bool, EditorError> {
        self.history.lock().await.undo(&self.manager).await
    }

    pub async fn redo(&self) -> Result<bool, EditorError> {
        self.history.lock().await.redo(&self.manager).await
    }

    pub async fn can_undo(&self) -> bool {
        self.history.lock().await.can_undo()
    }

    pub async fn can_redo(&self) -> bool {
        self.history.lock().await.can_redo()
    }

    /// Collect every following `apply` into one undo step until `end_group`
    pub async fn begin_group(&self, description: Option<String>) {
        let mut history = self.history.lock().await;
        history.begin_group();
        if let Some(description) = description {
            history.set_group_description(description);
        }
    }

    pub async fn end_group(&self) {
        self.history.lock().await.end_group();
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    pub async fn purge(&self, policy: &dyn PurgePolicy) -> Result<usize, TransactionError> {
        self.manager.purge(policy).await
    }

    pub fn snapshot(&self, include_removed: bool) -> Snapshot {
        self.store().snapshot(include_removed)
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("manager", &self.manager)
            .field("config", &self.config)
            .finish()
    }
}
