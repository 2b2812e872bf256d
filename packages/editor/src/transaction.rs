//! # Transaction Manager
//!
//! ```text
//! Idle → LockQueued → Running ─┬─ Committing  → Idle
//!                              └─ RollingBack → Idle
//! ```
//!
//! One transaction runs at a time. Its operations share one overlay that is
//! committed only if every operation (and the integrity check) succeeds;
//! otherwise the overlay is dropped and the store is exactly as before.

use crate::config::EditorConfig;
use crate::errors::TransactionError;
use crate::events::{EditorEvent, EventBus};
use crate::lock::TransactionLock;
use crate::position::{PositionMapping, Selection};
use crate::registry::{Operation, OperationRegistry};
use crate::store::{NodeStore, PurgePolicy, StoreView};
use chrono::{DateTime, Utc};
use folio_common::Node;
use folio_schema::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Who asked for a transaction. Only `User` transactions enter history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    User,
    Remote,
    System,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Origin::User => "user",
            Origin::Remote => "remote",
            Origin::System => "system",
        };
        f.write_str(name)
    }
}

/// One executed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    #[serde(rename = "type")]
    pub op_type: String,
    pub payload: Value,
    pub result: Option<Node>,
    pub inverse: Operation,
}

impl OperationRecord {
    pub fn operation(&self) -> Operation {
        Operation::new(self.op_type.clone(), self.payload.clone())
    }
}

/// Immutable account of one finished transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub origin: Origin,
    /// Executed operations; empty when the transaction failed
    pub operations: Vec<OperationRecord>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    /// Store version produced by the commit
    pub version: Option<u64>,
    pub selection_before: Option<Selection>,
    pub selection_after: Option<Selection>,
}

impl TransactionRecord {
    pub fn forward_operations(&self) -> Vec<Operation> {
        self.operations.iter().map(OperationRecord::operation).collect()
    }

    /// Inverses in reverse order: running them undoes the transaction
    pub fn inverse_operations(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .rev()
            .map(|record| record.inverse.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub success: bool,
    pub errors: Vec<TransactionError>,
    pub transaction_id: String,
    pub record: Arc<TransactionRecord>,
}

impl TransactionResult {
    pub fn operations(&self) -> &[OperationRecord] {
        &self.record.operations
    }

    pub fn selection_after(&self) -> Option<&Selection> {
        self.record.selection_after.as_ref()
    }

    /// The record on success, the first error otherwise
    pub fn into_result(self) -> Result<Arc<TransactionRecord>, TransactionError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(self.record),
        }
    }
}

pub struct TransactionManager {
    store: Arc<NodeStore>,
    registry: OperationRegistry,
    lock: TransactionLock,
    events: EventBus,
    verify_integrity: bool,
}

struct Staged {
    records: Vec<OperationRecord>,
    mapping: PositionMapping,
    version: u64,
}

impl TransactionManager {
    pub fn new(store: Arc<NodeStore>) -> Self {
        Self::with_config(store, OperationRegistry::with_builtins(), &EditorConfig::default())
    }

    pub fn with_config(
        store: Arc<NodeStore>,
        registry: OperationRegistry,
        config: &EditorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            lock: TransactionLock::new(config.lock_timeout()),
            events: EventBus::new(config.event_capacity),
            verify_integrity: config.verify_integrity,
        }
    }

    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    pub fn schema(&self) -> &Schema {
        self.store.schema()
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn lock(&self) -> &TransactionLock {
        &self.lock
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.events.subscribe()
    }

    pub async fn execute(&self, ops: Vec<Operation>, origin: Origin) -> TransactionResult {
        self.execute_with_selection(ops, origin, None).await
    }

    /// Run `ops` as one atomic transaction, carrying `selection` through
    /// their position effects
    pub async fn execute_with_selection(
        &self,
        ops: Vec<Operation>,
        origin: Origin,
        selection: Option<Selection>,
    ) -> TransactionResult {
        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        // Held until the outcome is published so events arrive in commit order
        let (guard, staged) = match self.lock.acquire().await {
            Ok(guard) => {
                tracing::debug!(
                    transaction_id = %id,
                    lock_id = guard.id(),
                    operations = ops.len(),
                    %origin,
                    "[TransactionManager] running"
                );
                let staged = self.run_locked(&ops);
                (Some(guard), staged)
            }
            Err(error) => (None, Err(error)),
        };

        let (success, errors, operations, version, selection_after) = match staged {
            Ok(staged) => {
                let after = selection.as_ref().and_then(|s| s.map(&staged.mapping));
                tracing::info!(
                    transaction_id = %id,
                    operations = staged.records.len(),
                    version = staged.version,
                    %origin,
                    "[TransactionManager] committed"
                );
                (true, Vec::new(), staged.records, Some(staged.version), after)
            }
            Err(error) => {
                tracing::warn!(
                    transaction_id = %id,
                    %origin,
                    error = %error,
                    "[TransactionManager] rolled back"
                );
                (false, vec![error], Vec::new(), None, selection.clone())
            }
        };

        let record = Arc::new(TransactionRecord {
            id: id.clone(),
            origin,
            operations,
            started_at,
            ended_at: Utc::now(),
            success,
            version,
            selection_before: selection,
            selection_after,
        });

        if success {
            self.events
                .publish(EditorEvent::TransactionCommitted(Arc::clone(&record)));
        } else {
            self.events.publish(EditorEvent::TransactionFailed {
                transaction_id: id.clone(),
                errors: errors.clone(),
            });
        }
        drop(guard);

        TransactionResult {
            success,
            errors,
            transaction_id: id,
            record,
        }
    }

    /// Physically remove tombstones the policy allows. Waits for the lock
    /// like a transaction.
    pub async fn purge(&self, policy: &dyn PurgePolicy) -> Result<usize, TransactionError> {
        let _guard = self.lock.acquire().await?;
        Ok(self.store.purge(policy))
    }

    // Caller holds the lock
    fn run_locked(&self, ops: &[Operation]) -> Result<Staged, TransactionError> {
        let mut overlay = self.store.begin_overlay()?;
        let outcome = {
            let mut view = self.store.view(&mut overlay);
            self.run_operations(ops, &mut view)
        };

        match outcome {
            Ok((records, mapping)) => {
                let version = self.store.commit_overlay(overlay);
                Ok(Staged {
                    records,
                    mapping,
                    version,
                })
            }
            Err(error) => {
                self.store.discard_overlay(overlay);
                Err(error)
            }
        }
    }

    fn run_operations(
        &self,
        ops: &[Operation],
        view: &mut StoreView<'_>,
    ) -> Result<(Vec<OperationRecord>, PositionMapping), TransactionError> {
        let mut records = Vec::with_capacity(ops.len());
        let mut mapping = PositionMapping::new();

        for (index, op) in ops.iter().enumerate() {
            let outcome = self.registry.execute(op, view).map_err(|source| {
                TransactionError::Operation {
                    index,
                    op_type: op.op_type.clone(),
                    source,
                }
            })?;
            mapping.append(outcome.mapping);
            records.push(OperationRecord {
                op_type: op.op_type.clone(),
                payload: op.payload.clone(),
                result: outcome.data,
                inverse: outcome.inverse,
            });
        }

        if self.verify_integrity {
            let issues = view.integrity_issues();
            if !issues.is_empty() {
                tracing::error!(issues = ?issues, "[TransactionManager] integrity check failed");
                return Err(TransactionError::Integrity(issues.join("; ")));
            }
        }

        Ok((records, mapping))
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("store_version", &self.store.version())
            .field("registry", &self.registry)
            .field("verify_integrity", &self.verify_integrity)
            .finish()
    }
}
