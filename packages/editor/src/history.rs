//! # Undo/Redo History
//!
//! Tracks committed user transactions and replays them backwards or forwards.
//!
//! ## Design
//!
//! - Only successful `origin: user` records are accepted
//! - Undo runs every inverse of an entry, newest first, as one `system` transaction
//! - Redo re-runs the original operations as one `system` transaction
//! - New entries clear the redo stack
//! - Explicit groups and time-window typing coalescing merge records into one entry
//! - A failed undo/redo leaves both stacks as they were

use crate::config::HistoryConfig;
use crate::errors::EditorError;
use crate::operations::{InsertTextPayload, INSERT_TEXT};
use crate::registry::Operation;
use crate::transaction::{Origin, TransactionManager, TransactionRecord};
use std::sync::Arc;
use std::time::Duration;

/// One undo step
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Records in commit order
    pub records: Vec<Arc<TransactionRecord>>,

    pub description: Option<String>,
}

impl HistoryEntry {
    pub fn single(record: Arc<TransactionRecord>) -> Self {
        Self {
            records: vec![record],
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Operations that undo the whole entry
    pub fn inverse_operations(&self) -> Vec<Operation> {
        self.records
            .iter()
            .rev()
            .flat_map(|record| record.inverse_operations())
            .collect()
    }

    /// Operations that redo the whole entry
    pub fn forward_operations(&self) -> Vec<Operation> {
        self.records
            .iter()
            .flat_map(|record| record.forward_operations())
            .collect()
    }
}

#[derive(Debug)]
pub struct History {
    /// Most recent last
    undo_stack: Vec<HistoryEntry>,

    /// Most recently undone last
    redo_stack: Vec<HistoryEntry>,

    /// 0 = unlimited
    max_levels: usize,

    /// Zero disables coalescing
    group_window: Duration,

    current_group: Option<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::with_config(&HistoryConfig::default())
    }

    pub fn with_config(config: &HistoryConfig) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_levels: config.max_levels,
            group_window: config.group_window(),
            current_group: None,
        }
    }

    /// Accept a finished transaction. Returns whether it was recorded.
    pub fn push(&mut self, record: Arc<TransactionRecord>) -> bool {
        if !record.success || record.origin != Origin::User || record.operations.is_empty() {
            return false;
        }

        if let Some(group) = &mut self.current_group {
            group.records.push(record);
            return true;
        }

        if let Some(last) = self.undo_stack.last_mut() {
            if last.description.is_none() && coalesces(last, &record, self.group_window) {
                tracing::debug!(
                    transaction_id = %record.id,
                    records = last.records.len() + 1,
                    "[History] coalesced"
                );
                last.records.push(record);
                self.redo_stack.clear();
                return true;
            }
        }

        tracing::debug!(transaction_id = %record.id, "[History] push");
        self.push_entry(HistoryEntry::single(record));
        true
    }

    /// Start collecting records into one undo step
    pub fn begin_group(&mut self) {
        self.end_group();
        self.current_group = Some(HistoryEntry {
            records: Vec::new(),
            description: None,
        });
    }

    /// Close the current group and push it if it recorded anything
    pub fn end_group(&mut self) {
        if let Some(group) = self.current_group.take() {
            if !group.records.is_empty() {
                self.push_entry(group);
            }
        }
    }

    /// Set description for the current group (if grouping)
    pub fn set_group_description(&mut self, description: impl Into<String>) {
        if let Some(group) = &mut self.current_group {
            group.description = Some(description.into());
        }
    }

    pub fn is_grouping(&self) -> bool {
        self.current_group.is_some()
    }

    fn push_entry(&mut self, entry: HistoryEntry) {
        self.undo_stack.push(entry);

        if self.max_levels > 0 && self.undo_stack.len() > self.max_levels {
            self.undo_stack.remove(0);
        }

        self.redo_stack.clear();
    }

    /// Undo the most recent entry. Returns `false` if there was nothing to undo.
    pub async fn undo(&mut self, manager: &TransactionManager) -> Result<bool, EditorError> {
        self.end_group();
        let Some(entry) = self.undo_stack.pop() else {
            return Ok(false);
        };

        let result = manager
            .execute(entry.inverse_operations(), Origin::System)
            .await;
        if let Err(error) = result.into_result() {
            tracing::warn!(error = %error, "[History] undo failed");
            self.undo_stack.push(entry);
            return Err(error.into());
        }

        tracing::debug!(
            records = entry.records.len(),
            undo_levels = self.undo_stack.len(),
            "[History] undo"
        );
        self.redo_stack.push(entry);
        Ok(true)
    }

    /// Redo the most recently undone entry. Returns `false` if there was
    /// nothing to redo.
    pub async fn redo(&mut self, manager: &TransactionManager) -> Result<bool, EditorError> {
        self.end_group();
        let Some(entry) = self.redo_stack.pop() else {
            return Ok(false);
        };

        let result = manager
            .execute(entry.forward_operations(), Origin::System)
            .await;
        if let Err(error) = result.into_result() {
            tracing::warn!(error = %error, "[History] redo failed");
            self.redo_stack.push(entry);
            return Err(error.into());
        }

        tracing::debug!(
            records = entry.records.len(),
            redo_levels = self.redo_stack.len(),
            "[History] redo"
        );
        self.undo_stack.push(entry);
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_levels(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.last()?.description.as_deref()
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last()?.description.as_deref()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.current_group = None;
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

/// Single `insert-text` of a record, if that is all it did
fn single_insert(record: &TransactionRecord) -> Option<InsertTextPayload> {
    match record.operations.as_slice() {
        [op] if op.op_type == INSERT_TEXT => serde_json::from_value(op.payload.clone()).ok(),
        _ => None,
    }
}

/// Typing that continues right where the previous entry stopped, soon enough
fn coalesces(last: &HistoryEntry, record: &TransactionRecord, window: Duration) -> bool {
    if window.is_zero() {
        return false;
    }
    let Some(prev) = last.records.last() else {
        return false;
    };
    let (Some(before), Some(next)) = (single_insert(prev), single_insert(record)) else {
        return false;
    };
    if before.id != next.id || next.offset != before.offset + before.text.chars().count() {
        return false;
    }
    let gap = record.started_at.signed_duration_since(prev.ended_at);
    gap.num_milliseconds() <= window.as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::OperationRecord;
    use chrono::Utc;

    fn record(origin: Origin, ops: Vec<Operation>) -> Arc<TransactionRecord> {
        let now = Utc::now();
        Arc::new(TransactionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            origin,
            operations: ops
                .into_iter()
                .map(|op| OperationRecord {
                    op_type: op.op_type.clone(),
                    payload: op.payload.clone(),
                    result: None,
                    inverse: op,
                })
                .collect(),
            started_at: now,
            ended_at: now,
            success: true,
            version: Some(1),
            selection_before: None,
            selection_after: None,
        })
    }

    fn typing(offset: usize, text: &str) -> Arc<TransactionRecord> {
        record(
            Origin::User,
            vec![Operation::insert_text("t", offset, text)],
        )
    }

    #[test]
    fn test_ignores_non_user_records() {
        let mut history = History::new();
        assert!(!history.push(record(Origin::Remote, vec![Operation::delete("a")])));
        assert!(!history.push(record(Origin::System, vec![Operation::delete("a")])));
        assert!(!history.can_undo());

        assert!(history.push(record(Origin::User, vec![Operation::delete("a")])));
        assert_eq!(history.undo_levels(), 1);
    }

    #[test]
    fn test_ignores_failed_records() {
        let mut history = History::new();
        let mut failed = (*record(Origin::User, vec![])).clone();
        failed.success = false;
        assert!(!history.push(Arc::new(failed)));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_coalesces_adjacent_typing() {
        let mut history = History::new();
        history.push(typing(0, "he"));
        history.push(typing(2, "llo"));
        assert_eq!(history.undo_levels(), 1);

        // not adjacent
        history.push(typing(0, "x"));
        assert_eq!(history.undo_levels(), 2);
    }

    #[test]
    fn test_no_coalescing_with_zero_window() {
        let mut history = History::with_config(&HistoryConfig {
            max_levels: 0,
            group_window_ms: 0,
        });
        history.push(typing(0, "a"));
        history.push(typing(1, "b"));
        assert_eq!(history.undo_levels(), 2);
    }

    #[test]
    fn test_groups() {
        let mut history = History::new();
        history.begin_group();
        history.set_group_description("paste");
        history.push(record(Origin::User, vec![Operation::delete("a")]));
        history.push(record(Origin::User, vec![Operation::delete("b")]));
        assert!(!history.can_undo());
        history.end_group();

        assert_eq!(history.undo_levels(), 1);
        assert_eq!(history.undo_description(), Some("paste"));

        // empty groups are dropped
        history.begin_group();
        history.end_group();
        assert_eq!(history.undo_levels(), 1);
    }

    #[test]
    fn test_entry_inverse_order() {
        let first = record(Origin::User, vec![Operation::delete("a"), Operation::delete("b")]);
        let second = record(Origin::User, vec![Operation::delete("c")]);
        let entry = HistoryEntry {
            records: vec![first, second],
            description: None,
        };

        let ids: Vec<String> = entry
            .inverse_operations()
            .iter()
            .map(|op| op.payload["id"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(ids, ["c", "b", "a"]);

        let forward: Vec<String> = entry
            .forward_operations()
            .iter()
            .map(|op| op.payload["id"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(forward, ["a", "b", "c"]);
    }

    #[test]
    fn test_max_levels() {
        let mut history = History::with_config(&HistoryConfig {
            max_levels: 2,
            group_window_ms: 0,
        });
        for id in ["a", "b", "c"] {
            history.push(record(Origin::User, vec![Operation::delete(id)]));
        }
        assert_eq!(history.undo_levels(), 2);
    }

    #[test]
    fn test_clear() {
        let mut history = History::new();
        history.push(record(Origin::User, vec![Operation::delete("a")]));
        history.clear();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }
}
