//! # Snapshots
//!
//! Self-describing JSON form of a store: every node as
//! `{id, kind, attributes, content, text?, marks?}` plus the document roots.
//! Parent links are not stored; they are rebuilt from `content` on load.

use crate::errors::SnapshotError;
use crate::store::{Committed, NodeStore};
use folio_common::{IdGenerator, Node, NodeData, NodeId, NodeLookup};
use folio_schema::{Schema, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub schema_name: String,

    /// Document roots in creation order
    pub roots: Vec<NodeId>,

    pub nodes: Vec<NodeData>,

    /// Tombstoned node ids, present only when tombstones were captured
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<NodeId>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl NodeStore {
    /// Capture the committed state. Nodes are ordered by id so equal stores
    /// produce equal snapshots.
    pub fn snapshot(&self, include_removed: bool) -> Snapshot {
        let committed = self.committed();

        let mut nodes: Vec<&Node> = committed
            .nodes()
            .filter(|n| include_removed || !n.removed)
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let roots = committed
            .roots()
            .iter()
            .filter(|id| {
                committed
                    .get_any(id)
                    .is_some_and(|n| include_removed || !n.removed)
            })
            .cloned()
            .collect();

        Snapshot {
            schema_name: self.schema().name().to_string(),
            roots,
            removed: nodes
                .iter()
                .filter(|n| n.removed)
                .map(|n| n.id.clone())
                .collect(),
            nodes: nodes.iter().map(|n| n.to_data()).collect(),
        }
    }

    /// Rebuild a store from a snapshot, validating every live document
    /// against `schema` before it becomes queryable
    pub fn from_snapshot(schema: Schema, snapshot: Snapshot) -> Result<Self, SnapshotError> {
        Self::from_snapshot_with_ids(schema, snapshot, IdGenerator::random())
    }

    pub fn from_snapshot_with_ids(
        schema: Schema,
        snapshot: Snapshot,
        ids: IdGenerator,
    ) -> Result<Self, SnapshotError> {
        if snapshot.schema_name != schema.name() {
            return Err(SnapshotError::SchemaMismatch {
                expected: schema.name().to_string(),
                found: snapshot.schema_name,
            });
        }

        let committed = restore(snapshot)?;

        let mut result = ValidationResult::ok();
        for root in committed.roots() {
            if committed.lookup(root).is_some() {
                result.merge(schema.validate_document(root, &committed));
            }
        }
        if !result.is_valid() {
            return Err(SnapshotError::Validation(result));
        }

        for id in committed.nodes.keys() {
            ids.observe(id);
        }

        let store = NodeStore::from_committed(schema, committed, ids);
        if let Err(issues) = store.check_integrity() {
            return Err(SnapshotError::Integrity(issues.join("; ")));
        }

        tracing::info!(
            nodes = store.node_count(Default::default()),
            documents = store.documents().len(),
            "[Snapshot] restored"
        );
        Ok(store)
    }
}

fn restore(snapshot: Snapshot) -> Result<Committed, SnapshotError> {
    let removed: HashSet<NodeId> = snapshot.removed.into_iter().collect();

    let mut nodes: HashMap<NodeId, Node> = HashMap::with_capacity(snapshot.nodes.len());
    for data in snapshot.nodes {
        let mut node = Node::from_data(data);
        node.removed = removed.contains(&node.id);
        if let Some(previous) = nodes.insert(node.id.clone(), node) {
            return Err(SnapshotError::Integrity(format!(
                "node '{}' appears twice",
                previous.id
            )));
        }
    }

    let links: Vec<(NodeId, NodeId)> = nodes
        .values()
        .flat_map(|parent| {
            parent
                .children()
                .iter()
                .map(move |child| (child.clone(), parent.id.clone()))
        })
        .collect();
    for (child, parent) in links {
        let Some(node) = nodes.get_mut(&child) else {
            return Err(SnapshotError::Integrity(format!(
                "'{}' references missing child '{}'",
                parent, child
            )));
        };
        if let Some(other) = &node.parent {
            return Err(SnapshotError::Integrity(format!(
                "'{}' is listed by both '{}' and '{}'",
                child, other, parent
            )));
        }
        node.parent = Some(parent);
    }

    for root in &snapshot.roots {
        match nodes.get(root) {
            None => {
                return Err(SnapshotError::Integrity(format!(
                    "document root '{}' is missing",
                    root
                )))
            }
            Some(node) if node.parent.is_some() => {
                return Err(SnapshotError::Integrity(format!(
                    "document root '{}' has a parent",
                    root
                )))
            }
            Some(_) => {}
        }
    }

    Ok(Committed {
        nodes,
        roots: snapshot.roots,
        version: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QueryOptions;
    use folio_schema::{ErrorCode, NodeSpec, SchemaSpec};

    fn schema() -> Schema {
        Schema::new(
            SchemaSpec::new("notes")
                .node("doc", NodeSpec::element("block+"))
                .node("paragraph", NodeSpec::element("inline*").in_group("block"))
                .node("text", NodeSpec::text().in_group("inline")),
        )
        .unwrap()
    }

    fn hello() -> Snapshot {
        Snapshot {
            schema_name: "notes".into(),
            roots: vec!["d".into()],
            nodes: vec![
                NodeData::element("d", "doc").with_content(vec!["p".into()]),
                NodeData::element("p", "paragraph").with_content(vec!["t".into()]),
                NodeData::text("t", "text", "Hello"),
            ],
            removed: Vec::new(),
        }
    }

    #[test]
    fn test_restore_rebuilds_parents() {
        let store = NodeStore::from_snapshot(schema(), hello()).unwrap();
        let text = store.get_node(&"t".into()).unwrap();
        assert_eq!(text.parent, Some(NodeId::from("p")));
        assert_eq!(store.documents().len(), 1);
        assert_eq!(store.to_absolute(&"t".into(), 5).unwrap(), 7);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let store = NodeStore::from_snapshot(schema(), hello()).unwrap();
        let json = store.snapshot(false).to_json().unwrap();
        let again = NodeStore::from_snapshot(schema(), Snapshot::from_json(&json).unwrap()).unwrap();
        assert_eq!(again.snapshot(false), store.snapshot(false));
    }

    #[test]
    fn test_rejects_other_schema() {
        let mut snapshot = hello();
        snapshot.schema_name = "other".into();
        let err = NodeStore::from_snapshot(schema(), snapshot).unwrap_err();
        assert!(matches!(err, SnapshotError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_rejects_invalid_document() {
        let mut snapshot = hello();
        snapshot.nodes[0] = NodeData::element("d", "doc").with_content(vec![]);
        snapshot.nodes.retain(|n| n.id.as_str() == "d");
        match NodeStore::from_snapshot(schema(), snapshot).unwrap_err() {
            SnapshotError::Validation(result) => {
                assert!(result.has_code(ErrorCode::ContentPatternMismatch))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_broken_structure() {
        let mut dangling = hello();
        dangling.nodes.pop();
        assert!(matches!(
            NodeStore::from_snapshot(schema(), dangling).unwrap_err(),
            SnapshotError::Integrity(_)
        ));

        let mut orphan = hello();
        orphan.nodes.push(NodeData::text("loose", "text", "?"));
        assert!(matches!(
            NodeStore::from_snapshot(schema(), orphan).unwrap_err(),
            SnapshotError::Integrity(_)
        ));
    }

    #[test]
    fn test_tombstones_only_when_requested() {
        let mut snapshot = hello();
        snapshot.nodes.push(NodeData::text("gone", "text", "bye"));
        snapshot.removed = vec!["gone".into()];

        let store = NodeStore::from_snapshot(schema(), snapshot).unwrap();
        assert!(store.get_node(&"gone".into()).is_none());
        assert_eq!(store.node_count(QueryOptions::include_removed()), 4);

        assert_eq!(store.snapshot(false).nodes.len(), 3);
        let full = store.snapshot(true);
        assert_eq!(full.nodes.len(), 4);
        assert_eq!(full.removed, vec![NodeId::from("gone")]);
    }

    #[test]
    fn test_restored_ids_are_not_reused() {
        let mut snapshot = hello();
        snapshot.nodes[2] = NodeData::text("s-7", "text", "Hello");
        snapshot.nodes[1] = NodeData::element("p", "paragraph").with_content(vec!["s-7".into()]);
        let store =
            NodeStore::from_snapshot_with_ids(schema(), snapshot, IdGenerator::new("s")).unwrap();
        assert_eq!(store.new_id(), NodeId::from("s-8"));
    }
}
