//! # Node Store
//!
//! Single source of truth for committed nodes, plus a copy-on-write
//! [`Overlay`] that stages a transaction's writes.
//!
//! ```text
//! read rule (StoreView):   deleted set  >  overlay map  >  committed base
//! ```
//!
//! The base is only written by [`NodeStore::commit_overlay`] and by purge
//! sweeps, both of which the transaction manager runs while holding the
//! global transaction lock. Plain queries take the committed read lock and
//! never see overlay state.

use crate::errors::OperationError;
use crate::position::{NodePosition, PositionCalculator};
use crate::PositionError;
use chrono::Utc;
use folio_common::{collect_subtree, IdGenerator, Node, NodeId, NodeLookup};
use folio_schema::{Schema, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Committed node set
#[derive(Debug, Default)]
pub struct Committed {
    pub(crate) nodes: HashMap<NodeId, Node>,
    /// Document roots in creation order, tombstoned ones included
    pub(crate) roots: Vec<NodeId>,
    pub(crate) version: u64,
}

impl Committed {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn is_root(&self, id: &NodeId) -> bool {
        self.roots.contains(id)
    }

    /// Lookup that also returns tombstoned nodes
    pub fn get_any(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }
}

impl NodeLookup for Committed {
    fn lookup(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id).filter(|n| !n.removed)
    }
}

/// Flags for read queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Also return tombstoned nodes
    pub include_removed: bool,
}

impl QueryOptions {
    pub fn include_removed() -> Self {
        Self {
            include_removed: true,
        }
    }
}

/// Metadata of one document held by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub root_node_id: NodeId,
    pub schema_name: String,
    pub created_at: i64,
}

/// Staged writes of one transaction
///
/// Dropping an overlay without committing it discards it.
#[derive(Debug)]
pub struct Overlay {
    nodes: HashMap<NodeId, Node>,
    deleted: HashSet<NodeId>,
    /// Parents whose child list changed
    touched: HashSet<NodeId>,
    new_roots: Vec<NodeId>,
    open: Arc<AtomicBool>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn written(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn deleted(&self) -> &HashSet<NodeId> {
        &self.deleted
    }

    pub fn touched(&self) -> &HashSet<NodeId> {
        &self.touched
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Node store shared by every transaction and query
#[derive(Debug)]
pub struct NodeStore {
    schema: Schema,
    committed: RwLock<Committed>,
    overlay_open: Arc<AtomicBool>,
    ids: IdGenerator,
}

impl NodeStore {
    pub fn new(schema: Schema) -> Self {
        Self::with_ids(schema, IdGenerator::random())
    }

    pub fn with_ids(schema: Schema, ids: IdGenerator) -> Self {
        Self::from_committed(schema, Committed::default(), ids)
    }

    pub(crate) fn from_committed(schema: Schema, committed: Committed, ids: IdGenerator) -> Self {
        Self {
            schema,
            committed: RwLock::new(committed),
            overlay_open: Arc::new(AtomicBool::new(false)),
            ids,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Fresh id that no node of this store has ever used
    pub fn new_id(&self) -> NodeId {
        self.ids.new_id()
    }

    /// Read lock on the committed state. Hold it only briefly; commits wait
    /// for it.
    pub fn committed(&self) -> RwLockReadGuard<'_, Committed> {
        self.committed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn committed_mut(&self) -> RwLockWriteGuard<'_, Committed> {
        self.committed.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn version(&self) -> u64 {
        self.committed().version
    }

    pub fn is_overlay_open(&self) -> bool {
        self.overlay_open.load(Ordering::Acquire)
    }

    // --- overlay lifecycle -------------------------------------------------

    /// Open the single overlay. Fails if one is already open.
    pub fn begin_overlay(&self) -> Result<Overlay, crate::TransactionError> {
        if self
            .overlay_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(crate::TransactionError::OverlayBusy);
        }
        tracing::debug!("[NodeStore] overlay opened");
        Ok(Overlay {
            nodes: HashMap::new(),
            deleted: HashSet::new(),
            touched: HashSet::new(),
            new_roots: Vec::new(),
            open: Arc::clone(&self.overlay_open),
        })
    }

    /// Overlay-aware view for running operations
    pub fn view<'a>(&'a self, overlay: &'a mut Overlay) -> StoreView<'a> {
        StoreView {
            base: self.committed(),
            overlay,
            schema: &self.schema,
            ids: &self.ids,
        }
    }

    /// Merge the overlay into the base. Returns the new store version.
    pub fn commit_overlay(&self, mut overlay: Overlay) -> u64 {
        let mut committed = self.committed_mut();
        committed.version += 1;
        let version = committed.version;
        let now = Utc::now().timestamp_millis();
        let written = overlay.nodes.len();
        let deleted = overlay.deleted.len();

        for (id, mut node) in overlay.nodes.drain() {
            node.version = version;
            node.updated_at = now;
            if node.created_at == 0 {
                node.created_at = now;
            }
            committed.nodes.insert(id, node);
        }
        for root in overlay.new_roots.drain(..) {
            if !committed.roots.contains(&root) {
                committed.roots.push(root);
            }
        }
        drop(committed);

        tracing::debug!(version, written, deleted, "[NodeStore] overlay committed");
        version
    }

    /// Throw the overlay away, leaving the base untouched
    pub fn discard_overlay(&self, overlay: Overlay) {
        tracing::debug!(
            written = overlay.nodes.len(),
            "[NodeStore] overlay discarded"
        );
        drop(overlay);
    }

    // --- queries -----------------------------------------------------------

    pub fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.get_node_with(id, QueryOptions::default())
    }

    pub fn get_node_with(&self, id: &NodeId, options: QueryOptions) -> Option<Node> {
        let committed = self.committed();
        let node = if options.include_removed {
            committed.get_any(id)
        } else {
            committed.lookup(id)
        };
        node.cloned()
    }

    pub fn get_children(&self, id: &NodeId) -> Option<Vec<Node>> {
        self.get_children_with(id, QueryOptions::default())
    }

    pub fn get_children_with(&self, id: &NodeId, options: QueryOptions) -> Option<Vec<Node>> {
        let committed = self.committed();
        let parent = if options.include_removed {
            committed.get_any(id)
        } else {
            committed.lookup(id)
        }?;
        Some(
            parent
                .children()
                .iter()
                .filter_map(|child| {
                    if options.include_removed {
                        committed.get_any(child)
                    } else {
                        committed.lookup(child)
                    }
                })
                .cloned()
                .collect(),
        )
    }

    pub fn node_count(&self, options: QueryOptions) -> usize {
        let committed = self.committed();
        committed
            .nodes
            .values()
            .filter(|n| options.include_removed || !n.removed)
            .count()
    }

    /// Live documents in creation order
    pub fn documents(&self) -> Vec<DocumentInfo> {
        let committed = self.committed();
        committed
            .roots
            .iter()
            .filter_map(|id| committed.lookup(id))
            .map(|root| DocumentInfo {
                root_node_id: root.id.clone(),
                schema_name: self.schema.name().to_string(),
                created_at: root.created_at,
            })
            .collect()
    }

    /// Linear offset of `(id, offset)` within its document
    pub fn to_absolute(&self, id: &NodeId, offset: usize) -> Result<usize, PositionError> {
        let committed = self.committed();
        let root = document_root(&*committed, id)?;
        PositionCalculator::new(&*committed, root).to_absolute(id, offset)
    }

    /// `(node, local offset)` at linear `offset` of the document rooted at `root`
    pub fn from_absolute(&self, root: &NodeId, offset: usize) -> Result<NodePosition, PositionError> {
        let committed = self.committed();
        ensure_root(&committed, root)?;
        PositionCalculator::new(&*committed, root.clone()).from_absolute(offset)
    }

    /// Highest valid linear offset of the document rooted at `root`
    pub fn document_end(&self, root: &NodeId) -> Result<usize, PositionError> {
        let committed = self.committed();
        ensure_root(&committed, root)?;
        PositionCalculator::new(&*committed, root.clone()).document_end()
    }

    /// Largest local offset addressable in `id`
    pub fn node_length(&self, id: &NodeId) -> Result<usize, PositionError> {
        let committed = self.committed();
        let root = document_root(&*committed, id)?;
        PositionCalculator::new(&*committed, root).node_length(id)
    }

    /// Structural check of every live node
    pub fn check_integrity(&self) -> Result<(), Vec<String>> {
        let committed = self.committed();
        let ids: Vec<&NodeId> = committed
            .nodes
            .values()
            .filter(|n| !n.removed)
            .map(|n| &n.id)
            .collect();
        let issues = integrity_issues(&*committed, ids, |id| committed.is_root(id));
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Physically remove tombstoned subtrees the policy marks as eligible.
    /// Callers must hold the transaction lock.
    pub(crate) fn purge(&self, policy: &dyn PurgePolicy) -> usize {
        let mut committed = self.committed_mut();
        let Committed {
            nodes,
            roots,
            version,
        } = &mut *committed;

        let candidates: Vec<NodeId> = nodes
            .values()
            .filter(|n| n.removed && n.parent.is_none() && policy.should_purge(n, *version))
            .map(|n| n.id.clone())
            .collect();

        let mut purged = Vec::new();
        for id in &candidates {
            purged.extend(
                collect_subtree(&*nodes, id)
                    .into_iter()
                    .filter(|sub| nodes.get(sub).is_some_and(|n| n.removed)),
            );
        }
        for id in &purged {
            nodes.remove(id);
        }
        roots.retain(|root| nodes.contains_key(root));

        tracing::info!(
            purged = purged.len(),
            subtrees = candidates.len(),
            "[NodeStore] tombstone purge"
        );
        purged.len()
    }
}

fn ensure_root(committed: &Committed, root: &NodeId) -> Result<(), PositionError> {
    if committed.lookup(root).is_none() {
        return Err(PositionError::NotFound(root.clone()));
    }
    if !committed.is_root(root) {
        return Err(PositionError::NotInDocument(root.clone()));
    }
    Ok(())
}

/// Climb parent links from `id` to its document root
fn document_root(committed: &Committed, id: &NodeId) -> Result<NodeId, PositionError> {
    let mut current = committed
        .lookup(id)
        .ok_or_else(|| PositionError::NotFound(id.clone()))?;
    let mut seen = HashSet::new();
    while let Some(parent) = &current.parent {
        if !seen.insert(current.id.clone()) {
            return Err(PositionError::NotInDocument(id.clone()));
        }
        current = committed
            .lookup(parent)
            .ok_or_else(|| PositionError::NotInDocument(id.clone()))?;
    }
    if committed.is_root(&current.id) {
        Ok(current.id.clone())
    } else {
        Err(PositionError::NotInDocument(id.clone()))
    }
}

/// Decides when a tombstoned subtree may be physically removed
pub trait PurgePolicy: Send + Sync {
    /// `node` is the tombstoned subtree root, `current_version` the store
    /// version at sweep time
    fn should_purge(&self, node: &Node, current_version: u64) -> bool;
}

/// Never purge
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepTombstones;

impl PurgePolicy for KeepTombstones {
    fn should_purge(&self, _node: &Node, _current_version: u64) -> bool {
        false
    }
}

/// Purge subtrees tombstoned at least `versions` commits ago
#[derive(Debug, Clone, Copy)]
pub struct PurgeOlderThan {
    pub versions: u64,
}

impl PurgePolicy for PurgeOlderThan {
    fn should_purge(&self, node: &Node, current_version: u64) -> bool {
        current_version.saturating_sub(node.version) >= self.versions
    }
}

/// Overlay-aware view used by operations. Holds the committed read lock for
/// its lifetime.
pub struct StoreView<'a> {
    base: RwLockReadGuard<'a, Committed>,
    overlay: &'a mut Overlay,
    schema: &'a Schema,
    ids: &'a IdGenerator,
}

impl<'a> StoreView<'a> {
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    pub fn new_id(&self) -> NodeId {
        self.ids.new_id()
    }

    /// Live node: deleted set first, then overlay, then base
    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        if self.overlay.deleted.contains(id) {
            return None;
        }
        match self.overlay.nodes.get(id) {
            Some(node) => Some(node).filter(|n| !n.removed),
            None => self.base.lookup(id),
        }
    }

    /// Like [`StoreView::get`] but also returns tombstoned nodes
    pub fn get_any(&self, id: &NodeId) -> Option<&Node> {
        self.overlay
            .nodes
            .get(id)
            .or_else(|| self.base.get_any(id))
    }

    pub fn require(&self, id: &NodeId) -> Result<&Node, OperationError> {
        self.get(id).ok_or_else(|| OperationError::NotFound(id.clone()))
    }

    pub fn is_root(&self, id: &NodeId) -> bool {
        self.base.is_root(id) || self.overlay.new_roots.contains(id)
    }

    /// Writable copy of a live node, cloned from the base on first touch
    pub fn node_mut(&mut self, id: &NodeId) -> Result<&mut Node, OperationError> {
        if self.get(id).is_none() {
            return Err(OperationError::NotFound(id.clone()));
        }
        self.any_mut(id)
            .ok_or_else(|| OperationError::NotFound(id.clone()))
    }

    fn any_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        if !self.overlay.nodes.contains_key(id) {
            let node = self.base.get_any(id)?.clone();
            self.overlay.nodes.insert(id.clone(), node);
        }
        self.overlay.nodes.get_mut(id)
    }

    /// Stage `node` as is
    pub fn put(&mut self, node: Node) {
        if node.removed {
            self.overlay.deleted.insert(node.id.clone());
        } else {
            self.overlay.deleted.remove(&node.id);
        }
        self.ids.observe(&node.id);
        self.overlay.nodes.insert(node.id.clone(), node);
    }

    /// Stage a node whose id has never been used
    pub fn insert_new(&mut self, node: Node) -> Result<(), OperationError> {
        if self.get_any(&node.id).is_some() {
            return Err(OperationError::AlreadyExists(node.id.clone()));
        }
        self.put(node);
        Ok(())
    }

    pub fn add_root(&mut self, id: NodeId) {
        if !self.is_root(&id) {
            self.overlay.new_roots.push(id);
        }
    }

    /// Replace the child list of `parent`, keeping `parent` links in sync.
    ///
    /// New children must be live and either detached or already children of
    /// `parent`. Dropped children become detached.
    pub fn set_children(
        &mut self,
        parent: &NodeId,
        children: Vec<NodeId>,
    ) -> Result<(), OperationError> {
        let parent_node = self.require(parent)?;
        if parent_node.content.is_none() {
            return Err(OperationError::InvalidStructure(format!(
                "'{}' ({}) cannot hold children",
                parent, parent_node.kind
            )));
        }
        let old = parent_node.children().to_vec();

        let mut seen = HashSet::new();
        for child in &children {
            if !seen.insert(child) {
                return Err(OperationError::InvalidStructure(format!(
                    "'{}' listed twice under '{}'",
                    child, parent
                )));
            }
            if child == parent {
                return Err(OperationError::CycleDetected);
            }
            let node = self.require(child)?;
            match &node.parent {
                Some(p) if p != parent => {
                    return Err(OperationError::InvalidStructure(format!(
                        "'{}' is already a child of '{}'",
                        child, p
                    )))
                }
                None if self.is_root(child) => {
                    return Err(OperationError::InvalidStructure(format!(
                        "document root '{}' cannot become a child",
                        child
                    )))
                }
                _ => {}
            }
        }

        for child in old.iter().filter(|c| !children.contains(c)) {
            let detach = self
                .get_any(child)
                .is_some_and(|n| n.parent.as_ref() == Some(parent));
            if detach {
                if let Some(node) = self.any_mut(child) {
                    node.parent = None;
                }
            }
        }
        for child in &children {
            if self.get(child).and_then(|n| n.parent.as_ref()) != Some(parent) {
                self.node_mut(child)?.parent = Some(parent.clone());
            }
        }

        self.node_mut(parent)?.content = Some(children);
        self.overlay.touched.insert(parent.clone());
        Ok(())
    }

    /// Tombstone `id` and every live descendant. Returns the tombstoned ids
    /// in pre-order. Does not touch the parent's child list.
    pub fn tombstone_subtree(&mut self, id: &NodeId) -> Result<Vec<NodeId>, OperationError> {
        self.require(id)?;
        let ids = collect_subtree(&*self, id);
        for sub in &ids {
            let node = self.node_mut(sub)?;
            node.removed = true;
            self.overlay.deleted.insert(sub.clone());
        }
        Ok(ids)
    }

    /// Bring a tombstoned node back together with the tombstoned descendants
    /// its child list still references
    pub fn revive_subtree(&mut self, id: &NodeId) -> Result<Vec<NodeId>, OperationError> {
        let mut revived = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            let Some(node) = self.any_mut(&current) else {
                return Err(OperationError::NotFound(current));
            };
            if !node.removed {
                continue;
            }
            node.removed = false;
            let children = node.children().to_vec();
            self.overlay.deleted.remove(&current);

            for child in children.into_iter().rev() {
                let tombstoned_child = self
                    .get_any(&child)
                    .is_some_and(|n| n.removed && n.parent.as_ref() == Some(&current));
                if tombstoned_child {
                    stack.push(child);
                }
            }
            revived.push(current);
        }
        Ok(revived)
    }

    /// Schema-check the given live nodes
    pub fn validate(&self, ids: &[&NodeId]) -> Result<(), OperationError> {
        let mut result = ValidationResult::ok();
        for id in ids {
            if let Some(node) = self.get(id) {
                result.merge(self.schema.validate_node(node, self));
            }
        }
        if result.is_valid() {
            Ok(())
        } else {
            Err(OperationError::Schema(result))
        }
    }

    /// Structural check of every node this view has written
    pub fn integrity_issues(&self) -> Vec<String> {
        let ids: Vec<&NodeId> = self.overlay.nodes.keys().collect();
        integrity_issues(self, ids, |id| self.is_root(id))
    }
}

impl NodeLookup for StoreView<'_> {
    fn lookup(&self, id: &NodeId) -> Option<&Node> {
        self.get(id)
    }
}

/// Checks that the given live nodes and their neighbours agree on
/// parent/child links, that detached nodes are document roots and that no
/// parent chain loops.
pub(crate) fn integrity_issues<'a, L, I, R>(lookup: &L, ids: I, is_root: R) -> Vec<String>
where
    L: NodeLookup + ?Sized,
    I: IntoIterator<Item = &'a NodeId>,
    R: Fn(&NodeId) -> bool,
{
    let mut issues = Vec::new();

    for id in ids {
        let Some(node) = lookup.lookup(id) else {
            continue;
        };

        let mut seen = HashSet::new();
        for child in node.children() {
            if !seen.insert(child) {
                issues.push(format!("'{}' lists child '{}' twice", id, child));
                continue;
            }
            match lookup.lookup(child) {
                None => issues.push(format!("'{}' references missing child '{}'", id, child)),
                Some(c) if c.parent.as_ref() != Some(id) => issues.push(format!(
                    "child '{}' of '{}' points to parent {:?}",
                    child,
                    id,
                    c.parent.as_ref().map(NodeId::as_str)
                )),
                Some(_) => {}
            }
        }

        match &node.parent {
            Some(parent) => {
                let listed = lookup
                    .lookup(parent)
                    .is_some_and(|p| p.child_index(id).is_some());
                if !listed {
                    issues.push(format!("'{}' is not listed by its parent '{}'", id, parent));
                }
            }
            None if !is_root(id) => {
                issues.push(format!("'{}' is detached from any document", id));
            }
            None => {}
        }

        let mut chain = HashSet::new();
        let mut current = node;
        while let Some(parent) = &current.parent {
            if !chain.insert(current.id.clone()) {
                issues.push(format!("parent chain of '{}' forms a cycle", id));
                break;
            }
            match lookup.lookup(parent) {
                Some(p) => current = p,
                None => break,
            }
        }
    }

    issues
}
