//! # Absolute Positions
//!
//! Addresses a document as one linear sequence of units. Walking the tree in
//! pre-order, every node contributes a start unit and an end unit, and a text
//! node contributes one unit per character in between:
//!
//! ```text
//! doc ── paragraph ── text "Hello"
//!
//!  0     1            2 3 4 5 6 7  8      9          10
//!  doc   paragraph    H e l l o ·  (gap)  paragraph  doc
//!  start start        ^ text 0..=5        end        end
//! ```
//!
//! A text node of length `L` starting at `s` maps local offsets `0..=L` to
//! `s..=s+L`. Unit `s+L+1` is the gap between it and whatever follows and
//! resolves to the end of that text node, so an offset between two adjacent
//! text nodes always lands at the end of the first one. An element maps
//! offset `0` to its start unit and offset `length` to its end unit.
//!
//! Calculators take any [`NodeLookup`]; the store hands them its committed
//! state only.

use crate::errors::PositionError;
use folio_common::{walk, Node, NodeId, NodeLookup, VisitFlow, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A `(node, local offset)` address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePosition {
    pub node: NodeId,
    pub offset: usize,
}

impl NodePosition {
    pub fn new(node: impl Into<NodeId>, offset: usize) -> Self {
        Self {
            node: node.into(),
            offset,
        }
    }
}

/// Converts between linear offsets and node positions within one document
pub struct PositionCalculator<'a, L: NodeLookup + ?Sized> {
    lookup: &'a L,
    root: NodeId,
}

impl<'a, L: NodeLookup + ?Sized> PositionCalculator<'a, L> {
    pub fn new(lookup: &'a L, root: NodeId) -> Self {
        Self { lookup, root }
    }

    pub fn root(&self) -> &NodeId {
        &self.root
    }

    fn node(&self, id: &NodeId) -> Result<&'a Node, PositionError> {
        self.lookup
            .lookup(id)
            .ok_or_else(|| PositionError::NotFound(id.clone()))
    }

    /// Number of units the subtree under `id` occupies
    pub fn node_size(&self, id: &NodeId) -> Result<usize, PositionError> {
        struct Measure(usize);

        impl Visitor for Measure {
            fn enter(&mut self, node: &Node, _depth: usize) -> VisitFlow {
                if node.is_text() {
                    self.0 += node.text_len() + 2;
                    VisitFlow::SkipChildren
                } else {
                    self.0 += 1;
                    VisitFlow::Continue
                }
            }

            fn leave(&mut self, node: &Node, _depth: usize) -> VisitFlow {
                if !node.is_text() {
                    self.0 += 1;
                }
                VisitFlow::Continue
            }
        }

        self.node(id)?;
        let mut measure = Measure(0);
        walk(self.lookup, id, &mut measure);
        Ok(measure.0)
    }

    /// Largest local offset of `id`: character count for text, distance from
    /// start to end unit for elements
    pub fn node_length(&self, id: &NodeId) -> Result<usize, PositionError> {
        let node = self.node(id)?;
        if node.is_text() {
            Ok(node.text_len())
        } else {
            Ok(self.node_size(id)? - 1)
        }
    }

    /// Offset of the document's end unit
    pub fn document_end(&self) -> Result<usize, PositionError> {
        self.node_length(&self.root)
    }

    /// Linear offset of the start unit of `id`
    pub fn start_of(&self, id: &NodeId) -> Result<usize, PositionError> {
        let mut path: Vec<(&'a Node, &'a NodeId)> = Vec::new();
        let mut current = self.node(id)?;
        let mut seen = HashSet::new();

        while current.id != self.root {
            if !seen.insert(&current.id) {
                return Err(PositionError::NotInDocument(id.clone()));
            }
            let parent = current
                .parent
                .as_ref()
                .and_then(|p| self.lookup.lookup(p))
                .ok_or_else(|| PositionError::NotInDocument(id.clone()))?;
            path.push((parent, &current.id));
            current = parent;
        }

        let mut start = 0;
        for (parent, child) in path.into_iter().rev() {
            start += 1;
            let mut found = false;
            for sibling in parent.children() {
                if sibling == child {
                    found = true;
                    break;
                }
                start += self.node_size(sibling)?;
            }
            if !found {
                return Err(PositionError::NotInDocument(id.clone()));
            }
        }
        Ok(start)
    }

    pub fn to_absolute(&self, id: &NodeId, offset: usize) -> Result<usize, PositionError> {
        let node = self.node(id)?;
        let len = self.node_length(id)?;
        let addressable = if node.is_text() {
            offset <= len
        } else {
            offset == 0 || offset == len
        };
        if !addressable {
            return Err(PositionError::LocalOffsetOutOfRange {
                id: id.clone(),
                offset,
                len,
            });
        }
        Ok(self.start_of(id)? + offset)
    }

    pub fn from_absolute(&self, offset: usize) -> Result<NodePosition, PositionError> {
        let end = self.document_end()?;
        if offset > end {
            return Err(PositionError::OutOfBounds { offset, end });
        }

        let mut node = self.node(&self.root)?;
        let mut start = 0;
        loop {
            if node.is_text() {
                let local = (offset - start).min(node.text_len());
                return Ok(NodePosition::new(node.id.clone(), local));
            }
            if offset == start {
                return Ok(NodePosition::new(node.id.clone(), 0));
            }

            let mut cursor = start + 1;
            let mut next = None;
            for child_id in node.children() {
                let size = self.node_size(child_id)?;
                if offset < cursor + size {
                    next = Some((self.node(child_id)?, cursor));
                    break;
                }
                cursor += size;
            }

            match next {
                Some((child, child_start)) => {
                    node = child;
                    start = child_start;
                }
                // End unit of this element
                None => return Ok(NodePosition::new(node.id.clone(), offset - start)),
            }
        }
    }
}

/// One positional effect of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MapStep {
    /// `len` characters inserted at `offset`
    Insert { node: NodeId, offset: usize, len: usize },
    /// `len` characters removed at `offset`
    Delete { node: NodeId, offset: usize, len: usize },
    /// Whole text replaced by one of `len` characters
    Replace { node: NodeId, len: usize },
    /// Node left the document
    Removed { node: NodeId },
}

/// Ordered position effects of a sequence of operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMapping {
    steps: Vec<MapStep>,
}

impl PositionMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(step: MapStep) -> Self {
        Self { steps: vec![step] }
    }

    pub fn push(&mut self, step: MapStep) {
        self.steps.push(step);
    }

    pub fn append(&mut self, other: PositionMapping) {
        self.steps.extend(other.steps);
    }

    pub fn steps(&self) -> &[MapStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Carry `pos` through every step. `None` when its node was removed.
    pub fn map(&self, pos: &NodePosition) -> Option<NodePosition> {
        let mut offset = pos.offset;
        for step in &self.steps {
            match step {
                MapStep::Insert { node, offset: at, len } if *node == pos.node => {
                    if offset >= *at {
                        offset += len;
                    }
                }
                MapStep::Delete { node, offset: at, len } if *node == pos.node => {
                    if offset >= at + len {
                        offset -= len;
                    } else if offset > *at {
                        offset = *at;
                    }
                }
                MapStep::Replace { node, len } if *node == pos.node => {
                    offset = offset.min(*len);
                }
                MapStep::Removed { node } if *node == pos.node => return None,
                _ => {}
            }
        }
        Some(NodePosition::new(pos.node.clone(), offset))
    }
}

/// Caller-owned selection carried through a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: NodePosition,
    pub head: NodePosition,
}

impl Selection {
    pub fn new(anchor: NodePosition, head: NodePosition) -> Self {
        Self { anchor, head }
    }

    pub fn caret(pos: NodePosition) -> Self {
        Self {
            anchor: pos.clone(),
            head: pos,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }

    pub fn map(&self, mapping: &PositionMapping) -> Option<Selection> {
        Some(Selection {
            anchor: mapping.map(&self.anchor)?,
            head: mapping.map(&self.head)?,
        })
    }
}
