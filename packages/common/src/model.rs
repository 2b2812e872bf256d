//! # Node Model
//!
//! A document is an arena of [`Node`]s indexed by [`NodeId`]. Child lists hold
//! ids, never references, and `content` order is the only ordering source.
//! The `parent` back-reference is maintained by the store whenever a child
//! list changes.
//!
//! ```text
//! doc ─┬─ paragraph ── text "Hello"
//!      └─ paragraph ─┬─ text "big " [bold 0..3]
//!                    └─ text "world"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Attribute map. Ordered so that equality and serialization are stable.
pub type Attrs = BTreeMap<String, serde_json::Value>;

/// Stable node identifier, never reused after deletion
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Half-open character range `[start, end)` inside a text node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarkRange {
    pub start: usize,
    pub end: usize,
}

impl MarkRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &MarkRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Inline annotation attached to a text node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub kind: String,

    #[serde(rename = "attributes", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: Attrs,

    /// Covered characters; `None` covers the whole text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<MarkRange>,
}

impl Mark {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attrs: Attrs::new(),
            range: None,
        }
    }

    pub fn with_range(mut self, start: usize, end: usize) -> Self {
        self.range = Some(MarkRange::new(start, end));
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Range the mark covers in a text of `text_len` characters
    pub fn effective_range(&self, text_len: usize) -> MarkRange {
        self.range.unwrap_or(MarkRange::new(0, text_len))
    }

    /// Canonical ordering key: kind, then whole-text marks, then by range,
    /// then by serialized attributes
    pub fn order_key(&self) -> (&str, Option<MarkRange>, String) {
        let attrs = serde_json::to_string(&self.attrs).unwrap_or_default();
        (self.kind.as_str(), self.range, attrs)
    }
}

/// Insert `mark` into `marks` keeping the canonical order.
///
/// Returns the index it landed at. Equal keys keep insertion order.
pub fn insert_mark_sorted(marks: &mut Vec<Mark>, mark: Mark) -> usize {
    let key = mark.order_key();
    let index = marks
        .iter()
        .position(|m| m.order_key() > key)
        .unwrap_or(marks.len());
    marks.insert(index, mark);
    index
}

/// A node as held by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: String,
    pub attrs: Attrs,

    /// Ordered child ids; `None` for leaves
    pub content: Option<Vec<NodeId>>,

    /// Character payload for text-bearing kinds
    pub text: Option<String>,

    pub marks: Vec<Mark>,

    pub parent: Option<NodeId>,

    /// Store version of the commit that last wrote this node
    pub version: u64,

    /// Millisecond timestamp of the last committed write
    pub updated_at: i64,

    pub created_at: i64,

    /// Tombstone flag
    pub removed: bool,
}

impl Node {
    pub fn from_data(data: NodeData) -> Self {
        Self {
            id: data.id,
            kind: data.kind,
            attrs: data.attrs,
            content: data.content,
            text: data.text,
            marks: data.marks,
            parent: None,
            version: 0,
            updated_at: 0,
            created_at: 0,
            removed: false,
        }
    }

    pub fn to_data(&self) -> NodeData {
        NodeData {
            id: self.id.clone(),
            kind: self.kind.clone(),
            attrs: self.attrs.clone(),
            content: self.content.clone(),
            text: self.text.clone(),
            marks: self.marks.clone(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.text.is_some()
    }

    /// Length in Unicode scalar values
    pub fn text_len(&self) -> usize {
        self.text.as_deref().map_or(0, |t| t.chars().count())
    }

    pub fn children(&self) -> &[NodeId] {
        self.content.as_deref().unwrap_or(&[])
    }

    pub fn child_index(&self, id: &NodeId) -> Option<usize> {
        self.children().iter().position(|c| c == id)
    }

    /// Structural equality, ignoring the commit bookkeeping fields
    pub fn same_content(&self, other: &Node) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.attrs == other.attrs
            && self.content == other.content
            && self.text == other.text
            && self.marks == other.marks
            && self.parent == other.parent
            && self.removed == other.removed
    }
}

/// Self-describing node record used for creation payloads and snapshots:
/// `{id, kind, attributes, content?, text?, marks?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: NodeId,
    pub kind: String,

    #[serde(rename = "attributes", default)]
    pub attrs: Attrs,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<NodeId>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub marks: Vec<Mark>,
}

impl NodeData {
    /// Node that can hold children
    pub fn element(id: impl Into<NodeId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            attrs: Attrs::new(),
            content: Some(Vec::new()),
            text: None,
            marks: Vec::new(),
        }
    }

    /// Text-bearing leaf
    pub fn text(id: impl Into<NodeId>, kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            attrs: Attrs::new(),
            content: None,
            text: Some(text.into()),
            marks: Vec::new(),
        }
    }

    /// Leaf without text (e.g. an image or a rule)
    pub fn leaf(id: impl Into<NodeId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            attrs: Attrs::new(),
            content: None,
            text: None,
            marks: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn with_content(mut self, content: Vec<NodeId>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_mark(mut self, mark: Mark) -> Self {
        insert_mark_sorted(&mut self.marks, mark);
        self
    }
}

/// Read access to nodes by id
pub trait NodeLookup {
    fn lookup(&self, id: &NodeId) -> Option<&Node>;
}

impl NodeLookup for HashMap<NodeId, Node> {
    fn lookup(&self, id: &NodeId) -> Option<&Node> {
        self.get(id)
    }
}

impl NodeLookup for BTreeMap<NodeId, Node> {
    fn lookup(&self, id: &NodeId) -> Option<&Node> {
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_len_counts_chars() {
        let node = Node::from_data(NodeData::text("t1", "text", "héllo"));
        assert_eq!(node.text_len(), 5);
        assert!(node.is_text());
        assert!(node.children().is_empty());
    }

    #[test]
    fn test_marks_kept_in_canonical_order() {
        let data = NodeData::text("t1", "text", "hello world")
            .with_mark(Mark::new("italic").with_range(6, 11))
            .with_mark(Mark::new("bold").with_range(2, 4))
            .with_mark(Mark::new("bold"));

        let kinds: Vec<_> = data.marks.iter().map(|m| (m.kind.as_str(), m.range)).collect();
        assert_eq!(
            kinds,
            vec![
                ("bold", None),
                ("bold", Some(MarkRange::new(2, 4))),
                ("italic", Some(MarkRange::new(6, 11))),
            ]
        );
    }

    #[test]
    fn test_same_kind_marks_order_by_attributes() {
        let note = |n: &str| Mark::new("comment").with_attr("note", json!(n)).with_range(0, 2);
        let mut marks = Vec::new();
        insert_mark_sorted(&mut marks, note("b"));
        assert_eq!(insert_mark_sorted(&mut marks, note("a")), 0);
        assert_eq!(marks, vec![note("a"), note("b")]);
    }

    #[test]
    fn test_node_data_record_format() {
        let data = NodeData::element("p1", "paragraph")
            .with_attr("align", json!("left"))
            .with_content(vec![NodeId::from("t1")]);

        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "p1",
                "kind": "paragraph",
                "attributes": { "align": "left" },
                "content": ["t1"]
            })
        );

        let back: NodeData = serde_json::from_value(value).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_same_content_ignores_bookkeeping() {
        let a = Node::from_data(NodeData::text("t1", "text", "a"));
        let mut b = a.clone();
        b.version = 7;
        b.updated_at = 1234;
        assert!(a.same_content(&b));

        b.text = Some("b".into());
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_range_overlap() {
        assert!(MarkRange::new(0, 3).overlaps(&MarkRange::new(2, 5)));
        assert!(!MarkRange::new(0, 3).overlaps(&MarkRange::new(3, 5)));
        assert!(MarkRange::new(2, 2).is_empty());
    }
}
