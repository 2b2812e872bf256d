//! # Built-in Operations
//!
//! ## Inverse pairs
//!
//! | operation     | inverse                                         |
//! |---------------|-------------------------------------------------|
//! | `create`      | `delete` (keeping adopted children detached)    |
//! | `delete`      | `create` with the prior node, parent and index  |
//! | `set-text`    | `set-text` with the prior text                  |
//! | `insert-text` | `delete-text`                                   |
//! | `delete-text` | `insert-text` with the removed characters       |
//! | `set-attrs`   | `set-attrs` with the prior attribute map        |
//! | `set-attr`    | `set-attr` with the prior value (`null` unsets) |
//! | `apply-mark`  | `remove-mark`                                   |
//! | `remove-mark` | `apply-mark`                                    |
//! | `toggle-mark` | `toggle-mark` (applying twice is a no-op)       |
//! | `move`        | `move` back to the prior parent and index       |
//!
//! Text offsets count Unicode scalar values. Text edits carry the prior mark
//! list in their inverse whenever they changed it, so undo restores marks
//! exactly.
//!
//! ## Create and delete
//!
//! Nodes are built bottom-up: a node created without a parent stays
//! detached until a later `create` lists it in `content` (adopting it) or it
//! is the schema's top node, in which case it becomes a document root.
//! `delete` tombstones the whole subtree; `create` with a tombstoned id
//! revives it together with the tombstoned descendants it still lists.

use crate::errors::OperationError;
use crate::position::{MapStep, PositionMapping};
use crate::registry::{Operation, OperationOutcome, TypedOperation};
use crate::store::StoreView;
use folio_common::{insert_mark_sorted, Attrs, Mark, MarkRange, Node, NodeData, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CREATE: &str = "create";
pub const DELETE: &str = "delete";
pub const SET_TEXT: &str = "set-text";
pub const INSERT_TEXT: &str = "insert-text";
pub const DELETE_TEXT: &str = "delete-text";
pub const SET_ATTRS: &str = "set-attrs";
pub const SET_ATTR: &str = "set-attr";
pub const APPLY_MARK: &str = "apply-mark";
pub const REMOVE_MARK: &str = "remove-mark";
pub const TOGGLE_MARK: &str = "toggle-mark";
pub const MOVE: &str = "move";

// --- payloads -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePayload {
    pub node: NodeData,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,

    /// Position among the parent's children; appends when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePayload {
    pub id: NodeId,

    /// Detach the children instead of tombstoning them
    #[serde(default, skip_serializing_if = "is_false")]
    pub keep_children: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTextPayload {
    pub id: NodeId,
    pub text: String,

    /// Mark list to install instead of clipping the current one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<Vec<Mark>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertTextPayload {
    pub id: NodeId,
    pub offset: usize,
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<Vec<Mark>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteTextPayload {
    pub id: NodeId,
    pub offset: usize,
    pub length: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<Vec<Mark>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetAttrsPayload {
    pub id: NodeId,
    #[serde(rename = "attributes")]
    pub attrs: Attrs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetAttrPayload {
    pub id: NodeId,
    pub name: String,
    /// `null` removes the attribute
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub id: NodeId,
    pub mark: Mark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePayload {
    pub id: NodeId,
    pub parent: NodeId,
    pub index: usize,
}

fn is_false(value: &bool) -> bool {
    !*value
}

// --- constructors ---------------------------------------------------------

impl Operation {
    /// Create a detached node, or a document root for the top node kind
    pub fn create(node: NodeData) -> Self {
        Self::typed::<CreateNode>(&CreatePayload {
            node,
            parent: None,
            index: None,
        })
    }

    /// Create a node under `parent`; `index` of `None` appends
    pub fn create_in(node: NodeData, parent: impl Into<NodeId>, index: Option<usize>) -> Self {
        Self::typed::<CreateNode>(&CreatePayload {
            node,
            parent: Some(parent.into()),
            index,
        })
    }

    pub fn delete(id: impl Into<NodeId>) -> Self {
        Self::typed::<DeleteNode>(&DeletePayload {
            id: id.into(),
            keep_children: false,
        })
    }

    pub fn set_text(id: impl Into<NodeId>, text: impl Into<String>) -> Self {
        Self::typed::<SetText>(&SetTextPayload {
            id: id.into(),
            text: text.into(),
            marks: None,
        })
    }

    pub fn insert_text(id: impl Into<NodeId>, offset: usize, text: impl Into<String>) -> Self {
        Self::typed::<InsertText>(&InsertTextPayload {
            id: id.into(),
            offset,
            text: text.into(),
            marks: None,
        })
    }

    pub fn delete_text(id: impl Into<NodeId>, offset: usize, length: usize) -> Self {
        Self::typed::<DeleteText>(&DeleteTextPayload {
            id: id.into(),
            offset,
            length,
            marks: None,
        })
    }

    pub fn set_attrs(id: impl Into<NodeId>, attrs: Attrs) -> Self {
        Self::typed::<SetAttrs>(&SetAttrsPayload {
            id: id.into(),
            attrs,
        })
    }

    pub fn set_attr(id: impl Into<NodeId>, name: impl Into<String>, value: Value) -> Self {
        Self::typed::<SetAttr>(&SetAttrPayload {
            id: id.into(),
            name: name.into(),
            value,
        })
    }

    pub fn apply_mark(id: impl Into<NodeId>, mark: Mark) -> Self {
        Self::typed::<ApplyMark>(&MarkPayload { id: id.into(), mark })
    }

    pub fn remove_mark(id: impl Into<NodeId>, mark: Mark) -> Self {
        Self::typed::<RemoveMark>(&MarkPayload { id: id.into(), mark })
    }

    pub fn toggle_mark(id: impl Into<NodeId>, mark: Mark) -> Self {
        Self::typed::<ToggleMark>(&MarkPayload { id: id.into(), mark })
    }

    pub fn move_node(id: impl Into<NodeId>, parent: impl Into<NodeId>, index: usize) -> Self {
        Self::typed::<MoveNode>(&MovePayload {
            id: id.into(),
            parent: parent.into(),
            index,
        })
    }
}

// --- create / delete ------------------------------------------------------

pub struct CreateNode;

impl TypedOperation for CreateNode {
    const NAME: &'static str = CREATE;
    type Payload = CreatePayload;

    fn apply(payload: CreatePayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let CreatePayload {
            node: data,
            parent,
            index,
        } = payload;
        let id = data.id.clone();
        let kind = data.kind.clone();
        let children = data.content.clone().unwrap_or_default();

        let revive_from = match view.get_any(&id) {
            Some(existing) if !existing.removed => {
                return Err(OperationError::AlreadyExists(id));
            }
            Some(existing) => Some(existing.created_at),
            None => None,
        };
        let adopts_live = children.iter().any(|c| view.get(c).is_some());

        let attrs = view.schema().fill_defaults(&kind, &data.attrs);
        let mut node = Node::from_data(NodeData { attrs, ..data });

        match revive_from {
            Some(created_at) => {
                // Restore the tombstone with the requested child list so that
                // tombstoned descendants come back with it
                node.created_at = created_at;
                node.removed = true;
                view.put(node);
                view.revive_subtree(&id)?;
                tracing::debug!(node = %id, "[create] revived tombstone");
            }
            None => {
                node.content = node.content.map(|_| Vec::new());
                view.insert_new(node)?;
            }
        }
        if !children.is_empty() {
            view.set_children(&id, children)?;
        }

        match &parent {
            Some(parent_id) => {
                let mut siblings = view.require(parent_id)?.children().to_vec();
                let index = index.unwrap_or(siblings.len());
                if index > siblings.len() {
                    return Err(OperationError::InvalidStructure(format!(
                        "index {} out of range for '{}' with {} children",
                        index,
                        parent_id,
                        siblings.len()
                    )));
                }
                siblings.insert(index, id.clone());
                view.set_children(parent_id, siblings)?;
                view.validate(&[&id, parent_id])?;
            }
            None => {
                if kind == view.schema().top_node() {
                    view.add_root(id.clone());
                }
                view.validate(&[&id])?;
            }
        }

        let inverse = Operation::typed::<DeleteNode>(&DeletePayload {
            id: id.clone(),
            keep_children: adopts_live,
        });
        Ok(OperationOutcome::new(inverse).with_data(view.get(&id).cloned()))
    }
}

pub struct DeleteNode;

impl TypedOperation for DeleteNode {
    const NAME: &'static str = DELETE;
    type Payload = DeletePayload;

    fn apply(payload: DeletePayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let DeletePayload { id, keep_children } = payload;
        let node = view.require(&id)?;
        let prior = node.to_data();
        let parent = node.parent.clone();
        let has_children = !node.children().is_empty();

        let mut index = None;
        if let Some(parent_id) = &parent {
            let mut siblings = view.require(parent_id)?.children().to_vec();
            index = siblings.iter().position(|c| c == &id);
            siblings.retain(|c| c != &id);
            view.set_children(parent_id, siblings)?;
        }
        if keep_children && has_children {
            view.set_children(&id, Vec::new())?;
        }

        let removed = view.tombstone_subtree(&id)?;
        if let Some(parent_id) = &parent {
            view.validate(&[parent_id])?;
        }

        let mut mapping = PositionMapping::new();
        for node in &removed {
            mapping.push(MapStep::Removed { node: node.clone() });
        }

        let inverse = Operation::typed::<CreateNode>(&CreatePayload {
            node: prior,
            parent,
            index,
        });
        Ok(OperationOutcome::new(inverse).with_mapping(mapping))
    }
}

// --- text -----------------------------------------------------------------

fn char_count(text: &str) -> usize {
    text.chars().count()
}

fn byte_index(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map_or(text.len(), |(i, _)| i)
}

fn current_text(node: &Node) -> Result<String, OperationError> {
    node.text.clone().ok_or_else(|| {
        OperationError::InvalidStructure(format!("'{}' ({}) has no text", node.id, node.kind))
    })
}

/// Marks after the text shrank to `len` characters
fn clip_marks(marks: &[Mark], len: usize) -> Vec<Mark> {
    marks
        .iter()
        .filter_map(|mark| match mark.range {
            None => Some(mark.clone()),
            Some(range) if range.start >= len => None,
            Some(range) => Some(Mark {
                range: Some(MarkRange::new(range.start, range.end.min(len))),
                ..mark.clone()
            }),
        })
        .collect()
}

pub struct SetText;

impl TypedOperation for SetText {
    const NAME: &'static str = SET_TEXT;
    type Payload = SetTextPayload;

    fn apply(payload: SetTextPayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let node = view.require(&payload.id)?;
        let prior_text = node.text.clone().unwrap_or_default();
        let prior_marks = node.marks.clone();

        let len = char_count(&payload.text);
        let marks = payload
            .marks
            .unwrap_or_else(|| clip_marks(&prior_marks, len));

        let node = view.node_mut(&payload.id)?;
        node.text = Some(payload.text);
        let marks_changed = marks != prior_marks;
        node.marks = marks;
        view.validate(&[&payload.id])?;

        let inverse = Operation::typed::<SetText>(&SetTextPayload {
            id: payload.id.clone(),
            text: prior_text,
            marks: marks_changed.then_some(prior_marks),
        });
        Ok(OperationOutcome::new(inverse)
            .with_data(view.get(&payload.id).cloned())
            .with_mapping(PositionMapping::single(MapStep::Replace {
                node: payload.id,
                len,
            })))
    }
}

pub struct InsertText;

impl TypedOperation for InsertText {
    const NAME: &'static str = INSERT_TEXT;
    type Payload = InsertTextPayload;

    fn apply(payload: InsertTextPayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let InsertTextPayload {
            id,
            offset,
            text,
            marks,
        } = payload;
        let node = view.require(&id)?;
        let mut current = current_text(node)?;
        let len = char_count(&current);
        if offset > len {
            return Err(OperationError::OffsetOutOfRange { id, offset, len });
        }
        let inserted = char_count(&text);
        let prior_marks = node.marks.clone();

        let marks = marks.unwrap_or_else(|| {
            prior_marks
                .iter()
                .map(|mark| match mark.range {
                    Some(range) => {
                        let start = if range.start >= offset { range.start + inserted } else { range.start };
                        let end = if range.end > offset { range.end + inserted } else { range.end };
                        Mark {
                            range: Some(MarkRange::new(start, end)),
                            ..mark.clone()
                        }
                    }
                    None => mark.clone(),
                })
                .collect()
        });

        current.insert_str(byte_index(&current, offset), &text);
        let node = view.node_mut(&id)?;
        node.text = Some(current);
        let marks_changed = marks != prior_marks;
        node.marks = marks;
        view.validate(&[&id])?;

        let inverse = Operation::typed::<DeleteText>(&DeleteTextPayload {
            id: id.clone(),
            offset,
            length: inserted,
            marks: marks_changed.then_some(prior_marks),
        });
        Ok(OperationOutcome::new(inverse)
            .with_data(view.get(&id).cloned())
            .with_mapping(PositionMapping::single(MapStep::Insert {
                node: id,
                offset,
                len: inserted,
            })))
    }
}

pub struct DeleteText;

impl TypedOperation for DeleteText {
    const NAME: &'static str = DELETE_TEXT;
    type Payload = DeleteTextPayload;

    fn apply(payload: DeleteTextPayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let DeleteTextPayload {
            id,
            offset,
            length,
            marks,
        } = payload;
        let node = view.require(&id)?;
        let current = current_text(node)?;
        let len = char_count(&current);
        let end = offset.saturating_add(length);
        if end > len {
            return Err(OperationError::OffsetOutOfRange {
                id,
                offset: end,
                len,
            });
        }
        let prior_marks = node.marks.clone();

        let shift = |x: usize| {
            if x <= offset {
                x
            } else if x >= end {
                x - length
            } else {
                offset
            }
        };
        let marks = marks.unwrap_or_else(|| {
            prior_marks
                .iter()
                .filter_map(|mark| match mark.range {
                    Some(range) => {
                        let range = MarkRange::new(shift(range.start), shift(range.end));
                        (!range.is_empty()).then(|| Mark {
                            range: Some(range),
                            ..mark.clone()
                        })
                    }
                    None => Some(mark.clone()),
                })
                .collect()
        });

        let start_byte = byte_index(&current, offset);
        let end_byte = byte_index(&current, end);
        let removed = current[start_byte..end_byte].to_string();
        let mut text = current;
        text.replace_range(start_byte..end_byte, "");

        let node = view.node_mut(&id)?;
        node.text = Some(text);
        let marks_changed = marks != prior_marks;
        node.marks = marks;
        view.validate(&[&id])?;

        let inverse = Operation::typed::<InsertText>(&InsertTextPayload {
            id: id.clone(),
            offset,
            text: removed,
            marks: marks_changed.then_some(prior_marks),
        });
        Ok(OperationOutcome::new(inverse)
            .with_data(view.get(&id).cloned())
            .with_mapping(PositionMapping::single(MapStep::Delete {
                node: id,
                offset,
                len: length,
            })))
    }
}

// --- attributes -----------------------------------------------------------

pub struct SetAttrs;

impl TypedOperation for SetAttrs {
    const NAME: &'static str = SET_ATTRS;
    type Payload = SetAttrsPayload;

    fn apply(payload: SetAttrsPayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let node = view.node_mut(&payload.id)?;
        let prior = std::mem::replace(&mut node.attrs, payload.attrs);
        view.validate(&[&payload.id])?;

        let inverse = Operation::set_attrs(payload.id.clone(), prior);
        Ok(OperationOutcome::new(inverse).with_data(view.get(&payload.id).cloned()))
    }
}

pub struct SetAttr;

impl TypedOperation for SetAttr {
    const NAME: &'static str = SET_ATTR;
    type Payload = SetAttrPayload;

    fn apply(payload: SetAttrPayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let SetAttrPayload { id, name, value } = payload;
        let node = view.node_mut(&id)?;
        let prior = if value.is_null() {
            node.attrs.remove(&name)
        } else {
            node.attrs.insert(name.clone(), value)
        };
        view.validate(&[&id])?;

        let inverse = Operation::set_attr(id.clone(), name, prior.unwrap_or(Value::Null));
        Ok(OperationOutcome::new(inverse).with_data(view.get(&id).cloned()))
    }
}

// --- marks ----------------------------------------------------------------

/// Same-kind marks may overlap, so a mark is identified by kind, attributes
/// and range together
fn find_mark(node: &Node, mark: &Mark) -> Option<usize> {
    node.marks.iter().position(|m| m == mark)
}

fn with_defaults(view: &StoreView<'_>, mut mark: Mark) -> Mark {
    mark.attrs = view.schema().fill_mark_defaults(&mark.kind, &mark.attrs);
    mark
}

fn add_mark(view: &mut StoreView<'_>, id: &NodeId, mark: Mark) -> Result<Mark, OperationError> {
    let mark = with_defaults(view, mark);
    let node = view.node_mut(id)?;
    insert_mark_sorted(&mut node.marks, mark.clone());
    view.validate(&[id])?;
    Ok(mark)
}

fn take_mark(view: &mut StoreView<'_>, id: &NodeId, mark: Mark) -> Result<Mark, OperationError> {
    let mark = with_defaults(view, mark);
    let index = find_mark(view.require(id)?, &mark).ok_or_else(|| OperationError::MarkNotFound {
        id: id.clone(),
        kind: mark.kind.clone(),
    })?;
    let removed = view.node_mut(id)?.marks.remove(index);
    view.validate(&[id])?;
    Ok(removed)
}

pub struct ApplyMark;

impl TypedOperation for ApplyMark {
    const NAME: &'static str = APPLY_MARK;
    type Payload = MarkPayload;

    fn apply(payload: MarkPayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let added = add_mark(view, &payload.id, payload.mark)?;
        let inverse = Operation::remove_mark(payload.id.clone(), added);
        Ok(OperationOutcome::new(inverse).with_data(view.get(&payload.id).cloned()))
    }
}

pub struct RemoveMark;

impl TypedOperation for RemoveMark {
    const NAME: &'static str = REMOVE_MARK;
    type Payload = MarkPayload;

    fn apply(payload: MarkPayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let removed = take_mark(view, &payload.id, payload.mark)?;
        let inverse = Operation::apply_mark(payload.id.clone(), removed);
        Ok(OperationOutcome::new(inverse).with_data(view.get(&payload.id).cloned()))
    }
}

/// Removes an equal mark if present, adds it otherwise. Its own inverse.
pub struct ToggleMark;

impl TypedOperation for ToggleMark {
    const NAME: &'static str = TOGGLE_MARK;
    type Payload = MarkPayload;

    fn apply(payload: MarkPayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let mark = with_defaults(view, payload.mark);
        let present = find_mark(view.require(&payload.id)?, &mark).is_some();
        let toggled = if present {
            take_mark(view, &payload.id, mark)?
        } else {
            add_mark(view, &payload.id, mark)?
        };
        let inverse = Operation::toggle_mark(payload.id.clone(), toggled);
        Ok(OperationOutcome::new(inverse).with_data(view.get(&payload.id).cloned()))
    }
}

// --- move -----------------------------------------------------------------

pub struct MoveNode;

impl TypedOperation for MoveNode {
    const NAME: &'static str = MOVE;
    type Payload = MovePayload;

    fn apply(payload: MovePayload, view: &mut StoreView<'_>) -> Result<OperationOutcome, OperationError> {
        let MovePayload { id, parent, index } = payload;
        let old_parent = view.require(&id)?.parent.clone().ok_or_else(|| {
            OperationError::InvalidStructure(format!("'{}' has no parent to move from", id))
        })?;
        view.require(&parent)?;

        // Moving under itself or a descendant
        let mut ancestor = Some(parent.clone());
        while let Some(current) = ancestor {
            if current == id {
                return Err(OperationError::CycleDetected);
            }
            ancestor = view.get(&current).and_then(|n| n.parent.clone());
        }

        let mut old_siblings = view.require(&old_parent)?.children().to_vec();
        let old_index = old_siblings
            .iter()
            .position(|c| c == &id)
            .ok_or_else(|| {
                OperationError::InvalidStructure(format!(
                    "'{}' is not listed by its parent '{}'",
                    id, old_parent
                ))
            })?;
        old_siblings.remove(old_index);
        view.set_children(&old_parent, old_siblings)?;

        let mut siblings = view.require(&parent)?.children().to_vec();
        if index > siblings.len() {
            return Err(OperationError::InvalidStructure(format!(
                "index {} out of range for '{}' with {} children",
                index,
                parent,
                siblings.len()
            )));
        }
        siblings.insert(index, id.clone());
        view.set_children(&parent, siblings)?;
        view.validate(&[&old_parent, &parent])?;

        let inverse = Operation::move_node(id.clone(), old_parent, old_index);
        Ok(OperationOutcome::new(inverse).with_data(view.get(&id).cloned()))
    }
}
