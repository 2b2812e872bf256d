//! # Schema
//!
//! Immutable, compiled form of a [`SchemaSpec`]. All validation entry points
//! are pure functions over the schema and the node data passed in.

use crate::content::ContentExpr;
use crate::error::SchemaError;
use crate::spec::{AttributeSpec, MarkSpec, NodeSpec, SchemaSpec};
use crate::validation::{ErrorCode, ValidationResult};
use folio_common::{walk, Attrs, Mark, Node, NodeId, NodeLookup, VisitFlow, Visitor};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_TOP_NODE: &str = "doc";

/// Compiled schema. Cloning is cheap and every clone shares the same rules.
#[derive(Debug, Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

#[derive(Debug)]
struct SchemaInner {
    spec: SchemaSpec,
    top_node: String,
    content: HashMap<String, ContentExpr>,
    /// Mark kinds allowed per node kind; `None` means any
    allowed_marks: HashMap<String, Option<BTreeSet<String>>>,
    /// Mark kinds each mark kind excludes
    excluded_marks: HashMap<String, BTreeSet<String>>,
}

impl Schema {
    pub fn new(spec: SchemaSpec) -> Result<Self, SchemaError> {
        let top_node = spec
            .top_node
            .clone()
            .unwrap_or_else(|| DEFAULT_TOP_NODE.to_string());
        if !spec.nodes.contains_key(&top_node) {
            return Err(SchemaError::MissingTopNode(top_node));
        }

        let node_groups = resolve_groups(spec.nodes.iter().map(|(k, s)| (k, s.groups().collect())));
        let mark_groups = resolve_groups(spec.marks.iter().map(|(k, s)| (k, s.groups().collect())));

        let mut content = HashMap::new();
        let mut allowed_marks = HashMap::new();
        for (kind, node_spec) in &spec.nodes {
            if let Some(pattern) = &node_spec.content {
                if node_spec.text {
                    return Err(SchemaError::TextWithContent(kind.clone()));
                }
                content.insert(kind.clone(), ContentExpr::compile(kind, pattern, &node_groups)?);
            }
            let allowed = resolve_mark_set(kind, node_spec.marks.as_deref(), &mark_groups)?;
            allowed_marks.insert(kind.clone(), allowed);
        }

        let mut excluded_marks = HashMap::new();
        for (kind, mark_spec) in &spec.marks {
            let excluded = match mark_spec.excludes.as_deref() {
                None => BTreeSet::from([kind.clone()]),
                Some(list) => resolve_mark_set(kind, Some(list), &mark_groups)?
                    .unwrap_or_else(|| spec.marks.keys().cloned().collect()),
            };
            excluded_marks.insert(kind.clone(), excluded);
        }

        tracing::debug!(
            schema = %spec.name,
            nodes = spec.nodes.len(),
            marks = spec.marks.len(),
            "[Schema] compiled"
        );

        Ok(Self {
            inner: Arc::new(SchemaInner {
                spec,
                top_node,
                content,
                allowed_marks,
                excluded_marks,
            }),
        })
    }

    /// Derive a new schema: node and mark definitions in `partial` replace
    /// those of the same name, everything else is kept. `self` is untouched.
    pub fn extend(&self, partial: SchemaSpec) -> Result<Schema, SchemaError> {
        let mut spec = self.inner.spec.clone();
        if !partial.name.is_empty() {
            spec.name = partial.name;
        }
        if partial.top_node.is_some() {
            spec.top_node = partial.top_node;
        }
        spec.nodes.extend(partial.nodes);
        spec.marks.extend(partial.marks);
        Schema::new(spec)
    }

    pub fn name(&self) -> &str {
        &self.inner.spec.name
    }

    pub fn top_node(&self) -> &str {
        &self.inner.top_node
    }

    pub fn spec(&self) -> &SchemaSpec {
        &self.inner.spec
    }

    pub fn node_spec(&self, kind: &str) -> Option<&NodeSpec> {
        self.inner.spec.nodes.get(kind)
    }

    pub fn mark_spec(&self, kind: &str) -> Option<&MarkSpec> {
        self.inner.spec.marks.get(kind)
    }

    pub fn content_expr(&self, kind: &str) -> Option<&ContentExpr> {
        self.inner.content.get(kind)
    }

    /// Copy of `attrs` with defaults filled in for absent attributes of `kind`
    pub fn fill_defaults(&self, kind: &str, attrs: &Attrs) -> Attrs {
        match self.node_spec(kind) {
            Some(spec) => with_defaults(&spec.attrs, attrs),
            None => attrs.clone(),
        }
    }

    /// Same as [`Schema::fill_defaults`] for a mark kind
    pub fn fill_mark_defaults(&self, kind: &str, attrs: &Attrs) -> Attrs {
        match self.mark_spec(kind) {
            Some(spec) => with_defaults(&spec.attrs, attrs),
            None => attrs.clone(),
        }
    }

    /// Check `attrs` against the attribute definitions of node kind `kind`
    pub fn validate_attributes(&self, kind: &str, attrs: &Attrs) -> ValidationResult {
        match self.node_spec(kind) {
            Some(spec) => check_attributes(kind, &spec.attrs, attrs),
            None => ValidationResult::failure(
                ErrorCode::NodeKindUnknown,
                format!("Unknown node kind '{}'", kind),
            ),
        }
    }

    pub fn validate_mark_attributes(&self, kind: &str, attrs: &Attrs) -> ValidationResult {
        match self.mark_spec(kind) {
            Some(spec) => check_attributes(kind, &spec.attrs, attrs),
            None => ValidationResult::failure(
                ErrorCode::MarkKindUnknown,
                format!("Unknown mark kind '{}'", kind),
            ),
        }
    }

    /// Check a sequence of child kinds against the content pattern of `kind`
    pub fn validate_content(&self, kind: &str, child_kinds: &[&str]) -> ValidationResult {
        let Some(spec) = self.node_spec(kind) else {
            return ValidationResult::failure(
                ErrorCode::NodeKindUnknown,
                format!("Unknown node kind '{}'", kind),
            );
        };

        let Some(expr) = self.content_expr(kind) else {
            if child_kinds.is_empty() {
                return ValidationResult::ok();
            }
            let what = if spec.text { "Text node" } else { "Leaf node" };
            return ValidationResult::failure(
                ErrorCode::ContentNotAllowed,
                format!("{} '{}' cannot have children", what, kind),
            );
        };

        match expr.matches(child_kinds) {
            Ok(()) => ValidationResult::ok(),
            Err(mismatch) => {
                let expected = if mismatch.expected.is_empty() {
                    "nothing".to_string()
                } else {
                    mismatch.expected.join(", ")
                };
                let message = match mismatch.index {
                    Some(index) => format!(
                        "Content of '{}' does not match '{}': unexpected '{}' at index {} (expected {})",
                        kind,
                        expr.source(),
                        child_kinds[index],
                        index,
                        expected
                    ),
                    None => format!(
                        "Content of '{}' does not match '{}': sequence ended early (expected {})",
                        kind,
                        expr.source(),
                        expected
                    ),
                };
                ValidationResult::failure(ErrorCode::ContentPatternMismatch, message)
            }
        }
    }

    /// Validate one node. Child kinds are resolved through `lookup`.
    pub fn validate_node<L>(&self, node: &Node, lookup: &L) -> ValidationResult
    where
        L: NodeLookup + ?Sized,
    {
        let Some(spec) = self.node_spec(&node.kind) else {
            return ValidationResult::failure(
                ErrorCode::NodeKindUnknown,
                format!("Node '{}' has unknown kind '{}'", node.id, node.kind),
            );
        };

        let mut result = self.validate_attributes(&node.kind, &node.attrs);

        match (&node.text, spec.text) {
            (Some(_), false) => result.push(
                ErrorCode::TextNotAllowed,
                format!("Node '{}' of kind '{}' cannot carry text", node.id, node.kind),
            ),
            (None, true) => result.push(
                ErrorCode::TextRequired,
                format!("Text node '{}' has no text payload", node.id),
            ),
            _ => {}
        }

        let mut child_kinds = Vec::with_capacity(node.children().len());
        for child_id in node.children() {
            match lookup.lookup(child_id) {
                Some(child) => child_kinds.push(child.kind.as_str()),
                None => result.push(
                    ErrorCode::ChildNotFound,
                    format!("Node '{}' references missing child '{}'", node.id, child_id),
                ),
            }
        }
        if !result.has_code(ErrorCode::ChildNotFound) {
            result.merge(self.validate_content(&node.kind, &child_kinds));
        }

        result.merge(self.validate_marks(node, spec));
        result
    }

    /// Validate the whole tree under `root`, which must be of the top node kind
    pub fn validate_document<L>(&self, root: &NodeId, lookup: &L) -> ValidationResult
    where
        L: NodeLookup + ?Sized,
    {
        let Some(root_node) = lookup.lookup(root) else {
            return ValidationResult::failure(
                ErrorCode::ChildNotFound,
                format!("Document root '{}' not found", root),
            );
        };

        let mut result = ValidationResult::ok();
        if root_node.kind != self.top_node() {
            result.push(
                ErrorCode::DocumentRootMismatch,
                format!(
                    "Document root '{}' is '{}', expected '{}'",
                    root,
                    root_node.kind,
                    self.top_node()
                ),
            );
        }

        struct ValidateAll<'a, L: ?Sized> {
            schema: &'a Schema,
            lookup: &'a L,
            seen: HashSet<NodeId>,
            result: ValidationResult,
        }

        impl<'a, L: NodeLookup + ?Sized> Visitor for ValidateAll<'a, L> {
            fn enter(&mut self, node: &Node, _depth: usize) -> VisitFlow {
                if !self.seen.insert(node.id.clone()) {
                    return VisitFlow::SkipChildren;
                }
                let node_result = self.schema.validate_node(node, self.lookup);
                self.result.merge(node_result);
                VisitFlow::Continue
            }
        }

        let mut visitor = ValidateAll {
            schema: self,
            lookup,
            seen: HashSet::new(),
            result,
        };
        walk(lookup, root, &mut visitor);
        visitor.result
    }

    fn validate_marks(&self, node: &Node, spec: &NodeSpec) -> ValidationResult {
        let mut result = ValidationResult::ok();
        if node.marks.is_empty() {
            return result;
        }
        if !spec.text {
            result.push(
                ErrorCode::MarkNotAllowed,
                format!("Node '{}' of kind '{}' cannot carry marks", node.id, node.kind),
            );
            return result;
        }

        let text_len = node.text_len();
        let allowed = self.inner.allowed_marks.get(&node.kind).and_then(|a| a.as_ref());

        for mark in &node.marks {
            if self.mark_spec(&mark.kind).is_none() {
                result.push(
                    ErrorCode::MarkKindUnknown,
                    format!("Node '{}' has unknown mark '{}'", node.id, mark.kind),
                );
                continue;
            }
            if let Some(allowed) = allowed {
                if !allowed.contains(&mark.kind) {
                    result.push(
                        ErrorCode::MarkNotAllowed,
                        format!("Mark '{}' is not allowed on '{}'", mark.kind, node.kind),
                    );
                }
            }
            result.merge(self.validate_mark_attributes(&mark.kind, &mark.attrs));
            if let Some(range) = mark.range {
                if range.is_empty() || range.end > text_len {
                    result.push(
                        ErrorCode::MarkRangeInvalid,
                        format!(
                            "Mark '{}' range {}..{} is invalid for text of length {}",
                            mark.kind, range.start, range.end, text_len
                        ),
                    );
                }
            }
        }

        for (i, a) in node.marks.iter().enumerate() {
            for b in &node.marks[i + 1..] {
                if self.marks_conflict(a, b, text_len) {
                    result.push(
                        ErrorCode::MarkExclusionConflict,
                        format!("Mark '{}' cannot overlap mark '{}' on '{}'", a.kind, b.kind, node.id),
                    );
                }
            }
        }

        result
    }

    fn marks_conflict(&self, a: &Mark, b: &Mark, text_len: usize) -> bool {
        let excludes = |x: &Mark, y: &Mark| {
            self.inner
                .excluded_marks
                .get(&x.kind)
                .is_some_and(|set| set.contains(&y.kind))
        };
        if !(excludes(a, b) || excludes(b, a)) {
            return false;
        }
        let ra = a.effective_range(text_len);
        let rb = b.effective_range(text_len);
        // Whole-text marks on empty text still collide with each other
        ra.overlaps(&rb) || (a.range.is_none() && b.range.is_none())
    }
}

fn with_defaults(specs: &BTreeMap<String, AttributeSpec>, attrs: &Attrs) -> Attrs {
    let mut out = attrs.clone();
    for (name, spec) in specs {
        if let Some(default) = &spec.default {
            out.entry(name.clone()).or_insert_with(|| default.clone());
        }
    }
    out
}

// required -> type -> custom validator, first failure wins per attribute
fn check_attributes(
    kind: &str,
    specs: &BTreeMap<String, AttributeSpec>,
    attrs: &Attrs,
) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for (name, spec) in specs {
        let value = match attrs.get(name) {
            Some(serde_json::Value::Null) | None => {
                if spec.required {
                    result.push(
                        ErrorCode::AttributeRequired,
                        format!("'{}' requires attribute '{}'", kind, name),
                    );
                }
                continue;
            }
            Some(value) => value,
        };

        if let Some(value_type) = spec.value_type {
            if !value_type.accepts(value) {
                result.push(
                    ErrorCode::AttributeTypeMismatch,
                    format!(
                        "Attribute '{}' of '{}' must be {}, got {}",
                        name, kind, value_type, value
                    ),
                );
                continue;
            }
        }

        if let Some(validator) = &spec.validator {
            if let Err(reason) = validator(value) {
                result.push(
                    ErrorCode::AttributeInvalid,
                    format!("Attribute '{}' of '{}' is invalid: {}", name, kind, reason),
                );
            }
        }
    }
    result
}

/// Map every kind and group name to the kinds it stands for
fn resolve_groups<'a>(
    entries: impl Iterator<Item = (&'a String, Vec<&'a str>)>,
) -> HashMap<String, BTreeSet<String>> {
    let mut map: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut groups: Vec<(String, String)> = Vec::new();
    for (kind, kind_groups) in entries {
        map.entry(kind.clone()).or_default().insert(kind.clone());
        for group in kind_groups {
            groups.push((group.to_string(), kind.clone()));
        }
    }
    for (group, kind) in groups {
        map.entry(group).or_default().insert(kind);
    }
    map
}

// `None` / "_" -> any mark, "" -> none, otherwise names or groups
fn resolve_mark_set(
    context: &str,
    list: Option<&str>,
    mark_groups: &HashMap<String, BTreeSet<String>>,
) -> Result<Option<BTreeSet<String>>, SchemaError> {
    let list = match list {
        None => return Ok(None),
        Some(list) if list.trim() == "_" => return Ok(None),
        Some(list) => list,
    };
    let mut set = BTreeSet::new();
    for name in list.split_whitespace() {
        let kinds = mark_groups
            .get(name)
            .ok_or_else(|| SchemaError::UnknownMarkName {
                context: context.to_string(),
                name: name.to_string(),
            })?;
        set.extend(kinds.iter().cloned());
    }
    Ok(Some(set))
}
