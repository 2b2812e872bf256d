//! # Schema Specs
//!
//! Plain, serializable descriptions of node kinds, mark kinds and their
//! attributes. A [`SchemaSpec`] is compiled into an immutable
//! [`crate::Schema`].
//!
//! ## Example (JSON)
//!
//! ```json
//! {
//!   "name": "basic",
//!   "topNode": "doc",
//!   "nodes": {
//!     "doc":       { "content": "block+" },
//!     "paragraph": { "content": "inline*", "group": "block" },
//!     "heading":   { "content": "inline*", "group": "block",
//!                    "attrs": { "level": { "required": true, "type": "integer" } } },
//!     "text":      { "group": "inline", "text": true }
//!   },
//!   "marks": {
//!     "bold": {},
//!     "link": { "attrs": { "href": { "required": true, "type": "string" } }, "excludes": "" }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Custom attribute check, run after the required and type checks
pub type AttrValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// JSON type an attribute value must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl AttrType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            AttrType::String => value.is_string(),
            AttrType::Number => value.is_number(),
            AttrType::Integer => value.is_i64() || value.is_u64(),
            AttrType::Boolean => value.is_boolean(),
            AttrType::Object => value.is_object(),
            AttrType::Array => value.is_array(),
            AttrType::Any => true,
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrType::String => "string",
            AttrType::Number => "number",
            AttrType::Integer => "integer",
            AttrType::Boolean => "boolean",
            AttrType::Object => "object",
            AttrType::Array => "array",
            AttrType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Definition of a single attribute
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AttributeSpec {
    #[serde(default)]
    pub required: bool,

    /// Filled in on creation when the attribute is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<AttrType>,

    /// Not serializable; attach after loading
    #[serde(skip)]
    pub validator: Option<AttrValidator>,
}

impl AttributeSpec {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    pub fn optional() -> Self {
        Self::default()
    }

    pub fn with_default(default: Value) -> Self {
        Self {
            default: Some(default),
            ..Self::default()
        }
    }

    pub fn of_type(mut self, value_type: AttrType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn validate_with<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }
}

impl fmt::Debug for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSpec")
            .field("required", &self.required)
            .field("default", &self.default)
            .field("value_type", &self.value_type)
            .field("validator", &self.validator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Definition of a node kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Content pattern; `None` makes the kind a leaf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Space separated group names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttributeSpec>,

    /// Whether the kind carries an inline character payload
    #[serde(default)]
    pub text: bool,

    /// Marks allowed on this kind: `"_"` any, `""` none, otherwise space
    /// separated mark kinds or groups. Unset allows any mark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<String>,
}

impl NodeSpec {
    pub fn element(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn text() -> Self {
        Self {
            text: true,
            ..Self::default()
        }
    }

    pub fn leaf() -> Self {
        Self::default()
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, spec: AttributeSpec) -> Self {
        self.attrs.insert(name.into(), spec);
        self
    }

    pub fn allow_marks(mut self, marks: impl Into<String>) -> Self {
        self.marks = Some(marks.into());
        self
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.group.as_deref().unwrap_or("").split_whitespace()
    }
}

/// Definition of a mark kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttributeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Marks this one cannot overlap with: `"_"` all, `""` none, otherwise
    /// space separated kinds or groups. Unset excludes its own kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excludes: Option<String>,
}

impl MarkSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, spec: AttributeSpec) -> Self {
        self.attrs.insert(name.into(), spec);
        self
    }

    pub fn excludes(mut self, excludes: impl Into<String>) -> Self {
        self.excludes = Some(excludes.into());
        self
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.group.as_deref().unwrap_or("").split_whitespace()
    }
}

/// Full (or, for [`crate::Schema::extend`], partial) schema description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSpec {
    #[serde(default)]
    pub name: String,

    /// Kind of document roots; defaults to `"doc"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_node: Option<String>,

    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSpec>,

    #[serde(default)]
    pub marks: BTreeMap<String, MarkSpec>,
}

impl SchemaSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn top_node(mut self, kind: impl Into<String>) -> Self {
        self.top_node = Some(kind.into());
        self
    }

    pub fn node(mut self, kind: impl Into<String>, spec: NodeSpec) -> Self {
        self.nodes.insert(kind.into(), spec);
        self
    }

    pub fn mark(mut self, kind: impl Into<String>, spec: MarkSpec) -> Self {
        self.marks.insert(kind.into(), spec);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_schema_spec_json() {
        let json = r#"{
            "name": "basic",
            "topNode": "doc",
            "nodes": {
                "doc": { "content": "block+" },
                "heading": {
                    "content": "inline*",
                    "group": "block",
                    "attrs": { "level": { "required": true, "type": "integer" } }
                },
                "text": { "group": "inline", "text": true }
            },
            "marks": { "link": { "excludes": "" } }
        }"#;

        let spec: SchemaSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.name, "basic");
        assert_eq!(spec.top_node.as_deref(), Some("doc"));
        assert_eq!(spec.nodes.len(), 3);

        let level = &spec.nodes["heading"].attrs["level"];
        assert!(level.required);
        assert_eq!(level.value_type, Some(AttrType::Integer));
        assert!(spec.nodes["text"].text);
        assert_eq!(spec.marks["link"].excludes.as_deref(), Some(""));
    }

    #[test]
    fn test_attr_types() {
        assert!(AttrType::Integer.accepts(&json!(3)));
        assert!(!AttrType::Integer.accepts(&json!(3.5)));
        assert!(AttrType::Number.accepts(&json!(3.5)));
        assert!(AttrType::String.accepts(&json!("x")));
        assert!(!AttrType::Boolean.accepts(&json!("true")));
        assert!(AttrType::Any.accepts(&json!(null)));
    }

    #[test]
    fn test_groups_split_on_whitespace() {
        let spec = NodeSpec::text().in_group("inline  phrasing");
        assert_eq!(spec.groups().collect::<Vec<_>>(), vec!["inline", "phrasing"]);
        assert_eq!(NodeSpec::leaf().groups().count(), 0);
    }
}
