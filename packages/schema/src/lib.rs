//! # Folio Schema
//!
//! Declares which node kinds exist, what children they accept (content
//! patterns such as `"heading paragraph+"` or `"(paragraph | list)*"`), which
//! attributes and marks they carry, and validates nodes and whole documents
//! against those rules.

pub mod content;
pub mod error;
pub mod schema;
pub mod spec;
pub mod tokenizer;
pub mod validation;

pub use content::{ContentExpr, ContentMismatch};
pub use error::SchemaError;
pub use schema::{Schema, DEFAULT_TOP_NODE};
pub use spec::{AttrType, AttrValidator, AttributeSpec, MarkSpec, NodeSpec, SchemaSpec};
pub use tokenizer::{tokenize, Token};
pub use validation::{ErrorCode, ValidationIssue, ValidationResult};
