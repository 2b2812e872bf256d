use thiserror::Error;

/// Errors raised while building a schema. Validation failures of documents
/// are reported through [`crate::ValidationResult`] instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Lexer error in content pattern '{pattern}' at {pos}")]
    Lexer { pattern: String, pos: usize },

    #[error("Invalid content pattern for '{kind}' at {pos}: {message}")]
    InvalidContentExpr {
        kind: String,
        pos: usize,
        message: String,
    },

    #[error("Content pattern for '{kind}' references unknown node kind or group '{name}'")]
    UnknownContentName { kind: String, name: String },

    #[error("'{context}' references unknown mark kind or group '{name}'")]
    UnknownMarkName { context: String, name: String },

    #[error("Top node '{0}' is not defined")]
    MissingTopNode(String),

    #[error("Text-bearing node '{0}' cannot declare a content pattern")]
    TextWithContent(String),
}
