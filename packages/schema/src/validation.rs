use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifiers for validation failures, so callers can branch without
/// matching on message text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NodeKindUnknown,
    MarkKindUnknown,
    AttributeRequired,
    AttributeTypeMismatch,
    AttributeInvalid,
    ContentPatternMismatch,
    ContentNotAllowed,
    ChildNotFound,
    TextNotAllowed,
    TextRequired,
    MarkNotAllowed,
    MarkRangeInvalid,
    MarkExclusionConflict,
    DocumentRootMismatch,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NodeKindUnknown => "NODE_KIND_UNKNOWN",
            ErrorCode::MarkKindUnknown => "MARK_KIND_UNKNOWN",
            ErrorCode::AttributeRequired => "ATTRIBUTE_REQUIRED",
            ErrorCode::AttributeTypeMismatch => "ATTRIBUTE_TYPE_MISMATCH",
            ErrorCode::AttributeInvalid => "ATTRIBUTE_INVALID",
            ErrorCode::ContentPatternMismatch => "CONTENT_PATTERN_MISMATCH",
            ErrorCode::ContentNotAllowed => "CONTENT_NOT_ALLOWED",
            ErrorCode::ChildNotFound => "CHILD_NOT_FOUND",
            ErrorCode::TextNotAllowed => "TEXT_NOT_ALLOWED",
            ErrorCode::TextRequired => "TEXT_REQUIRED",
            ErrorCode::MarkNotAllowed => "MARK_NOT_ALLOWED",
            ErrorCode::MarkRangeInvalid => "MARK_RANGE_INVALID",
            ErrorCode::MarkExclusionConflict => "MARK_EXCLUSION_CONFLICT",
            ErrorCode::DocumentRootMismatch => "DOCUMENT_ROOT_MISMATCH",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure: a code plus a human-readable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub code: ErrorCode,
    pub message: String,
}

/// Outcome of a validation call. `errors[i]` describes `error_codes[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub error_codes: Vec<ErrorCode>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            error_codes: Vec::new(),
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        let mut result = Self::ok();
        result.push(code, message);
        result
    }

    pub fn push(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
        self.error_codes.push(code);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.error_codes.extend(other.error_codes);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.error_codes.contains(&code)
    }

    pub fn issues(&self) -> impl Iterator<Item = ValidationIssue> + '_ {
        self.error_codes
            .iter()
            .zip(&self.errors)
            .map(|(code, message)| ValidationIssue {
                code: *code,
                message: message.clone(),
            })
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            return f.write_str("valid");
        }
        for (i, issue) in self.issues().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "[{}] {}", issue.code, issue.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_codes() {
        let mut result = ValidationResult::ok();
        assert!(result.is_valid());

        result.merge(ValidationResult::ok());
        assert!(result.is_valid());

        result.merge(ValidationResult::failure(
            ErrorCode::AttributeRequired,
            "heading requires attribute 'level'",
        ));
        assert!(!result.is_valid());
        assert!(result.has_code(ErrorCode::AttributeRequired));
        assert_eq!(
            result.to_string(),
            "[ATTRIBUTE_REQUIRED] heading requires attribute 'level'"
        );
    }

    #[test]
    fn test_codes_serialize_as_stable_identifiers() {
        let json = serde_json::to_string(&ErrorCode::ContentPatternMismatch).unwrap();
        assert_eq!(json, "\"CONTENT_PATTERN_MISMATCH\"");
        assert_eq!(ErrorCode::NodeKindUnknown.as_str(), "NODE_KIND_UNKNOWN");
    }
}
