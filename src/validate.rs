use crate::session::SessionDocument;
use serde::Serialize;
use serde_json::Value;

/// Top-level fields every persisted document must carry.
pub const REQUIRED_FIELDS: [&str; 5] = [
    "sessionId",
    "projectRoot",
    "projectMetadata",
    "currentTask",
    "filesModified",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_missing<'a>(missing: impl IntoIterator<Item = &'a str>) -> Self {
        let errors: Vec<ValidationIssue> = missing
            .into_iter()
            .map(|field| ValidationIssue {
                message: format!("Missing required field: {}", field),
            })
            .collect();
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.valid {
            Ok(())
        } else {
            Err(ValidationError {
                errors: self.errors,
            })
        }
    }
}

/// Structural invalidity. Carries every violation found, never just the first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid session state: {}", joined(.errors))]
pub struct ValidationError {
    pub errors: Vec<ValidationIssue>,
}

fn joined(errors: &[ValidationIssue]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shallow structural check of a typed document.
///
/// Typed documents always carry the object-valued fields, so only the two
/// identity strings can be missing (an empty string counts as missing).
pub fn validate(doc: &SessionDocument) -> ValidationReport {
    let mut missing = Vec::new();
    if doc.session_id.is_empty() {
        missing.push(REQUIRED_FIELDS[0]);
    }
    if doc.project_root.is_empty() {
        missing.push(REQUIRED_FIELDS[1]);
    }
    ValidationReport::from_missing(missing)
}

/// Same check against raw JSON, used before deserializing files from disk.
pub fn validate_value(value: &Value) -> ValidationReport {
    let missing = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| value.get(*field).map(is_blank).unwrap_or(true));
    ValidationReport::from_missing(missing)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}
