//! Input validation and normalisation for resource documents.
//!
//! A [`Validator`] collects every problem with an input document before
//! failing, so clients see all messages at once. Values are normalised in
//! place: strings are trimmed and numeric strings become numbers.

use serde_json::Value;

use crate::aggregate::number;
use crate::error::AppError;
use crate::store::document::{self, Document};

/// Whether a document is being created or patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Required fields must be present.
    Create,
    /// Only fields present in the patch are checked.
    Update,
}

/// Accumulates validation errors for one document.
#[derive(Debug)]
pub struct Validator {
    mode: Mode,
    errors: Vec<String>,
}

impl Validator {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            errors: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Record an error.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Record an error when `condition` is false.
    pub fn check(&mut self, condition: bool, message: impl Into<String>) {
        if !condition {
            self.fail(message);
        }
    }

    /// Require a non-empty value on create; forbid clearing it on update.
    ///
    /// Returns whether the field holds a usable value.
    pub fn require(&mut self, doc: &Document, field: &str, message: &str) -> bool {
        match doc.get(field) {
            Some(value) if !is_blank(value) => true,
            Some(_) => {
                self.fail(message);
                false
            }
            None => {
                if self.mode == Mode::Create {
                    self.fail(message);
                }
                false
            }
        }
    }

    /// Trim a string field. Non-string values are an error.
    pub fn string(&mut self, doc: &mut Document, field: &str) -> Option<String> {
        match doc.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => {
                let trimmed = s.trim().to_string();
                doc.insert(field.to_string(), Value::String(trimmed.clone()));
                Some(trimmed)
            }
            Some(other) => {
                self.fail(format!("Invalid {field}: {other}"));
                None
            }
        }
    }

    /// Cast a field to a number. Numeric strings are accepted.
    pub fn number(&mut self, doc: &mut Document, field: &str) -> Option<f64> {
        let cast = match doc.get(field) {
            None | Some(Value::Null) => return None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
            Some(_) => None,
        };
        match cast {
            Some(x) => {
                doc.insert(field.to_string(), number(x));
                Some(x)
            }
            None => {
                let shown = doc.get(field).map(Value::to_string).unwrap_or_default();
                self.fail(format!("Invalid {field}: {shown}"));
                None
            }
        }
    }

    /// Cast a field to a boolean. `"true"`/`"false"` strings are accepted.
    pub fn boolean(&mut self, doc: &mut Document, field: &str) -> Option<bool> {
        let cast = match doc.get(field) {
            None | Some(Value::Null) => return None,
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::String(s)) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Some(_) => None,
        };
        match cast {
            Some(b) => {
                doc.insert(field.to_string(), Value::Bool(b));
                Some(b)
            }
            None => {
                self.fail(format!("Invalid {field}: expected true or false"));
                None
            }
        }
    }

    /// Check a string field against an allowed set.
    pub fn one_of(&mut self, doc: &mut Document, field: &str, allowed: &[&str], message: &str) {
        if let Some(value) = self.string(doc, field)
            && !allowed.contains(&value.as_str())
        {
            self.fail(message);
        }
    }

    /// Check a string field holds a valid document id, normalising it.
    pub fn reference(&mut self, doc: &mut Document, field: &str) -> Option<String> {
        let raw = self.string(doc, field)?;
        match document::normalize_id(&raw) {
            Some(id) => {
                doc.insert(field.to_string(), Value::String(id.clone()));
                Some(id)
            }
            None => {
                self.fail(format!("Invalid {field}: {raw}"));
                None
            }
        }
    }

    /// Fail with every collected message, or succeed.
    pub fn finish(self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(AppError::BadRequest(format!(
            "Invalid input data. {}",
            self.errors.join(". ")
        )))
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Drop every field not in the allow-list.
pub fn retain_fields(doc: &mut Document, allowed: &[&str]) {
    doc.retain(|key, _| allowed.contains(&key.as_str()));
}

/// Insert a value unless the field already holds a non-null one.
pub fn default_field(doc: &mut Document, field: &str, value: Value) {
    if doc.get(field).is_none_or(Value::is_null) {
        doc.insert(field.to_string(), value);
    }
}
