//! Request validation.
//!
//! Collects every problem in a request instead of stopping at the first one, so a
//! caller sees all of them in a single 400 response.

use std::fmt;

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn empty_field(field: &str) -> Self {
        Self::new(field, format!("{field} must not be empty"))
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, ". {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Default)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// All errors joined into one message, `"; "`-separated.
    pub fn message(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn into_result(self) -> Result<(), String> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.message())
        }
    }
}

pub trait Validator {
    fn validate(&self) -> Result<(), String>;
}

/// Validate that a string is not empty after trimming
pub fn validate_required(value: &str, field: &str, errors: &mut ValidationErrors) {
    if value.trim().is_empty() {
        errors.add(ValidationError::empty_field(field));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_required() {
        let mut errors = ValidationErrors::new();
        validate_required("report", "name", &mut errors);
        validate_required("   ", "name", &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.message(), "[name] name must not be empty");
    }

    #[test]
    fn test_into_result_joins_messages() {
        let mut errors = ValidationErrors::new();
        errors.add(ValidationError::empty_field("name"));
        errors.add(
            ValidationError::new("url", "no template given").with_suggestion("set url, file_name or s3_key"),
        );
        assert_eq!(
            errors.into_result(),
            Err("[name] name must not be empty; [url] no template given. set url, file_name or s3_key".to_string())
        );
        assert_eq!(ValidationErrors::new().into_result(), Ok(()));
    }
}
