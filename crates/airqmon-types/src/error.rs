//! Error types for airqmon-types.

use thiserror::Error;

/// A rejected value, with the field it belongs to.
///
/// Validation errors are surfaced to the caller as-is; values are never
/// silently coerced into range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// The offending field (e.g. `co2_clear`).
    pub field: String,
    /// Description of the violated rule.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for `field`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("co2_high", "must be greater than 0");
        assert_eq!(err.to_string(), "co2_high: must be greater than 0");
    }
}
