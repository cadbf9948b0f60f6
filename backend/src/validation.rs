//! Request validation for the LeadFlow API
//!
//! Provides type-safe validation with clear error messages.

use crate::error::AppError;
use std::collections::HashMap;

/// Validation result type
pub type ValidationResult<T> = Result<T, AppError>;

/// String validation helpers
pub mod string {
    use super::*;

    /// Validate required non-empty string
    pub fn required(value: &Option<String>, field: &str) -> ValidationResult<String> {
        match value {
            Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(_) => Err(AppError::ValidationError {
                details: {
                    let mut d = HashMap::new();
                    d.insert(field.to_string(), vec![format!("{} cannot be empty", field)]);
                    d
                },
            }),
            None => Err(AppError::ValidationError {
                details: {
                    let mut d = HashMap::new();
                    d.insert(field.to_string(), vec![format!("{} is required", field)]);
                    d
                },
            }),
        }
    }

    /// Validate optional string with max length
    pub fn max_length(
        value: &Option<String>,
        field: &str,
        max: usize,
    ) -> ValidationResult<Option<String>> {
        match value {
            Some(s) if s.len() > max => Err(AppError::ValidationError {
                details: {
                    let mut d = HashMap::new();
                    d.insert(
                        field.to_string(),
                        vec![format!("{} must be {} characters or less", field, max)],
                    );
                    d
                },
            }),
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Ok(None),
        }
    }
}
