//! Error types for the lane database crate.

use thiserror::Error;

/// Errors raised when a lane registration is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A required identity field is missing or blank.
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::MissingField("lane_name".to_string());
        assert_eq!(err.to_string(), "Missing required field: lane_name");
    }
}
