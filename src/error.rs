//! Error types for Cabinet.

use thiserror::Error;

/// Common error type for Cabinet.
#[derive(Error, Debug)]
pub enum CabinetError {
    /// Database error.
    ///
    /// Unique-constraint violations are not reported here; they become
    /// [`CabinetError::Conflict`] on conversion.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found, or owned by someone else.
    #[error("{0} not found")]
    NotFound(String),

    /// A sibling with the same name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested tree mutation is not allowed.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Metadata confirmation found the referenced object missing.
    #[error("storage inconsistency: {0}")]
    StorageInconsistency(String),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal consistency fault, e.g. a cycle in the parent chain.
    #[error("internal consistency fault: {0}")]
    Consistency(String),

    /// Object storage gateway failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for CabinetError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                if db_err.message().contains("storage_key") {
                    CabinetError::Conflict("object is already referenced by an item".to_string())
                } else {
                    CabinetError::Conflict("an item with this name already exists here".to_string())
                }
            }
            other => CabinetError::Database(other.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for CabinetError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        CabinetError::Storage(format!("url token: {e}"))
    }
}

/// Result type alias for Cabinet operations.
pub type Result<T> = std::result::Result<T, CabinetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error_display() {
        let err = CabinetError::NotFound("item".to_string());
        assert_eq!(err.to_string(), "item not found");
    }

    #[test]
    fn test_conflict_error_display() {
        let err = CabinetError::Conflict("duplicate name".to_string());
        assert_eq!(err.to_string(), "conflict: duplicate name");
    }

    #[test]
    fn test_invalid_operation_display() {
        let err = CabinetError::InvalidOperation("cannot move item into itself".to_string());
        assert_eq!(
            err.to_string(),
            "invalid operation: cannot move item into itself"
        );
    }

    #[test]
    fn test_storage_inconsistency_display() {
        let err = CabinetError::StorageInconsistency("object missing".to_string());
        assert_eq!(err.to_string(), "storage inconsistency: object missing");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CabinetError = io_err.into();
        assert!(matches!(err, CabinetError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_plain_sqlx_error_is_database() {
        let err: CabinetError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CabinetError::Database(_)));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(CabinetError::Conflict("test".to_string()))
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
