//! Error types for stacks operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{LibraryId, RecordId, ShardId};
use crate::record_type::RecordType;

/// Validation errors for client-supplied input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid {record_type} key '{key}'")]
    InvalidKey { record_type: RecordType, key: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid property '{property}'")]
    UnknownProperty { property: String },

    #[error("Library {library_id} does not exist")]
    UnknownLibrary { library_id: LibraryId },

    #[error("{operation} is not valid for {record_type}")]
    UnsupportedOperation {
        record_type: RecordType,
        operation: String,
    },

    #[error("Invalid {field}: {reason}")]
    InvalidReference { field: String, reason: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Transaction already finished")]
    TransactionFinished,

    #[error("Duplicate {record_type} key {key} in library {library_id}")]
    UniqueViolation {
        record_type: RecordType,
        library_id: LibraryId,
        key: String,
    },

    #[error("Library {library_id} lives on shard {expected}, not {got}")]
    ShardMismatch {
        library_id: LibraryId,
        expected: ShardId,
        got: ShardId,
    },

    #[error("Shared cache error: {reason}")]
    SharedCache { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all stacks errors.
#[derive(Debug, Clone, Error)]
pub enum StacksError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("Schema mismatch for {record_type}: {reason}")]
    SchemaMismatch {
        record_type: RecordType,
        reason: String,
    },

    #[error("{record_type} {key} in library {library_id} is cached as id {existing}, not {attempted}")]
    Conflict {
        record_type: RecordType,
        library_id: LibraryId,
        key: String,
        existing: RecordId,
        attempted: RecordId,
    },

    #[error("Cannot edit {record_type} in library {library_id}")]
    AccessDenied {
        record_type: RecordType,
        library_id: LibraryId,
    },

    #[error("Unsupported library type '{library_type}'")]
    UnsupportedLibraryType { library_type: String },

    #[error("Cannot add more than {limit} {record_type} records at a time ({submitted} submitted)")]
    PayloadTooLarge {
        record_type: RecordType,
        limit: usize,
        submitted: usize,
    },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for stacks operations.
pub type StacksResult<T> = Result<T, StacksError>;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Stable error codes reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    SchemaMismatch,
    Conflict,
    AccessDenied,
    UnsupportedLibraryType,
    PayloadTooLarge,
    InvalidState,
    StorageFailure,
}

impl ErrorCode {
    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 400,
            ErrorCode::AccessDenied => 403,
            ErrorCode::Conflict => 409,
            ErrorCode::PayloadTooLarge => 413,
            ErrorCode::SchemaMismatch
            | ErrorCode::UnsupportedLibraryType
            | ErrorCode::InvalidState
            | ErrorCode::StorageFailure => 500,
        }
    }
}

impl StacksError {
    /// Error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            StacksError::InvalidInput(_) => ErrorCode::InvalidInput,
            StacksError::SchemaMismatch { .. } => ErrorCode::SchemaMismatch,
            StacksError::Conflict { .. } => ErrorCode::Conflict,
            StacksError::AccessDenied { .. } => ErrorCode::AccessDenied,
            StacksError::UnsupportedLibraryType { .. } => ErrorCode::UnsupportedLibraryType,
            StacksError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            StacksError::InvalidState { .. } => ErrorCode::InvalidState,
            StacksError::Storage(_) | StacksError::Config(_) => ErrorCode::StorageFailure,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.code().status_code()
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        StacksError::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn schema_mismatch(record_type: RecordType, reason: impl Into<String>) -> Self {
        StacksError::SchemaMismatch {
            record_type,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_invalid_key() {
        let err = ValidationError::InvalidKey {
            record_type: RecordType::Collection,
            key: "bad".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("collection"));
        assert!(msg.contains("bad"));
    }

    #[test]
    fn test_access_denied_carries_library() {
        let err = StacksError::AccessDenied {
            record_type: RecordType::Item,
            library_id: LibraryId::new(42).expect("positive id"),
        };
        assert!(format!("{}", err).contains("42"));
        assert_eq!(err.code(), ErrorCode::AccessDenied);
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_stacks_error_from_variants() {
        let storage = StacksError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, StacksError::Storage(_)));
        assert_eq!(storage.code(), ErrorCode::StorageFailure);

        let validation = StacksError::from(ValidationError::RequiredFieldMissing {
            field: "name".to_string(),
        });
        assert!(matches!(validation, StacksError::InvalidInput(_)));
        assert_eq!(validation.status_code(), 400);

        let config = StacksError::from(ConfigError::MissingRequired {
            field: "uri_base".to_string(),
        });
        assert!(matches!(config, StacksError::Config(_)));
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::PayloadTooLarge).expect("serialize");
        assert_eq!(json, "\"PAYLOAD_TOO_LARGE\"");
        assert_eq!(ErrorCode::PayloadTooLarge.status_code(), 413);
        assert_eq!(ErrorCode::Conflict.status_code(), 409);
    }
}
