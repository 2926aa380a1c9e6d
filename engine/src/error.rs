//! Error types for the sync engine.

use crate::{CollectionName, DeviceId, OwnerId, RecordId, SchemaVersion};
use thiserror::Error;

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Causality errors
    #[error("stale base vector for record {record_id}: op already superseded")]
    StaleBase { record_id: RecordId },

    #[error("manual conflict on record {record_id}, field '{field}'")]
    ManualConflict { record_id: RecordId, field: String },

    #[error("operation on deleted record: {0}")]
    OperationOnDeleted(RecordId),

    // Ownership / session errors
    #[error("owner not found: {0}")]
    OwnerNotFound(OwnerId),

    #[error("unauthorized for owner {0}")]
    Unauthorized(OwnerId),

    #[error("session for device {0} is not in a state that accepts this message")]
    InvalidSessionState(DeviceId),

    // Queue / backpressure errors
    #[error("queue for device {0} is full")]
    Backpressure(DeviceId),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },

    // Protocol errors
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable wire taxonomy code this error maps to (SPEC_FULL §10.2).
    pub fn code(&self) -> &'static str {
        match self {
            Error::CollectionNotFound(_) => "collection_not_found",
            Error::RecordNotFound(_) => "record_not_found",
            Error::InvalidPayload(_) => "invalid_payload",
            Error::MissingRequiredField(_) => "invalid_payload",
            Error::TypeMismatch { .. } => "invalid_payload",
            Error::StaleBase { .. } => "stale_base",
            Error::ManualConflict { .. } => "conflict_manual",
            Error::OperationOnDeleted(_) => "operation_on_deleted",
            Error::OwnerNotFound(_) => "owner_not_found",
            Error::Unauthorized(_) => "unauthorized",
            Error::InvalidSessionState(_) => "protocol",
            Error::Backpressure(_) => "backpressure",
            Error::InvalidSnapshot(_) => "internal",
            Error::SchemaVersionMismatch { .. } => "internal",
            Error::Protocol(_) => "protocol",
            Error::Internal(_) => "internal",
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
