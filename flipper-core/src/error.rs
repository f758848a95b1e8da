//! Error types for Flipper operations

use crate::{EntityType, ExternalId, SlotStatus, Track};
use thiserror::Error;

/// Ledger storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with key {key}")]
    NotFound { entity_type: EntityType, key: String },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with key {key}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        key: String,
        reason: String,
    },

    #[error("Unique index {index_name} already holds {value}")]
    UniqueViolation { index_name: String, value: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Serialization failed for {entity_type:?}: {reason}")]
    Serialization { entity_type: EntityType, reason: String },
}

/// Errors raised by the external lineup surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// A mutating call returned but the re-read state does not show the change.
    #[error("Remote {operation} on {external_id} did not persist: {detail}")]
    VerificationFailed {
        operation: String,
        external_id: ExternalId,
        detail: String,
    },

    #[error("Remote entry not found: {external_id}")]
    EntryNotFound { external_id: ExternalId },

    #[error("Transient remote failure during {operation}: {reason}")]
    Transient { operation: String, reason: String },

    #[error("Remote session error: {reason}")]
    Session { reason: String },

    #[error("Remote rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },
}

impl RemoteError {
    /// Whether a bounded retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient { .. })
    }
}

/// Picker, nomination and selection legality failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Slot {slot} on {track} cannot take a picker: {reason}")]
    NotAssignable {
        track: Track,
        slot: String,
        reason: String,
    },

    #[error("No open queued slot on {track}")]
    NoOpenSlot { track: Track },

    #[error("{user} is not the most recent {track} winner")]
    NotLastWinner { track: Track, user: String },

    #[error("A picker is already designated for {track}: {picker}")]
    PickerAlreadyDesignated { track: Track, picker: String },

    #[error("{user} is not the designated {track} picker")]
    NotDesignatedPicker { track: Track, user: String },

    #[error("No scoreboard identity linked for {user}")]
    UnknownIdentity { user: String },

    #[error("No compatible table available for {track}")]
    NoCompatibleTable { track: Track },

    #[error("Invalid transition for slot {slot}: {from} -> {to}")]
    InvalidTransition {
        slot: String,
        from: SlotStatus,
        to: SlotStatus,
    },

    #[error("Slot {slot} changed since it was read")]
    SlotChanged { slot: String },
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

    #[error("Failed to read configuration from {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Master error type for all Flipper errors.
#[derive(Debug, Clone, Error)]
pub enum FlipperError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Flipper operations.
pub type FlipperResult<T> = Result<T, FlipperError>;

// =============================================================================
// TESTS
// =============================================================================
