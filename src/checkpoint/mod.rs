//! Durable backfill progress tracking
//!
//! One [`CheckpointRecord`] per period, persisted through a
//! [`CheckpointStore`] after every status transition.

pub mod lock;
pub mod record;
pub mod store;

pub use lock::RunLock;
pub use record::{CheckpointRecord, PeriodStatus, StageOutcome};
pub use store::{CheckpointStore, FileCheckpointStore};

/// Checkpoint errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Backing storage could not be read or written
    #[error("checkpoint persistence error: {0}")]
    Persistence(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected version
        expected: String,
        /// Found version
        found: String,
    },

    /// Status change not allowed by the period state machine
    #[error("period {period_key}: cannot move from {from} to {to}")]
    InvalidTransition {
        /// Period key
        period_key: String,
        /// Current status
        from: PeriodStatus,
        /// Requested status
        to: PeriodStatus,
    },

    /// Run lock unavailable
    #[error("lock error: {0}")]
    Lock(String),
}
