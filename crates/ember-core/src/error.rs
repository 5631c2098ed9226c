//! Engine error type
//!
//! Every operation returns `Result<T, EngineError>`. Errors are values; no
//! control flow in the engine relies on unwinding.

use std::path::PathBuf;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Record id absent or tombstoned
    #[error("Not found: {0}")]
    NotFound(String),

    /// Field constraint violation, rejected before any write
    #[error("Invalid: {0}")]
    Invalid(String),

    /// Underlying filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Promotion filename collision that survived suffix retries
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Cancellation signal observed before the operation committed
    #[error("Cancelled")]
    Cancelled,

    /// Malformed line encountered on read; carries the byte offset
    #[error("Corrupt line in {path} at byte {offset}")]
    Corrupt { path: PathBuf, offset: u64 },

    /// Opaque embedder or vault scan failure; callers degrade gracefully
    #[error("External failure: {0}")]
    External(String),

    /// Another live process owns the storage root
    #[error("Storage locked by pid {pid} ({path})")]
    Locked { pid: u32, path: PathBuf },
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True when retrying the same call cannot succeed without intervention
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineError::Cancelled | EngineError::External(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Invalid(format!("JSON: {e}"))
    }
}
