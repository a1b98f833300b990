//! Checkpoint store errors
//!
//! A failed `put` leaves the thread at its previous checkpoint, so every
//! variant here means "nothing was committed".

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CheckpointError>;

#[derive(Error, Debug)]
pub enum CheckpointError {
    /// A checkpoint with this step (or a later one) is already committed
    #[error("Checkpoint conflict for thread '{thread_id}': step {step} is not after latest step {latest}")]
    Conflict {
        thread_id: String,
        step: u64,
        latest: u64,
    },

    /// The checkpoint itself is malformed (empty thread id, bad payload)
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite backend rejected the operation
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend unavailable or failed to write
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    pub fn conflict(thread_id: impl Into<String>, step: u64, latest: u64) -> Self {
        Self::Conflict {
            thread_id: thread_id.into(),
            step,
            latest,
        }
    }

    /// Backend failures may clear up; conflicts and malformed checkpoints will not
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CheckpointError::Database(_) | CheckpointError::Storage(_) | CheckpointError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_steps() {
        let err = CheckpointError::conflict("t", 3, 5);
        assert_eq!(
            err.to_string(),
            "Checkpoint conflict for thread 't': step 3 is not after latest step 5"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_storage_errors_are_transient() {
        assert!(CheckpointError::Storage("disk full".into()).is_transient());
        assert!(!CheckpointError::Invalid("empty thread id".into()).is_transient());
    }
}
