//! Serialization protocol for checkpoint payloads

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};

/// Protocol for turning checkpoint data into bytes and back
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// Decode a stored checkpoint, rejecting documents from a newer format
    fn loads_checkpoint(&self, data: &[u8]) -> Result<Checkpoint> {
        let checkpoint: Checkpoint = self.loads(data)?;
        if checkpoint.v > Checkpoint::CURRENT_VERSION {
            return Err(CheckpointError::Invalid(format!(
                "checkpoint format v{} is newer than supported v{}",
                checkpoint.v,
                Checkpoint::CURRENT_VERSION
            )));
        }
        Ok(checkpoint)
    }
}

/// JSON serializer, the on-disk format of every built-in store
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
