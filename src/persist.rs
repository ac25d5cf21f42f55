//! The persistence collaborator contract and two stock implementations.
//!
//! Persistence is synchronous from the engine's point of view. `load` must return blocks in a
//! stable order; that order seeds the cold-start propagation.

use parking_lot::Mutex;
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
    sync::Arc,
};

use crate::{error::BlockflowError, properties::Block};

pub trait BlockPersistence: Send + Sync {
    fn load(&self) -> Result<Vec<Block>, BlockflowError>;
    fn persist(&self, blocks: &[Block]) -> Result<(), BlockflowError>;
}

/// Stores the block list as one compact JSON document.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: PathBuf) -> Self {
        JsonFilePersistence { path }
    }
}

impl BlockPersistence for JsonFilePersistence {
    fn load(&self) -> Result<Vec<Block>, BlockflowError> {
        tracing::debug!("Attempting to read blocks from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Block file not found, starting with an empty workflow.");
            return Ok(Vec::new());
        }
        let content = read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn persist(&self, blocks: &[Block]) -> Result<(), BlockflowError> {
        tracing::debug!("Attempting to write {} blocks to: {:?}", blocks.len(), &self.path);
        write(&self.path, serde_json::to_string(blocks)?)?;
        Ok(())
    }
}

/// Keeps the last persisted snapshot in memory. Clones share the snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    snapshot: Arc<Mutex<Vec<Block>>>,
}

impl MemoryPersistence {
    pub fn new(blocks: Vec<Block>) -> Self {
        MemoryPersistence {
            snapshot: Arc::new(Mutex::new(blocks)),
        }
    }

    pub fn snapshot(&self) -> Vec<Block> {
        self.snapshot.lock().clone()
    }
}

impl BlockPersistence for MemoryPersistence {
    fn load(&self) -> Result<Vec<Block>, BlockflowError> {
        Ok(self.snapshot())
    }

    fn persist(&self, blocks: &[Block]) -> Result<(), BlockflowError> {
        *self.snapshot.lock() = blocks.to_vec();
        Ok(())
    }
}
