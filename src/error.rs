//! The crate-wide error type and its conversions from foreign errors.

use std::{fmt, io};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::{mpsc::error::SendError as TokioSendError, oneshot::error::RecvError};

use crate::{
    event::BlockEvent,
    graph::CycleError,
    properties::{BlockField, BlockId},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum BlockflowError {
    #[error("Block service channel closed")]
    ChannelClosed,
    #[error("Invalid Command: {0}")]
    Command(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Block {id} does not allow editing its {field:?}")]
    Locked { id: BlockId, field: BlockField },
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl BlockflowError {
    /// Recoverable errors degrade a single block or batch; nothing in the engine is fatal, but
    /// callers driving a service loop stop once the worker channel is gone.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BlockflowError::ChannelClosed)
    }
}

impl From<toml::de::Error> for BlockflowError {
    fn from(src: toml::de::Error) -> BlockflowError {
        BlockflowError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for BlockflowError {
    fn from(src: toml::ser::Error) -> BlockflowError {
        BlockflowError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for BlockflowError {
    fn from(src: JsonError) -> BlockflowError {
        BlockflowError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<hex::FromHexError> for BlockflowError {
    fn from(src: hex::FromHexError) -> BlockflowError {
        BlockflowError::Serialization(format!("Hex decoding failed: {src}"))
    }
}

impl From<io::Error> for BlockflowError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => BlockflowError::NotFound(format!("{x}")),
            _ => BlockflowError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for BlockflowError {
    fn from(x: fmt::Error) -> Self {
        BlockflowError::Custom(format!("{x}"))
    }
}

impl From<RegexError> for BlockflowError {
    fn from(x: RegexError) -> Self {
        BlockflowError::Serialization(format!("Regex parse failed: {x}"))
    }
}

impl From<TokioSendError<BlockEvent>> for BlockflowError {
    fn from(x: TokioSendError<BlockEvent>) -> Self {
        BlockflowError::Io(format!(
            "Channel update send Error, could not transmit block event {:?}",
            x.0
        ))
    }
}

impl From<RecvError> for BlockflowError {
    fn from(_: RecvError) -> Self {
        BlockflowError::ChannelClosed
    }
}
