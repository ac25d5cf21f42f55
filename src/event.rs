//! Change notifications streamed out of the engine.

use std::fmt::{Display, Formatter};

use crate::properties::{BlockId, BlockStatus};

/// Notifications emitted by the [crate::engine::Engine] to rendering and persistence
/// collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockEvent {
    /// The dependency graph was rebuilt after a structural change.
    GraphChanged,
    StatusChanged(BlockId, BlockStatus),
    /// A new result (and combined input) was stored for the block.
    ResultUpdated(BlockId),
    /// A propagation batch was aborted; the ids form the offending cycle.
    CycleDetected(Vec<BlockId>),
    BlockRemoved(BlockId),
    /// The block list was handed to the persistence collaborator.
    Persisted(usize),
}

impl Display for BlockEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            BlockEvent::GraphChanged => write!(f, "GraphChanged"),
            BlockEvent::StatusChanged(id, status) => write!(f, "StatusChanged({id}: {status})"),
            BlockEvent::ResultUpdated(id) => write!(f, "ResultUpdated({id})"),
            BlockEvent::CycleDetected(ids) => write!(
                f,
                "CycleDetected({})",
                ids.iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
            BlockEvent::BlockRemoved(id) => write!(f, "BlockRemoved({id})"),
            BlockEvent::Persisted(count) => write!(f, "Persisted({count})"),
        }
    }
}
