//! The generation collaborator contract.
//!
//! The engine never talks to a text-completion or image back-end itself. It hands a
//! [GenerationRequest] to a [Generator] and stores whatever comes back. Retry and backoff are the
//! generator's business.

use async_trait::async_trait;

use crate::{
    error::BlockflowError,
    properties::{BlockId, BlockKind, BlockResult},
    resolver::AvailableReference,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub id: BlockId,
    pub name: String,
    /// Selects the back-end: text completion or image generation.
    pub kind: BlockKind,
    pub resolved_input: String,
    pub transform: String,
    /// Binary results referenced by the input, in reference order.
    pub attachments: Vec<AvailableReference>,
}

/// Produces a result for a generative block.
///
/// Implementations may take arbitrarily long and must tolerate repeated calls with identical
/// input; the engine only short-circuits unchanged input, not throttle-window repeats.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<BlockResult, BlockflowError>;
}
