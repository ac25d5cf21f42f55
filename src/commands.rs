//! Serializable edit operations and their replies, applied through [Engine::execute].

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    engine::{Engine, PropagationReport},
    error::BlockflowError,
    properties::{Block, BlockId, BlockKind, InteractionState},
    resolver::Resolution,
};

/// Command vocabulary of the [crate::service::BlockService] worker. Every variant maps onto one
/// [Engine] entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Replace the collection with the persisted one and recompute everything.
    Load,
    Create {
        kind: BlockKind,
        name: String,
        data: String,
        transform: Option<String>,
    },
    ImportImage {
        name: String,
        mime: String,
        bytes: Vec<u8>,
    },
    EditData(BlockId, String),
    EditTransform(BlockId, String),
    Rename(BlockId, String),
    SetInteractionState(BlockId, InteractionState),
    Delete(BlockId),
    Duplicate(BlockId),
    Move(BlockId, usize),
    /// Ask for a recomputation; `immediate` bypasses the throttle window.
    RequestUpdate(BlockId, bool),
    /// Run every parked recomputation now.
    FlushDeferred,
    Resolve(BlockId),
    /// Snapshot of the whole collection in display order.
    GetBlocks,
    /// Dependency edges between displayable blocks.
    GetEdges,
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Op::Load => write!(f, "Load"),
            Op::Create { kind, name, .. } => write!(f, "Create({kind}: {name})"),
            Op::ImportImage { name, mime, bytes } => {
                write!(f, "ImportImage({name}: {mime}, {} bytes)", bytes.len())
            }
            Op::EditData(id, _) => write!(f, "EditData({id})"),
            Op::EditTransform(id, _) => write!(f, "EditTransform({id})"),
            Op::Rename(id, name) => write!(f, "Rename({id} -> {name})"),
            Op::SetInteractionState(id, state) => {
                write!(f, "SetInteractionState({id}: {state:?})")
            }
            Op::Delete(id) => write!(f, "Delete({id})"),
            Op::Duplicate(id) => write!(f, "Duplicate({id})"),
            Op::Move(id, index) => write!(f, "Move({id} -> {index})"),
            Op::RequestUpdate(id, immediate) => {
                write!(f, "RequestUpdate({id}, immediate: {immediate})")
            }
            Op::FlushDeferred => write!(f, "FlushDeferred"),
            Op::Resolve(id) => write!(f, "Resolve({id})"),
            Op::GetBlocks => write!(f, "GetBlocks"),
            Op::GetEdges => write!(f, "GetEdges"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpResult {
    Ok,
    Created(BlockId),
    Renamed(String),
    Report(PropagationReport),
    /// The request landed inside a throttle window and was parked.
    Deferred,
    Resolution(Resolution),
    Blocks(Vec<Block>),
    Edges(Vec<(BlockId, BlockId)>),
}

impl From<Option<PropagationReport>> for OpResult {
    fn from(report: Option<PropagationReport>) -> Self {
        match report {
            Some(report) => OpResult::Report(report),
            None => OpResult::Deferred,
        }
    }
}

impl Display for OpResult {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OpResult::Ok => write!(f, "Ok"),
            OpResult::Created(id) => write!(f, "Created({id})"),
            OpResult::Renamed(name) => write!(f, "Renamed({name})"),
            OpResult::Report(r) => write!(
                f,
                "Report(computed: {}, skipped: {}, failed: {}, revalidated: {}{})",
                r.computed.len(),
                r.skipped.len(),
                r.failed.len(),
                r.revalidated.len(),
                if r.cycle.is_some() { ", cycle" } else { "" }
            ),
            OpResult::Deferred => write!(f, "Deferred"),
            OpResult::Resolution(r) => write!(
                f,
                "Resolution(available: {}, not ready: {}, invalid: {})",
                r.available_references.len(),
                r.not_ready_references.len(),
                r.invalid_references.len()
            ),
            OpResult::Blocks(blocks) => write!(f, "Blocks({})", blocks.len()),
            OpResult::Edges(edges) => write!(f, "Edges({})", edges.len()),
        }
    }
}

impl Engine {
    /// Run one command against the engine.
    pub async fn execute(&mut self, op: Op) -> Result<OpResult, BlockflowError> {
        Ok(match op {
            Op::Load => OpResult::Report(self.load().await?),
            Op::Create {
                kind,
                name,
                data,
                transform,
            } => OpResult::Created(
                self.create_block(kind, &name, &data, transform.as_deref())
                    .await?,
            ),
            Op::ImportImage { name, mime, bytes } => {
                OpResult::Created(self.import_image(&name, &mime, bytes).await?)
            }
            Op::EditData(id, data) => self.edit_data(&id, &data).await?.into(),
            Op::EditTransform(id, transform) => self.edit_transform(&id, &transform).await?.into(),
            Op::Rename(id, name) => OpResult::Renamed(self.rename_block(&id, &name).await?),
            Op::SetInteractionState(id, state) => {
                self.set_interaction_state(&id, state)?;
                OpResult::Ok
            }
            Op::Delete(id) => OpResult::Report(self.delete_block(&id)?),
            Op::Duplicate(id) => OpResult::Created(self.duplicate_block(&id).await?),
            Op::Move(id, index) => {
                self.move_block(&id, index)?;
                OpResult::Ok
            }
            Op::RequestUpdate(id, immediate) => self.request_update(&id, immediate).await?.into(),
            Op::FlushDeferred => match self.run_deferred().await {
                Some(report) => OpResult::Report(report),
                None => OpResult::Ok,
            },
            Op::Resolve(id) => OpResult::Resolution(self.resolve(&id)?),
            Op::GetBlocks => OpResult::Blocks(self.store().to_vec()),
            Op::GetEdges => OpResult::Edges(self.display_edges()),
        })
    }
}
