//! Single-worker service around an [Engine].
//!
//! [BlockService::spawn] moves the engine into a tokio task that consumes [Op]s from an unbounded
//! channel, one at a time and in arrival order, answering each over a oneshot channel. Between
//! commands the worker sleeps until the next throttle deadline and fires the requests that came
//! due. Because the worker owns the engine and awaits every batch before taking the next command,
//! an edit never lands while a batch is in flight.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use blockflow_core::{config::EngineConfig, engine::Engine, generate::Generator,
//! #     persist::MemoryPersistence, properties::BlockKind, service::BlockService};
//! # async fn demo(generator: Arc<dyn Generator>) -> Result<(), blockflow_core::BlockflowError> {
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     generator,
//!     Arc::new(MemoryPersistence::default()),
//! );
//! let (handle, worker) = BlockService::spawn(engine);
//! handle.load().await?;
//! let id = handle.create(BlockKind::Static, "Greeting", "hello", None).await?;
//! handle.edit_data(&id, "hello again").await?;
//! handle.shutdown().await?;
//! worker.await.ok();
//! # Ok(())
//! # }
//! ```

use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
    time::sleep_until,
};

use crate::{
    commands::{Op, OpResult},
    engine::{Engine, PropagationReport},
    error::BlockflowError,
    properties::{Block, BlockId, BlockKind, InteractionState},
    resolver::Resolution,
};

type Reply = oneshot::Sender<Result<OpResult, BlockflowError>>;

enum Command {
    Run(Op, Reply),
    Shutdown(oneshot::Sender<()>),
}

pub struct BlockService {
    engine: Engine,
    rx: UnboundedReceiver<Command>,
}

impl BlockService {
    /// Start the worker. The task ends after [BlockServiceHandle::shutdown] or once every handle
    /// is dropped.
    pub fn spawn(engine: Engine) -> (BlockServiceHandle, JoinHandle<Result<(), BlockflowError>>) {
        let (tx, rx) = unbounded_channel();
        let service = BlockService { engine, rx };
        let worker = tokio::spawn(service.run());
        (BlockServiceHandle { tx }, worker)
    }

    async fn run(mut self) -> Result<(), BlockflowError> {
        tracing::info!("[BlockService] Starting worker");
        loop {
            let deadline = self.engine.next_deadline();
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Run(op, reply)) => {
                        tracing::debug!("[BlockService] Running {}", op);
                        let result = self.engine.execute(op).await;
                        if let Err(e) = &result {
                            tracing::debug!("[BlockService] Command failed: {}", e);
                        }
                        if reply.send(result).is_err() {
                            tracing::trace!("[BlockService] Caller went away before the reply");
                        }
                    }
                    Some(Command::Shutdown(done)) => {
                        self.stop().await;
                        done.send(()).ok();
                        return Ok(());
                    }
                    None => {
                        self.stop().await;
                        return Ok(());
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)), if deadline.is_some() => {
                    if let Some(report) = self.engine.flush_due().await {
                        tracing::debug!(
                            "[BlockService] Deferred batch: {} computed, {} failed",
                            report.computed.len(),
                            report.failed.len()
                        );
                    }
                }
            }
        }
    }

    /// Parked requests are run rather than dropped.
    async fn stop(&mut self) {
        if let Some(report) = self.engine.run_deferred().await {
            tracing::debug!(
                "[BlockService] Flushed {} parked requests on shutdown",
                report.computed.len() + report.skipped.len() + report.failed.len()
            );
        }
        tracing::info!("[BlockService] Worker stopped");
    }
}

/// Cloneable front end of a running [BlockService].
#[derive(Clone)]
pub struct BlockServiceHandle {
    tx: UnboundedSender<Command>,
}

impl BlockServiceHandle {
    /// Send `op` to the worker and wait for its answer.
    pub async fn execute(&self, op: Op) -> Result<OpResult, BlockflowError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Run(op, reply_tx))
            .map_err(|_| BlockflowError::ChannelClosed)?;
        reply_rx.await?
    }

    pub async fn load(&self) -> Result<PropagationReport, BlockflowError> {
        match self.execute(Op::Load).await? {
            OpResult::Report(report) => Ok(report),
            other => Err(unexpected("Load", other)),
        }
    }

    pub async fn create(
        &self,
        kind: BlockKind,
        name: &str,
        data: &str,
        transform: Option<&str>,
    ) -> Result<BlockId, BlockflowError> {
        let op = Op::Create {
            kind,
            name: name.to_string(),
            data: data.to_string(),
            transform: transform.map(str::to_string),
        };
        self.created(op).await
    }

    pub async fn import_image(
        &self,
        name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<BlockId, BlockflowError> {
        let op = Op::ImportImage {
            name: name.to_string(),
            mime: mime.to_string(),
            bytes,
        };
        self.created(op).await
    }

    /// `None` when the recomputation was parked by the throttle.
    pub async fn edit_data(
        &self,
        id: &BlockId,
        data: &str,
    ) -> Result<Option<PropagationReport>, BlockflowError> {
        self.maybe_report(Op::EditData(id.clone(), data.to_string()))
            .await
    }

    pub async fn edit_transform(
        &self,
        id: &BlockId,
        transform: &str,
    ) -> Result<Option<PropagationReport>, BlockflowError> {
        self.maybe_report(Op::EditTransform(id.clone(), transform.to_string()))
            .await
    }

    pub async fn rename(&self, id: &BlockId, name: &str) -> Result<String, BlockflowError> {
        match self
            .execute(Op::Rename(id.clone(), name.to_string()))
            .await?
        {
            OpResult::Renamed(applied) => Ok(applied),
            other => Err(unexpected("Rename", other)),
        }
    }

    pub async fn set_interaction_state(
        &self,
        id: &BlockId,
        state: InteractionState,
    ) -> Result<(), BlockflowError> {
        self.execute(Op::SetInteractionState(id.clone(), state))
            .await
            .map(|_| ())
    }

    pub async fn delete(&self, id: &BlockId) -> Result<PropagationReport, BlockflowError> {
        match self.execute(Op::Delete(id.clone())).await? {
            OpResult::Report(report) => Ok(report),
            other => Err(unexpected("Delete", other)),
        }
    }

    pub async fn duplicate(&self, id: &BlockId) -> Result<BlockId, BlockflowError> {
        self.created(Op::Duplicate(id.clone())).await
    }

    pub async fn move_block(&self, id: &BlockId, index: usize) -> Result<(), BlockflowError> {
        self.execute(Op::Move(id.clone(), index)).await.map(|_| ())
    }

    pub async fn request_update(
        &self,
        id: &BlockId,
        immediate: bool,
    ) -> Result<Option<PropagationReport>, BlockflowError> {
        self.maybe_report(Op::RequestUpdate(id.clone(), immediate))
            .await
    }

    pub async fn resolve(&self, id: &BlockId) -> Result<Resolution, BlockflowError> {
        match self.execute(Op::Resolve(id.clone())).await? {
            OpResult::Resolution(resolution) => Ok(resolution),
            other => Err(unexpected("Resolve", other)),
        }
    }

    pub async fn blocks(&self) -> Result<Vec<Block>, BlockflowError> {
        match self.execute(Op::GetBlocks).await? {
            OpResult::Blocks(blocks) => Ok(blocks),
            other => Err(unexpected("GetBlocks", other)),
        }
    }

    pub async fn edges(&self) -> Result<Vec<(BlockId, BlockId)>, BlockflowError> {
        match self.execute(Op::GetEdges).await? {
            OpResult::Edges(edges) => Ok(edges),
            other => Err(unexpected("GetEdges", other)),
        }
    }

    /// Stop the worker after running any parked requests. Resolves once the worker is done.
    pub async fn shutdown(&self) -> Result<(), BlockflowError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(done_tx))
            .map_err(|_| BlockflowError::ChannelClosed)?;
        Ok(done_rx.await?)
    }

    async fn created(&self, op: Op) -> Result<BlockId, BlockflowError> {
        let label = op.to_string();
        match self.execute(op).await? {
            OpResult::Created(id) => Ok(id),
            other => Err(unexpected(&label, other)),
        }
    }

    async fn maybe_report(&self, op: Op) -> Result<Option<PropagationReport>, BlockflowError> {
        let label = op.to_string();
        match self.execute(op).await? {
            OpResult::Report(report) => Ok(Some(report)),
            OpResult::Deferred => Ok(None),
            other => Err(unexpected(&label, other)),
        }
    }
}

fn unexpected(op: &str, result: OpResult) -> BlockflowError {
    BlockflowError::Command(format!("{op} answered with {result}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::*;
    use test_log::test;

    #[test(tokio::test(start_paused = true))]
    async fn test_handle_fails_after_shutdown() {
        let (engine, _, _) = engine_with(greeting_blocks());
        let (handle, worker) = BlockService::spawn(engine);
        handle.load().await.unwrap();
        handle.shutdown().await.unwrap();
        worker.await.unwrap().unwrap();

        assert_eq!(
            handle.blocks().await.unwrap_err(),
            BlockflowError::ChannelClosed
        );
    }
}
