//! The update propagation engine.
//!
//! [Engine] owns the [BlockStore] and its derived [DependencyGraph], and talks to two injected
//! collaborators: a [Generator] that produces results for generative blocks and a
//! [BlockPersistence] that stores the block list. Every edit entry point follows the same flow:
//!
//! 1. mutate the store,
//! 2. rebuild the dependency graph and emit [BlockEvent::GraphChanged],
//! 3. persist,
//! 4. request recomputation of the edited block and/or its dependents.
//!
//! Recomputation itself lives in [propagate](Engine::propagate); request coalescing in the
//! `throttle` submodule.
//!
//! ## Concurrency
//!
//! The engine is a single-owner value. Every method that touches state takes `&mut self`, so
//! the store and graph can only change between await points of the caller, never underneath a
//! running batch. Concurrency inside a batch comes from polling several generator futures at
//! once, not from threads. Use [crate::service::BlockService] to drive an engine from several
//! producers.

mod propagate;
mod throttle;


use std::{collections::BTreeMap, sync::Arc};

use tokio::{sync::mpsc::UnboundedSender, time::Instant};

use crate::{
    config::EngineConfig,
    error::BlockflowError,
    event::BlockEvent,
    generate::Generator,
    graph::DependencyGraph,
    persist::BlockPersistence,
    properties::{Block, BlockId, BlockKind, BlockResult, BlockStatus, InteractionState},
    resolver::{resolve_references, Resolution},
    store::BlockStore,
};

pub use propagate::PropagationReport;

pub struct Engine {
    config: EngineConfig,
    store: BlockStore,
    graph: DependencyGraph,
    generator: Arc<dyn Generator>,
    persistence: Arc<dyn BlockPersistence>,
    events: Option<UnboundedSender<BlockEvent>>,
    /// Deferred recomputation deadlines, one per block. A newer request replaces the older one.
    deferred: BTreeMap<BlockId, Instant>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        generator: Arc<dyn Generator>,
        persistence: Arc<dyn BlockPersistence>,
    ) -> Self {
        let store = BlockStore::with_config(&config);
        Engine {
            config,
            store,
            graph: DependencyGraph::new(),
            generator,
            persistence,
            events: None,
            deferred: BTreeMap::new(),
        }
    }

    /// Send [BlockEvent]s to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<BlockEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn block(&self, id: &BlockId) -> Option<&Block> {
        self.store.get(id)
    }

    pub fn block_by_name(&self, name: &str) -> Option<&Block> {
        self.store.find_by_name(name)
    }

    /// Edges between displayable blocks. Break blocks are graph nodes but are not shown.
    pub fn display_edges(&self) -> Vec<(BlockId, BlockId)> {
        let is_break = |id: &BlockId| {
            self.store
                .get(id)
                .is_some_and(|b| b.kind == BlockKind::Break)
        };
        self.graph
            .edges()
            .into_iter()
            .filter(|(source, sink)| !is_break(source) && !is_break(sink))
            .collect()
    }

    /// Resolve a block's references against the current collection. Rebuilds the graph.
    pub fn resolve(&mut self, id: &BlockId) -> Result<Resolution, BlockflowError> {
        let (data, name) = self
            .store
            .get(id)
            .map(|b| (b.data.clone(), b.name.clone()))
            .ok_or_else(|| BlockflowError::NotFound(format!("block {id}")))?;
        Ok(resolve_references(&data, &name, &self.store, &mut self.graph))
    }

    /// Replace the collection with the persisted one and recompute everything from a cold start.
    pub async fn load(&mut self) -> Result<PropagationReport, BlockflowError> {
        let blocks = self.persistence.load()?;
        tracing::info!("[Engine] loading {} blocks", blocks.len());
        self.store.replace_all(blocks)?;
        self.deferred.clear();
        self.graph_changed();
        let all = self.store.ids();
        Ok(self.propagate(&all, true).await)
    }

    /// Create a block at the end of the collection.
    ///
    /// Blocks that already referenced the new name are recomputed, and a static block computes
    /// its own result. Generative blocks wait for their first data or transform edit.
    pub async fn create_block(
        &mut self,
        kind: BlockKind,
        name: &str,
        data: &str,
        transform: Option<&str>,
    ) -> Result<BlockId, BlockflowError> {
        let id = self.store.insert(kind, name, data, transform)?;
        tracing::debug!("[Engine] created {} block {}", kind, id);
        self.graph_changed();
        self.persist();
        let mut seeds = self.graph.adjacent(&id);
        if kind == BlockKind::Static {
            seeds.insert(0, id.clone());
        }
        if !seeds.is_empty() {
            self.propagate(&seeds, false).await;
        }
        Ok(id)
    }

    /// Add an imported image: a constant-result leaf.
    pub async fn import_image(
        &mut self,
        name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<BlockId, BlockflowError> {
        let id = self.store.insert(BlockKind::ImportedImage, name, "", None)?;
        self.store.set_result(
            &id,
            Some(BlockResult::Binary {
                mime: mime.to_string(),
                bytes,
            }),
        )?;
        self.graph_changed();
        self.persist();
        let dependents = self.graph.adjacent(&id);
        if !dependents.is_empty() {
            self.propagate(&dependents, false).await;
        }
        Ok(id)
    }

    /// Swap the image of an imported image block and recompute its dependents.
    pub async fn replace_image(
        &mut self,
        id: &BlockId,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<PropagationReport, BlockflowError> {
        let block = self
            .store
            .get(id)
            .ok_or_else(|| BlockflowError::NotFound(format!("block {id}")))?;
        if block.kind != BlockKind::ImportedImage {
            return Err(BlockflowError::Command(format!(
                "{} block {} holds no image",
                block.kind, id
            )));
        }
        self.store.set_result(
            id,
            Some(BlockResult::Binary {
                mime: mime.to_string(),
                bytes,
            }),
        )?;
        self.persist();
        self.emit(BlockEvent::ResultUpdated(id.clone()));
        self.graph.rebuild(&self.store);
        let dependents = self.graph.adjacent(id);
        Ok(self.propagate(&dependents, false).await)
    }

    /// Edit a block's data. The block is recomputed, subject to throttling; its dependents follow
    /// once its result changes.
    pub async fn edit_data(
        &mut self,
        id: &BlockId,
        data: &str,
    ) -> Result<Option<PropagationReport>, BlockflowError> {
        self.store.set_data(id, data)?;
        self.graph_changed();
        self.persist();
        self.request_update(id, false).await
    }

    pub async fn edit_transform(
        &mut self,
        id: &BlockId,
        transform: &str,
    ) -> Result<Option<PropagationReport>, BlockflowError> {
        self.store.set_transform(id, transform)?;
        self.persist();
        self.request_update(id, false).await
    }

    /// Rename a block. Blocks that referenced the old name or reference the new one are
    /// recomputed. Returns the name actually applied.
    pub async fn rename_block(
        &mut self,
        id: &BlockId,
        name: &str,
    ) -> Result<String, BlockflowError> {
        self.graph.rebuild(&self.store);
        let mut affected = self.graph.adjacent(id);
        let applied = self.store.rename(id, name)?;
        self.graph_changed();
        for dependent in self.graph.adjacent(id) {
            if !affected.contains(&dependent) {
                affected.push(dependent);
            }
        }
        self.persist();
        if !affected.is_empty() {
            self.propagate(&affected, false).await;
        }
        Ok(applied)
    }

    pub fn set_interaction_state(
        &mut self,
        id: &BlockId,
        state: InteractionState,
    ) -> Result<(), BlockflowError> {
        self.store.set_interaction_state(id, state)?;
        self.persist();
        Ok(())
    }

    /// Copy a block, result included, directly after the original. Blocks that already
    /// mentioned the copy's suffixed name recompute against it.
    pub async fn duplicate_block(&mut self, id: &BlockId) -> Result<BlockId, BlockflowError> {
        let copy = self.store.duplicate(id)?;
        self.graph_changed();
        self.persist();
        let dependents = self.graph.adjacent(&copy);
        if !dependents.is_empty() {
            self.propagate(&dependents, false).await;
        }
        Ok(copy)
    }

    pub fn move_block(&mut self, id: &BlockId, index: usize) -> Result<(), BlockflowError> {
        self.store.move_to(id, index)?;
        self.persist();
        Ok(())
    }

    /// Delete a block. Its former dependents are revalidated: they learn the reference is gone,
    /// but keep their last result until their own data changes.
    pub fn delete_block(&mut self, id: &BlockId) -> Result<PropagationReport, BlockflowError> {
        self.graph.rebuild(&self.store);
        let dependents = self.graph.adjacent(id);
        self.store.delete(id)?;
        self.graph.remove_node(id);
        self.deferred.remove(id);
        tracing::debug!(
            "[Engine] deleted {}, revalidating {} dependents",
            id,
            dependents.len()
        );
        self.emit(BlockEvent::BlockRemoved(id.clone()));
        self.graph_changed();
        self.persist();
        Ok(self.revalidate(&dependents))
    }

    fn graph_changed(&mut self) {
        self.graph.rebuild(&self.store);
        self.emit(BlockEvent::GraphChanged);
    }

    fn set_status(&mut self, id: &BlockId, status: BlockStatus) {
        if self.store.set_status(id, status.clone()).is_ok() {
            self.emit(BlockEvent::StatusChanged(id.clone(), status));
        }
    }

    fn emit(&self, event: BlockEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                tracing::trace!("[Engine] event receiver dropped");
            }
        }
    }

    fn persist(&self) {
        let blocks = self.store.to_vec();
        match self.persistence.persist(&blocks) {
            Ok(()) => self.emit(BlockEvent::Persisted(blocks.len())),
            Err(e) => tracing::error!("[Engine] failed to persist {} blocks: {}", blocks.len(), e),
        }
    }
}
