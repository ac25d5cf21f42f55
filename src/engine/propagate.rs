use std::{
    collections::{BTreeSet, VecDeque},
    sync::Arc,
};

use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::Engine;
use crate::{
    error::BlockflowError,
    event::BlockEvent,
    generate::GenerationRequest,
    graph::CycleError,
    properties::{BlockId, BlockKind, BlockResult, BlockStatus},
    resolver::resolve_references,
};

/// What one call to [Engine::propagate] or a revalidation did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropagationReport {
    /// Blocks that received a new result, in completion order.
    pub computed: Vec<BlockId>,
    /// Blocks left untouched: nothing to recompute, or input and transform unchanged.
    pub skipped: Vec<BlockId>,
    /// Blocks whose generation failed; they keep their previous result.
    pub failed: Vec<(BlockId, BlockflowError)>,
    /// Blocks re-resolved without recomputation after a dependency was deleted.
    pub revalidated: Vec<BlockId>,
    /// Set when (part of) the batch could not be ordered and was aborted.
    pub cycle: Option<CycleError>,
}

impl PropagationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.cycle.is_none()
    }

    pub fn merge(&mut self, other: PropagationReport) {
        self.computed.extend(other.computed);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
        self.revalidated.extend(other.revalidated);
        if self.cycle.is_none() {
            self.cycle = other.cycle;
        }
    }
}

/// A finished generator call, ready to be applied to the store.
struct Completed {
    id: BlockId,
    combined_input: String,
    transform: String,
    outcome: Result<BlockResult, BlockflowError>,
}

type InFlight = BoxFuture<'static, Completed>;

enum Prepared {
    Skipped,
    /// Recomputed synchronously (static blocks).
    Applied,
    Dispatched(InFlight),
}

impl Engine {
    /// Recompute `seeds` and, transitively, the dependents of every block whose result changes.
    ///
    /// Seeds without any dependency relation are dispatched together and complete in any order.
    /// The rest are ordered topologically and dispatched one at a time, each generator call
    /// finishing before the next block resolves its input. If the related seeds cannot be
    /// ordered, none of them is recomputed and the cycle is reported.
    ///
    /// Every block runs at most once per batch. A dependent that comes back around to a block
    /// already handled can only do so through a cycle: it is reported and not run again, except
    /// for a mutual pair, where the resolver already treats each reference as invalid.
    ///
    /// Unless `force_all` is set, a block whose resolved input and transform match the ones its
    /// current result was computed from is skipped.
    pub async fn propagate(&mut self, seeds: &[BlockId], force_all: bool) -> PropagationReport {
        self.graph.rebuild(&self.store);
        let mut report = PropagationReport::default();

        let mut unique: Vec<BlockId> = Vec::with_capacity(seeds.len());
        for id in seeds {
            if self.store.contains(id) && !unique.contains(id) {
                unique.push(id.clone());
            }
        }
        let (independent, dependent): (Vec<BlockId>, Vec<BlockId>) =
            unique.into_iter().partition(|id| {
                self.graph.indegree(id) == 0 && self.graph.outdegree(id) == 0
            });
        tracing::info!(
            "[Engine] propagating {} independent and {} dependent blocks (force_all: {})",
            independent.len(),
            dependent.len(),
            force_all
        );

        let mut queue: VecDeque<BlockId> = match self.graph.topological_sort(&dependent) {
            Ok(order) => order.into(),
            Err(cycle) => {
                self.abort_on_cycle(cycle, &mut report);
                VecDeque::new()
            }
        };

        let mut pool: FuturesUnordered<InFlight> = FuturesUnordered::new();
        for id in independent {
            match self.prepare(&id, force_all) {
                Prepared::Skipped => report.skipped.push(id),
                Prepared::Applied => report.computed.push(id),
                Prepared::Dispatched(call) => pool.push(call),
            }
        }

        // Holds at most one call: the dependent chain never runs ahead of itself.
        let mut chain: FuturesUnordered<InFlight> = FuturesUnordered::new();
        let mut handled: BTreeSet<BlockId> = BTreeSet::new();
        loop {
            while chain.is_empty() {
                let Some(id) = queue.pop_front() else { break };
                handled.insert(id.clone());
                match self.prepare(&id, force_all) {
                    Prepared::Skipped => report.skipped.push(id),
                    Prepared::Applied => {
                        self.schedule_dependents(&id, &mut queue, &handled, &mut report);
                        report.computed.push(id);
                    }
                    Prepared::Dispatched(call) => chain.push(call),
                }
            }
            if chain.is_empty() && pool.is_empty() {
                break;
            }
            tokio::select! {
                Some(completed) = pool.next(), if !pool.is_empty() => {
                    self.apply(completed, &mut report);
                }
                Some(completed) = chain.next(), if !chain.is_empty() => {
                    let id = completed.id.clone();
                    if self.apply(completed, &mut report) {
                        self.schedule_dependents(&id, &mut queue, &handled, &mut report);
                    }
                }
            }
        }

        tracing::info!(
            "[Engine] batch done: {} computed, {} skipped, {} failed",
            report.computed.len(),
            report.skipped.len(),
            report.failed.len()
        );
        if !report.computed.is_empty() {
            self.persist();
        }
        report
    }

    /// Re-resolve `ids` without recomputing them. Blocks left with invalid references are marked
    /// [BlockStatus::Error] and keep their last result.
    pub fn revalidate(&mut self, ids: &[BlockId]) -> PropagationReport {
        let mut report = PropagationReport::default();
        for id in ids {
            let Some((data, name)) = self.store.get(id).map(|b| (b.data.clone(), b.name.clone()))
            else {
                continue;
            };
            let resolution = resolve_references(&data, &name, &self.store, &mut self.graph);
            if !resolution.invalid_references.is_empty() {
                self.set_status(
                    id,
                    BlockStatus::Error(format!(
                        "invalid references: {}",
                        resolution.invalid_references.join(", ")
                    )),
                );
            }
            report.revalidated.push(id.clone());
        }
        report
    }

    /// Resolve a block and decide what recomputing it takes.
    fn prepare(&mut self, id: &BlockId, force_all: bool) -> Prepared {
        let Some(block) = self.store.get(id) else {
            return Prepared::Skipped;
        };
        if !block.kind.recomputes() {
            tracing::trace!("[Engine] {} ({}) has nothing to recompute", id, block.kind);
            return Prepared::Skipped;
        }
        let kind = block.kind;
        let name = block.name.clone();
        let data = block.data.clone();
        let transform = block.effective_transform().unwrap_or_default().to_string();
        let previous_input = block.combined_input.clone();
        let previous_transform = block.applied_transform.clone().unwrap_or_default();

        let resolution = resolve_references(&data, &name, &self.store, &mut self.graph);
        let unchanged = previous_input.as_deref() == Some(resolution.resolved_text.as_str())
            && previous_transform == transform;
        if unchanged && !force_all {
            tracing::debug!("[Engine] {} input unchanged, skipping", id);
            return Prepared::Skipped;
        }

        if kind == BlockKind::Static {
            let resolved = resolution.resolved_text;
            if let Ok(block) = self.store.get_mut(id) {
                block.result = Some(BlockResult::Text(resolved.clone()));
                block.combined_input = Some(resolved);
                block.applied_transform = None;
            }
            self.set_status(id, BlockStatus::Done);
            self.emit(BlockEvent::ResultUpdated(id.clone()));
            return Prepared::Applied;
        }

        let request = GenerationRequest {
            id: id.clone(),
            name,
            kind,
            attachments: resolution.attachments(),
            resolved_input: resolution.resolved_text.clone(),
            transform: transform.clone(),
        };
        if let Ok(block) = self.store.get_mut(id) {
            block.last_request_time = Some(Instant::now());
        }
        self.set_status(id, BlockStatus::Waiting);
        tracing::debug!("[Engine] dispatching {} to generator", id);

        let generator = Arc::clone(&self.generator);
        let combined_input = resolution.resolved_text;
        let id = id.clone();
        Prepared::Dispatched(
            async move {
                let outcome = generator.generate(request).await;
                Completed {
                    id,
                    combined_input,
                    transform,
                    outcome,
                }
            }
            .boxed(),
        )
    }

    /// Store a finished generator call. Returns true when the block's result changed.
    fn apply(&mut self, completed: Completed, report: &mut PropagationReport) -> bool {
        let Completed {
            id,
            combined_input,
            transform,
            outcome,
        } = completed;
        match outcome {
            Ok(result) => {
                let Ok(block) = self.store.get_mut(&id) else {
                    tracing::debug!("[Engine] {} vanished while generating", id);
                    return false;
                };
                block.result = Some(result);
                block.combined_input = Some(combined_input);
                block.applied_transform = Some(transform);
                self.set_status(&id, BlockStatus::Done);
                self.emit(BlockEvent::ResultUpdated(id.clone()));
                report.computed.push(id);
                true
            }
            Err(e) => {
                tracing::warn!("[Engine] generation failed for {}: {}", id, e);
                self.set_status(&id, BlockStatus::Error(e.to_string()));
                report.failed.push((id, e));
                false
            }
        }
    }

    /// Fold the dependents of `id` into the pending queue and re-order it.
    ///
    /// Pending blocks that turn out to share a cycle are dropped and the cycle is reported; the
    /// rest of the queue keeps its place.
    fn schedule_dependents(
        &mut self,
        id: &BlockId,
        queue: &mut VecDeque<BlockId>,
        handled: &BTreeSet<BlockId>,
        report: &mut PropagationReport,
    ) {
        let dependents = self.graph.adjacent(id);
        if dependents.is_empty() {
            return;
        }
        let mut pending: Vec<BlockId> = queue.drain(..).collect();
        for dependent in dependents {
            if handled.contains(&dependent) {
                if self.graph.has_edge(&dependent, id) {
                    tracing::trace!(
                        "[Engine] {} and {} reference each other, not revisiting",
                        id,
                        dependent
                    );
                } else {
                    let involved = self.graph.strongly_connected(&dependent);
                    self.abort_on_cycle(CycleError { involved }, report);
                }
            } else if !pending.contains(&dependent) {
                pending.push(dependent);
            }
        }
        loop {
            match self.graph.topological_sort(&pending) {
                Ok(order) => {
                    queue.extend(order);
                    return;
                }
                Err(cycle) => {
                    let before = pending.len();
                    pending.retain(|p| !cycle.involved.contains(p));
                    let stuck = pending.len() == before;
                    self.abort_on_cycle(cycle, report);
                    if stuck {
                        return;
                    }
                }
            }
        }
    }

    fn abort_on_cycle(&mut self, cycle: CycleError, report: &mut PropagationReport) {
        tracing::warn!("[Engine] not recomputing blocks: {}", cycle);
        self.emit(BlockEvent::CycleDetected(cycle.involved.clone()));
        if report.cycle.is_none() {
            report.cycle = Some(cycle);
        }
    }
}
