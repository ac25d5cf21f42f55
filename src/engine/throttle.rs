//! Request coalescing for generative blocks.
//!
//! A generative block may be sent to the generator at most once per
//! [throttle delay](crate::config::EngineConfig::throttle_delay). An edit arriving inside the
//! window is parked until the window closes; a later edit in the same window replaces the parked
//! request instead of queuing a second one. Nothing fires by itself: whoever drives the engine
//! sleeps until [Engine::next_deadline] and then calls [Engine::flush_due].

use tokio::time::Instant;

use super::{Engine, PropagationReport};
use crate::{error::BlockflowError, properties::BlockId};

impl Engine {
    /// Recompute `id`, or park the request if the block is inside its throttle window.
    ///
    /// `immediate` bypasses the window. Returns `None` when the request was parked.
    pub async fn request_update(
        &mut self,
        id: &BlockId,
        immediate: bool,
    ) -> Result<Option<PropagationReport>, BlockflowError> {
        let block = self
            .store
            .get(id)
            .ok_or_else(|| BlockflowError::NotFound(format!("block {id}")))?;

        if !immediate && block.kind.is_generative() {
            if let Some(last) = block.last_request_time {
                let ready_at = last + self.config.throttle_delay();
                if Instant::now() < ready_at {
                    let replaced = self.deferred.insert(id.clone(), ready_at).is_some();
                    tracing::debug!(
                        "[Engine] throttling {} until {:?} from now{}",
                        id,
                        ready_at - Instant::now(),
                        if replaced { " (replaces pending request)" } else { "" }
                    );
                    return Ok(None);
                }
            }
        }

        self.deferred.remove(id);
        Ok(Some(self.propagate(std::slice::from_ref(id), false).await))
    }

    /// Earliest instant at which a parked request becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deferred.values().min().copied()
    }

    /// Blocks with a parked request, in id order.
    pub fn pending_updates(&self) -> Vec<BlockId> {
        self.deferred.keys().cloned().collect()
    }

    /// Run every parked request whose window has closed, as one batch.
    pub async fn flush_due(&mut self) -> Option<PropagationReport> {
        let now = Instant::now();
        let due: Vec<BlockId> = self
            .deferred
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        self.run_parked(due).await
    }

    /// Run every parked request now, regardless of its window.
    pub async fn run_deferred(&mut self) -> Option<PropagationReport> {
        let all = self.pending_updates();
        self.run_parked(all).await
    }

    async fn run_parked(&mut self, ids: Vec<BlockId>) -> Option<PropagationReport> {
        if ids.is_empty() {
            return None;
        }
        for id in ids.iter() {
            self.deferred.remove(id);
        }
        tracing::debug!("[Engine] firing {} parked requests", ids.len());
        Some(self.propagate(&ids, false).await)
    }
}
