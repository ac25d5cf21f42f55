//! Shared test utilities for engine and service testing

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc, time::Duration};

use crate::{
    config::EngineConfig,
    engine::Engine,
    error::BlockflowError,
    generate::{GenerationRequest, Generator},
    persist::MemoryPersistence,
    properties::{Block, BlockKind, BlockResult},
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Generator stand-in that records every request.
///
/// Text requests answer `"<transform>(<input>)"`; image requests answer a PNG whose bytes are the
/// input text. Requests for names in `failing` return [BlockflowError::Generation].
#[derive(Clone, Default)]
pub struct RecordingGenerator {
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    failing: Arc<Mutex<BTreeSet<String>>>,
    latency: Option<Duration>,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long (on the tokio clock) before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_for(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Names of the requested blocks, in call order.
    pub fn called_names(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.name.clone()).collect()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

pub fn text_output(transform: &str, input: &str) -> String {
    format!("{transform}({input})")
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<BlockResult, BlockflowError> {
        self.requests.lock().push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.lock().contains(&request.name) {
            return Err(BlockflowError::Generation(format!(
                "backend refused '{}'",
                request.name
            )));
        }
        Ok(match request.kind {
            BlockKind::GenerativeImage => BlockResult::Binary {
                mime: "image/png".to_string(),
                bytes: request.resolved_input.into_bytes(),
            },
            _ => BlockResult::Text(text_output(&request.transform, &request.resolved_input)),
        })
    }
}

/// An engine over `blocks` with a recording generator and in-memory persistence. The blocks are
/// not loaded yet.
pub fn engine_with(blocks: Vec<Block>) -> (Engine, RecordingGenerator, MemoryPersistence) {
    init_logging();
    let generator = RecordingGenerator::new();
    let persistence = MemoryPersistence::new(blocks);
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(generator.clone()),
        Arc::new(persistence.clone()),
    );
    (engine, generator, persistence)
}

/// The `A`/`B` workflow: a static greeting and a generative block that shouts it.
pub fn greeting_blocks() -> Vec<Block> {
    vec![
        Block::new("1", "A", BlockKind::Static, "hello"),
        Block::new("2", "B", BlockKind::GenerativeText, "say #A loudly").with_transform("uppercase"),
    ]
}
