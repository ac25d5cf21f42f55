//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use async_trait::async_trait;
use blockflow_core::{
    config::EngineConfig,
    engine::Engine,
    generate::{GenerationRequest, Generator},
    persist::BlockPersistence,
    properties::{BlockKind, BlockResult},
    BlockflowError,
};
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Generator that records requests and answers `"<transform>(<input>)"`.
#[derive(Clone, Default)]
pub struct RecordingGenerator {
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    failing: Arc<Mutex<BTreeSet<String>>>,
}

#[allow(dead_code)]
impl RecordingGenerator {
    pub fn fail_for(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.resolved_input.clone())
            .collect()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<BlockResult, BlockflowError> {
        self.requests.lock().push(request.clone());
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
            _ => BlockResult::Text(format!(
                "{}({})",
                request.transform, request.resolved_input
            )),
        })
    }
}

/// An engine with default configuration over `persistence`.
#[allow(dead_code)]
pub fn engine_over(
    persistence: Arc<dyn BlockPersistence>,
) -> (Engine, RecordingGenerator) {
    init_logging();
    let generator = RecordingGenerator::default();
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(generator.clone()),
        persistence,
    );
    (engine, generator)
}
