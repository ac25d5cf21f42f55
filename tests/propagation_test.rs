//! End-to-end propagation through the public API with on-disk persistence.

mod common;

use blockflow_core::{
    config::EngineConfig,
    engine::Engine,
    persist::{BlockPersistence, JsonFilePersistence, MemoryPersistence},
    properties::{Block, BlockId, BlockKind, BlockResult, BlockStatus},
};
use common::*;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use test_log::test;

fn greeting_blocks() -> Vec<Block> {
    vec![
        Block::new("1", "A", BlockKind::Static, "hello"),
        Block::new("2", "B", BlockKind::GenerativeText, "say #A loudly").with_transform("uppercase"),
    ]
}

fn result_text(engine: &Engine, id: &str) -> Option<String> {
    engine
        .block(&BlockId::from(id))
        .and_then(|b| b.result.as_ref())
        .map(|r| r.as_text().into_owned())
}

#[test(tokio::test(start_paused = true))]
async fn test_cold_start_from_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blocks.json");
    JsonFilePersistence::new(path.clone())
        .persist(&greeting_blocks())
        .unwrap();

    let (mut engine, generator) = engine_over(Arc::new(JsonFilePersistence::new(path.clone())));
    let report = engine.load().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(result_text(&engine, "1").as_deref(), Some("hello"));
    assert_eq!(generator.inputs(), vec!["say hello loudly"]);

    // A second process starting from the saved file recomputes everything once more.
    let (mut restarted, regenerated) = engine_over(Arc::new(JsonFilePersistence::new(path)));
    restarted.load().await.unwrap();
    assert_eq!(regenerated.call_count(), 1);
    assert_eq!(result_text(&restarted, "2"), result_text(&engine, "2"));
    assert_eq!(restarted.block(&BlockId::from("2")).unwrap().status, BlockStatus::Done);
}

#[test(tokio::test(start_paused = true))]
async fn test_deleting_a_dependency_leaves_stale_result() {
    let persistence = MemoryPersistence::new(greeting_blocks());
    let (mut engine, generator) = engine_over(Arc::new(persistence.clone()));
    engine.load().await.unwrap();
    let stale = result_text(&engine, "2");

    engine.delete_block(&BlockId::from("1")).unwrap();
    let b = BlockId::from("2");
    assert_eq!(engine.resolve(&b).unwrap().invalid_references, vec!["A"]);
    assert_eq!(result_text(&engine, "2"), stale);
    assert_eq!(generator.call_count(), 1);

    let saved = persistence.snapshot();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, b);
}

#[test(tokio::test(start_paused = true))]
async fn test_configured_throttle_window() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("blockflow.toml");
    std::fs::write(&config_path, "throttle_delay_ms = 1000\n").unwrap();
    let config = EngineConfig::from_file(&config_path).unwrap();
    assert_eq!(config.throttle_delay(), Duration::from_secs(1));

    init_logging();
    let generator = RecordingGenerator::default();
    let mut engine = Engine::new(
        config,
        Arc::new(generator.clone()),
        Arc::new(MemoryPersistence::new(greeting_blocks())),
    );
    engine.load().await.unwrap();
    let b = BlockId::from("2");
    assert!(engine.edit_data(&b, "say #A softly").await.unwrap().is_none());

    tokio::time::advance(Duration::from_millis(999)).await;
    assert!(engine.flush_due().await.is_none());
    tokio::time::advance(Duration::from_millis(1)).await;
    assert!(engine.flush_due().await.is_some());
    assert_eq!(generator.inputs().last().map(String::as_str), Some("say hello softly"));
}

#[test(tokio::test(start_paused = true))]
async fn test_generated_images_flow_into_text_blocks() {
    let (mut engine, generator) = engine_over(Arc::new(MemoryPersistence::new(vec![
        Block::new("1", "Scene", BlockKind::Static, "a lighthouse"),
        Block::new("2", "Painting", BlockKind::GenerativeImage, "paint #Scene")
            .with_transform("oil"),
        Block::new("3", "Caption", BlockKind::GenerativeText, "caption [painting]")
            .with_transform("short"),
    ])));
    let report = engine.load().await.unwrap();
    assert_eq!(report.computed.len(), 3);

    let painting = engine.block(&BlockId::from("2")).unwrap();
    assert!(matches!(painting.result, Some(BlockResult::Binary { .. })));
    let requests = generator.requests();
    let caption_request = &requests[1];
    assert_eq!(caption_request.name, "Caption");
    assert_eq!(caption_request.attachments.len(), 1);
    assert_eq!(caption_request.attachments[0].name, "painting");
}

#[test(tokio::test(start_paused = true))]
async fn test_failed_generation_without_prior_result() {
    let (mut engine, generator) = engine_over(Arc::new(MemoryPersistence::new(greeting_blocks())));
    generator.fail_for("B");
    let report = engine.load().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(result_text(&engine, "2").is_none());
    assert!(matches!(
        engine.block(&BlockId::from("2")).unwrap().status,
        BlockStatus::Error(_)
    ));
    assert!(!report.is_clean());
}
