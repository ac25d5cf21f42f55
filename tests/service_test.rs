//! Integration tests for BlockService (command ordering, deferred recomputation, shutdown)

mod common;

use blockflow_core::{
    persist::MemoryPersistence,
    properties::{Block, BlockKind, BlockResult, InteractionState},
    service::BlockService,
    BlockflowError,
};
use common::*;
use std::{sync::Arc, time::Duration};
use test_log::test;

fn text(result: &Option<BlockResult>) -> Option<String> {
    result.as_ref().map(|r| r.as_text().into_owned())
}

#[test(tokio::test(start_paused = true))]
async fn test_commands_apply_in_order() {
    let (engine, generator) = engine_over(Arc::new(MemoryPersistence::default()));
    let (handle, worker) = BlockService::spawn(engine);
    handle.load().await.unwrap();

    let intro = handle
        .create(BlockKind::Static, "Intro", "Once upon a time", None)
        .await
        .unwrap();
    let story = handle
        .create(BlockKind::GenerativeText, "Story", "[intro], there was", Some("continue"))
        .await
        .unwrap();
    let other = handle
        .create(BlockKind::Static, "Draft", "", None)
        .await
        .unwrap();
    assert_eq!(handle.rename(&other, "intro").await.unwrap(), "intro-2");
    assert_eq!(handle.rename(&other, "Intro").await.unwrap(), "Intro-2");

    let report = handle.request_update(&story, false).await.unwrap().unwrap();
    assert_eq!(report.computed, vec![story.clone()]);
    assert_eq!(generator.inputs(), vec!["Once upon a time, there was"]);

    let edges = handle.edges().await.unwrap();
    assert_eq!(edges, vec![(intro.clone(), story.clone())]);

    let names: Vec<String> = handle
        .blocks()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec!["Intro", "Story", "Intro-2"]);

    handle.shutdown().await.unwrap();
    worker.await.unwrap().unwrap();
}

#[test(tokio::test(start_paused = true))]
async fn test_worker_fires_deferred_requests() {
    let persistence = MemoryPersistence::new(vec![
        Block::new("1", "A", BlockKind::Static, "hello"),
        Block::new("2", "B", BlockKind::GenerativeText, "say #A").with_transform("t"),
    ]);
    let (engine, generator) = engine_over(Arc::new(persistence.clone()));
    let (handle, worker) = BlockService::spawn(engine);
    handle.load().await.unwrap();
    let b = "2".into();

    assert!(handle.edit_data(&b, "say #A twice").await.unwrap().is_none());
    assert!(handle.edit_data(&b, "say #A thrice").await.unwrap().is_none());
    assert_eq!(generator.call_count(), 1);

    // The paused clock auto-advances to the worker's deadline while we sleep.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(generator.inputs(), vec!["say hello", "say hello thrice"]);

    let blocks = handle.blocks().await.unwrap();
    assert_eq!(text(&blocks[1].result).as_deref(), Some("t(say hello thrice)"));
    assert_eq!(
        text(&persistence.snapshot()[1].result).as_deref(),
        Some("t(say hello thrice)")
    );

    handle.shutdown().await.unwrap();
    worker.await.unwrap().unwrap();
}

#[test(tokio::test(start_paused = true))]
async fn test_shutdown_runs_parked_requests() {
    let (engine, generator) = engine_over(Arc::new(MemoryPersistence::new(vec![Block::new(
        "1",
        "Solo",
        BlockKind::GenerativeText,
        "first",
    )])));
    let (handle, worker) = BlockService::spawn(engine);
    handle.load().await.unwrap();
    assert!(handle
        .edit_data(&"1".into(), "second")
        .await
        .unwrap()
        .is_none());

    handle.shutdown().await.unwrap();
    worker.await.unwrap().unwrap();
    assert_eq!(generator.inputs(), vec!["first", "second"]);
}

#[test(tokio::test(start_paused = true))]
async fn test_errors_are_returned_to_the_caller() {
    let (engine, _) = engine_over(Arc::new(MemoryPersistence::new(vec![Block::new(
        "1",
        "Fixed",
        BlockKind::GenerativeText,
        "data",
    )])));
    let (handle, worker) = BlockService::spawn(engine);
    handle.load().await.unwrap();
    let id = "1".into();
    handle
        .set_interaction_state(&id, InteractionState::Entry)
        .await
        .unwrap();

    assert!(matches!(
        handle.edit_transform(&id, "new").await,
        Err(BlockflowError::Locked { .. })
    ));
    assert!(matches!(
        handle.rename(&id, "Other").await,
        Err(BlockflowError::Locked { .. })
    ));
    assert!(matches!(
        handle.delete(&"missing".into()).await,
        Err(BlockflowError::NotFound(_))
    ));

    // The worker keeps serving after failed commands.
    assert_eq!(handle.blocks().await.unwrap().len(), 1);
    drop(handle);
    worker.await.unwrap().unwrap();
}
