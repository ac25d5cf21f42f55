//! # blockflow-core
//!
//! A reactive engine for workflows built from named, interdependent blocks.
//!
//! ## Overview
//!
//! A workflow is an ordered list of [`properties::Block`]s. A block's data is free text that may
//! mention other blocks by name, either as `#Name` (no spaces) or `[Any Name]`. The engine keeps a
//! dependency graph of those mentions and, whenever a block changes, recomputes everything that
//! uses it: in dependency order, skipping blocks whose input did not actually change, and never
//! letting a block read a stale result of something it depends on.
//!
//! Blocks come in a few kinds:
//!
//! - **Static**: the result is the data with every reference substituted.
//! - **Generative text / image**: the substituted data and a transform instruction go to an
//!   external [`generate::Generator`]; whatever comes back is the result.
//! - **Break**: a visual divider, never computed.
//! - **Imported image**: a constant binary result supplied by the user.
//!
//! ## Architecture
//!
//! - **[`reference`]**: extracts `#name` / `[name]` references from text.
//! - **[`graph`]**: the "is used by" [`graph::DependencyGraph`], rebuilt wholesale from the
//!   store, and topological ordering with [`graph::CycleError`].
//! - **[`resolver`]**: classifies references (available, not ready, invalid) and substitutes
//!   results. Bad references are [`resolver::ReferenceDiagnostic`]s, not errors.
//! - **[`store`]**: the ordered [`store::BlockStore`] and its invariants (unique ids, unique
//!   names, interaction-state guards).
//! - **[`engine`]**: batch propagation, throttling and the edit entry points.
//! - **[`service`]**: a single-worker task that serializes [`commands::Op`]s into an engine.
//! - **[`persist`]** and **[`generate`]**: the two collaborator contracts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use blockflow_core::{
//!     config::EngineConfig,
//!     engine::Engine,
//!     generate::{GenerationRequest, Generator},
//!     persist::JsonFilePersistence,
//!     properties::{BlockKind, BlockResult},
//!     BlockflowError,
//! };
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl Generator for Shout {
//!     async fn generate(&self, request: GenerationRequest) -> Result<BlockResult, BlockflowError> {
//!         Ok(BlockResult::Text(request.resolved_input.to_uppercase()))
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), BlockflowError> {
//!     let mut engine = Engine::new(
//!         EngineConfig::from_file("blockflow.toml")?,
//!         Arc::new(Shout),
//!         Arc::new(JsonFilePersistence::new("blocks.json".into())),
//!     );
//!     engine.load().await?;
//!
//!     let greeting = engine.create_block(BlockKind::Static, "Greeting", "hello", None).await?;
//!     let shout = engine
//!         .create_block(BlockKind::GenerativeText, "Shout", "say #Greeting", Some("uppercase"))
//!         .await?;
//!     engine.request_update(&shout, true).await?;
//!
//!     // Editing the greeting recomputes the shout.
//!     engine.edit_data(&greeting, "good morning").await?;
//!     println!("{:?}", engine.block(&shout).and_then(|b| b.result.clone()));
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! Everything logs through `tracing` with a bracketed component prefix (`[Engine]`,
//! `[DependencyGraph]`, `[BlockService]`, ...). Install any subscriber to see it.

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod generate;
pub mod graph;
pub mod persist;
pub mod properties;
pub mod reference;
pub mod resolver;
pub mod service;
pub mod store;

pub use error::*;
