//! Scurry Core Library
//!
//! This is the core library for the scurry monorepo script runner. It provides
//! the workspace model, the command parser, change detection and the scheduler
//! that executes package scripts in dependency order.
//!
//! ## Architecture
//!
//! The core library is organized into several modules:
//!
//! - [`workspace`] - workspace discovery, dependency graph and filtering
//! - [`manifest`] - `package.json` and pnpm workspace manifest parsing
//! - [`parser`] - raw command strings to runnable command trees
//! - [`command`] - the command tree model and completion signals
//! - [`execution`] - planning, process supervision and scheduling
//! - [`changes`] - git-backed incremental build decisions
//! - [`git`] - git file listings behind a shared snapshot cache
//! - [`output`] - run output as an event stream
//! - [`results`] - read-only views for the listing commands
//! - [`platform`] - platform-specific binary shims
//! - [`types`] - common error types and type aliases
//!
//! ## Usage
//!
//! The primary entry point is the [`Runner`], which executes a command or
//! script across the workspace:
//!
//! ```rust,no_run
//! use scurry_core::execution::{ProcessRegistry, Runner, RunnerOptions};
//! use scurry_core::git::SnapshotCache;
//! use scurry_core::output::OutputRouter;
//! use std::sync::Arc;
//!
//! # async fn example() -> scurry_core::types::ScurryResult<()> {
//! let (router, _events) = OutputRouter::channel();
//! let runner = Runner::new(
//!     RunnerOptions::default(),
//!     router,
//!     Arc::new(ProcessRegistry::new()),
//!     Arc::new(SnapshotCache::new()),
//! );
//! runner.run_recursive("build").await?;
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod command;
pub mod execution;
pub mod git;
pub mod manifest;
pub mod output;
pub mod parser;
pub mod platform;
pub mod results;
pub mod types;
pub mod workspace;

// Re-export the main types for easier usage
pub use execution::{Runner, RunnerOptions};
pub use types::{ScurryError, ScurryResult};
