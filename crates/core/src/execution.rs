//! Command execution module
//!
//! This module turns command trees into running processes: planning the
//! cross-package tree, supervising children, and scheduling groups with
//! dependency gates and a global concurrency bound.

pub mod plan;
pub mod process;
pub mod runner;

pub use plan::build_workspace_plan;
pub use process::{ProcessRegistry, ProcessRunner};
pub use runner::{Runner, RunnerOptions, DEFAULT_CONCURRENCY};
