//! Task execution engine
//!
//! This module runs tasks from a [`TaskRegistry`](crate::config::TaskRegistry),
//! including dependency resolution, skip and staleness checks and command
//! execution.

pub mod command;
pub mod context;
pub mod patterns;
pub mod task;

// Re-export main types
pub use command::{run_shell_command, task_env, task_interpreter, Flow};
pub use context::{RunOptions, RunReport, TaskOutcome, DEFAULT_OUTPUT_SPREAD};
pub use patterns::resolve_patterns;
pub use task::Runner;
