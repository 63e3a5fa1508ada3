//! rbuild - a scripted build orchestration engine
//!
//! Projects describe their build tasks in a Rhai script (`tasks.rhai`). The
//! engine evaluates the script into a task registry, caches it, and runs
//! requested tasks after their dependencies, skipping work whose outputs are
//! already newer than its inputs. Task commands run in a built-in POSIX shell
//! subset, so builds behave the same on every platform.

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod posix;
pub mod runner;
pub mod script;
pub mod session;
pub mod shell;

// Re-export commonly used types
pub use config::{Task, TaskCommand, TaskRegistry};
pub use error::{BuildError, Result};
pub use runner::{RunOptions, RunReport, Runner, TaskOutcome};
pub use script::{Evaluation, Evaluator};
pub use session::Session;

/// Current version of rbuild
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
