//! Task model, validation, discovery and caching
//!
//! This module holds the data produced by evaluating a task script and the
//! helpers that locate the script and persist its evaluated form.

pub mod cache;
pub mod discover;
pub mod schema;
pub mod types;

// Re-export main types
pub use cache::*;
pub use discover::*;
pub use schema::*;
pub use types::*;
