//! Error types for rbuild

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rbuild operations
pub type Result<T> = std::result::Result<T, BuildError>;

/// Main error type for rbuild
#[derive(Error, Debug)]
pub enum BuildError {
    /// Task script evaluation errors
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Shell parsing and execution errors
    #[error("Shell error: {0}")]
    Shell(#[from] ShellError),

    /// Task execution errors
    #[error("Execution error: {0}")]
    Run(#[from] RunError),

    /// Task cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Project and invocation errors
    #[error("{0}")]
    Session(#[from] SessionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Task script evaluation errors
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{file}:{line}:{column}: {message}")]
    Syntax {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{file}:{line}:{column}: {message}")]
    Eval {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{file}: entry function configure(options) is not defined")]
    MissingEntry { file: String },
}

/// Shell parsing and execution errors
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("{name}:{line}:{column}: {message}")]
    Parse {
        name: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("exit status {0}")]
    ExitStatus(i32),

    #[error("failed to open {path}: {source}")]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error("Task {0} was called recursively")]
    Recursive(String),

    #[error("Task {task} failed due to its dependency {dependency}: {source}")]
    Dependency {
        task: String,
        dependency: String,
        #[source]
        source: Box<RunError>,
    },

    #[error("Task {task}: {source}")]
    Pattern {
        task: String,
        #[source]
        source: PatternError,
    },

    #[error("Task {task}: failed to check input {path}: {source}")]
    MissingInput {
        task: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Task {task}: failed to check {path}: {source}")]
    Stat {
        task: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Task {task}: {source}")]
    Shell {
        task: String,
        #[source]
        source: ShellError,
    },
}

/// Glob pattern resolution errors
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("failed to resolve pattern {pattern}: {message}")]
    Invalid { pattern: String, message: String },

    #[error("failed to read {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Task cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to access cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode cache: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode cache {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

/// Project discovery and invocation errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to find task script (searched: {0})")]
    ScriptNotFound(String),

    #[error("Please run the configure task before any other task")]
    NotConfigured,

    #[error("Options can only be passed to the configure task")]
    OptionsRequireConfigure,
}

/// Specialized result type for script evaluation
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Specialized result type for shell operations
pub type ShellResult<T> = std::result::Result<T, ShellError>;

/// Specialized result type for task execution
pub type RunResult<T> = std::result::Result<T, RunError>;

/// Specialized result type for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

impl RunError {
    /// Walk the dependency chain down to the error that started it.
    pub fn root_cause(&self) -> &RunError {
        match self {
            RunError::Dependency { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_dependency_chain() {
        let err = RunError::Dependency {
            task: "a".to_string(),
            dependency: "b".to_string(),
            source: Box::new(RunError::Dependency {
                task: "b".to_string(),
                dependency: "a".to_string(),
                source: Box::new(RunError::Recursive("a".to_string())),
            }),
        };

        assert!(matches!(err.root_cause(), RunError::Recursive(name) if name == "a"));
        assert!(err.to_string().contains("called recursively"));
    }

    #[test]
    fn test_session_error_converts() {
        let err: BuildError = SessionError::NotConfigured.into();
        assert!(err.to_string().contains("configure"));
    }
}
