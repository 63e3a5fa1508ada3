//! Task script discovery

use crate::error::SessionError;
use std::env;
use std::path::{Path, PathBuf};

/// Name of the entry script searched for in the current and parent directories
pub const SCRIPT_FILE_NAME: &str = "tasks.rhai";

/// Suffix appended to the script path to build the cache path
pub const CACHE_SUFFIX: &str = ".cache";

/// Find the task script by searching the current and parent directories
pub fn find_script() -> Result<PathBuf, SessionError> {
    let cwd = env::current_dir().map_err(|e| {
        SessionError::ScriptNotFound(format!("failed to get current directory: {}", e))
    })?;
    find_script_from(&cwd)
}

/// Find the task script starting from a specific directory
pub fn find_script_from(start_dir: &Path) -> Result<PathBuf, SessionError> {
    let mut current_dir = start_dir.to_path_buf();
    let mut searched_paths = Vec::new();

    loop {
        let script_path = current_dir.join(SCRIPT_FILE_NAME);
        searched_paths.push(script_path.display().to_string());

        if script_path.is_file() {
            return Ok(script_path);
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(SessionError::ScriptNotFound(searched_paths.join(", "))),
        }
    }
}

/// Cache file location for a script
pub fn cache_path_for(script: &Path) -> PathBuf {
    let mut name = script.as_os_str().to_os_string();
    name.push(CACHE_SUFFIX);
    PathBuf::from(name)
}
