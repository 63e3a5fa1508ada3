//! Evaluation state shared by the builtins of one script evaluation

use crate::config::{OptionValues, ScriptOption, TaskRegistry};
use crate::script::paths::{normalize_path, simplify_path};
use rhai::Position;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Which part of the script is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Top-level statements, where options are declared
    Init,
    /// The `configure(options)` entry function, where tasks are declared
    Configure,
}

/// Mutable state of one evaluation
#[derive(Debug)]
pub struct EvalContext {
    /// Absolute path of the entry script
    pub script: PathBuf,
    pub script_dir: PathBuf,
    pub project_root: PathBuf,
    pub phase: Phase,

    /// Option values passed on the command line
    pub overrides: OptionValues,

    /// Options declared so far, in declaration order
    pub declared: Vec<ScriptOption>,

    /// Environment overrides from `setenv`, `prepend_path` and `load_vcvars`
    pub env: BTreeMap<String, String>,

    pub registry: TaskRegistry,

    /// Names of every task declared so far, hidden ones included
    pub task_names: HashSet<String>,

    /// Parsed YAML documents keyed by absolute path
    pub yaml_cache: HashMap<PathBuf, serde_yaml::Value>,
}

impl EvalContext {
    pub fn new(script: PathBuf, project_root: PathBuf, overrides: OptionValues) -> Self {
        let script_dir = script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_root.clone());

        EvalContext {
            script,
            script_dir,
            project_root,
            phase: Phase::Init,
            overrides,
            declared: Vec::new(),
            env: BTreeMap::new(),
            registry: TaskRegistry::new(),
            task_names: HashSet::new(),
            yaml_cache: HashMap::new(),
        }
    }

    /// Resolve path fragments relative to the script directory
    pub fn normalize<S: AsRef<str>>(&self, parts: &[S]) -> PathBuf {
        normalize_path(&self.script_dir, &self.project_root, parts)
    }

    /// The script path as shown in messages
    pub fn display_name(&self) -> String {
        simplify_path(&self.project_root, &self.script)
    }

    /// `file:line:col` prefix for a script position
    pub fn location(&self, pos: Position) -> String {
        format!(
            "{}:{}:{}",
            self.display_name(),
            pos.line().unwrap_or(0),
            pos.position().unwrap_or(0)
        )
    }

    /// Process environment with the evaluation overrides applied
    pub fn shell_env(&self) -> BTreeMap<String, String> {
        let mut vars: BTreeMap<String, String> = env::vars()
            .map(|(key, value)| {
                if cfg!(windows) {
                    (key.to_uppercase(), value)
                } else {
                    (key, value)
                }
            })
            .collect();
        vars.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    /// Look up a variable in the overrides, then the process environment
    pub fn getenv(&self, key: &str) -> String {
        match self.env.get(key) {
            Some(value) => value.clone(),
            None => env::var(key).unwrap_or_default(),
        }
    }

    pub fn log_info(&self, pos: Position, message: &str) {
        info!(file = %self.display_name(), "{}: {}", self.location(pos), message);
    }

    pub fn log_warn(&self, pos: Position, message: &str) {
        warn!(file = %self.display_name(), "{}: {}", self.location(pos), message);
    }

    pub fn log_error(&self, pos: Position, message: &str) {
        error!(file = %self.display_name(), "{}: {}", self.location(pos), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_env_overrides_shadow_process_env() {
        let temp_dir = TempDir::new().unwrap();
        let mut ctx = EvalContext::new(
            temp_dir.path().join("tasks.rhai"),
            temp_dir.path().to_path_buf(),
            OptionValues::new(),
        );
        ctx.env.insert("RBUILD_TEST_VAR".to_string(), "override".to_string());

        assert_eq!(ctx.getenv("RBUILD_TEST_VAR"), "override");
        assert_eq!(ctx.getenv("RBUILD_SURELY_UNSET_VAR"), "");
        assert_eq!(ctx.shell_env().get("RBUILD_TEST_VAR").unwrap(), "override");
    }

    #[test]
    fn test_display_name_is_project_relative() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = EvalContext::new(
            temp_dir.path().join("sub").join("tasks.rhai"),
            temp_dir.path().to_path_buf(),
            OptionValues::new(),
        );
        assert_eq!(ctx.display_name(), "//sub/tasks.rhai");
        assert_eq!(ctx.script_dir, temp_dir.path().join("sub"));
    }
}
