//! Project sessions
//!
//! A session ties a task script to its cache. The `configure` task evaluates
//! the script with the given options and stores the result; every other task
//! runs from the cache, which is refreshed when the script changed since.

use crate::config::{
    cache_path_for, find_script, find_script_from, read_cache, write_cache, OptionValues,
    ScriptOption, TaskRegistry, RESERVED_TASK,
};
use crate::error::{Result, SessionError};
use crate::runner::{RunOptions, RunReport, Runner};
use crate::script::Evaluator;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// A task script, its project root and its cache file
#[derive(Debug, Clone)]
pub struct Session {
    script: PathBuf,
    project_root: PathBuf,
    cache: PathBuf,
}

impl Session {
    /// Session for `script`; the project root is the script's directory
    pub fn new(script: impl Into<PathBuf>) -> Self {
        let script = script.into();
        let project_root = script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let cache = cache_path_for(&script);

        Session {
            script,
            project_root,
            cache,
        }
    }

    /// Session for the nearest script above the current directory
    pub fn discover() -> Result<Self> {
        Ok(Self::new(find_script()?))
    }

    pub fn discover_from(dir: &Path) -> Result<Self> {
        Ok(Self::new(find_script_from(dir)?))
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache
    }

    /// Evaluate the script with `options` and cache the result
    pub fn configure(&self, options: OptionValues) -> Result<TaskRegistry> {
        let evaluation = Evaluator::new(&self.script, &self.project_root)
            .with_options(options.clone())
            .evaluate()?;

        write_cache(&self.cache, &options, &evaluation.registry)?;
        info!(cache = %self.cache.display(), "configured");
        Ok(evaluation.registry)
    }

    /// Registry from the cache, re-evaluated with the cached options when the
    /// script is newer than the cache
    pub fn load(&self) -> Result<TaskRegistry> {
        let (options, registry) = read_cache(&self.cache)?.ok_or(SessionError::NotConfigured)?;

        let script_time = modified(&self.script)?;
        let cache_time = modified(&self.cache)?;
        if script_time <= cache_time {
            debug!(cache = %self.cache.display(), "using cached tasks");
            return Ok(registry);
        }

        info!(script = %self.script.display(), "script changed, re-evaluating");
        self.configure(options)
    }

    /// Options declared by the script, without running `configure`
    pub fn list_options(&self) -> Result<Vec<ScriptOption>> {
        let evaluation = Evaluator::new(&self.script, &self.project_root)
            .options_only()
            .evaluate()?;
        Ok(evaluation.options)
    }

    /// Run `tasks` in order, stopping at the first failure.
    ///
    /// `configure` re-evaluates the script with `options`. Options are
    /// rejected unless `configure` is the only task.
    pub fn run(
        &self,
        tasks: &[String],
        options: OptionValues,
        run_options: RunOptions,
    ) -> Result<Vec<RunReport>> {
        let configure_only = tasks.len() == 1 && tasks[0] == RESERVED_TASK;
        if !options.is_empty() && !configure_only {
            return Err(SessionError::OptionsRequireConfigure.into());
        }

        let mut registry: Option<TaskRegistry> = None;
        let mut reports = Vec::with_capacity(tasks.len());

        for name in tasks {
            if name == RESERVED_TASK {
                registry = Some(self.configure(options.clone())?);
                continue;
            }

            let current = match registry.take() {
                Some(registry) => registry,
                None => self.load()?,
            };
            let report = Runner::new(&current)
                .with_options(run_options.clone())
                .run(name);
            registry = Some(current);
            reports.push(report?);
        }

        Ok(reports)
    }
}

/// Split command-line arguments into task names and `key=value` options
pub fn split_arguments<S: AsRef<str>>(args: &[S]) -> (Vec<String>, OptionValues) {
    let mut tasks = Vec::new();
    let mut options = OptionValues::new();

    for arg in args {
        match arg.as_ref().split_once('=') {
            Some((key, value)) => {
                options.insert(key.to_string(), value.to_string());
            }
            None => tasks.push(arg.as_ref().to_string()),
        }
    }

    (tasks, options)
}

fn modified(path: &Path) -> Result<SystemTime> {
    Ok(fs::metadata(path)?.modified()?)
}
