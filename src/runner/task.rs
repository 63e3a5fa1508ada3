//! Task execution
//!
//! Runs a task after its dependencies, skipping it when its skip-if-exists
//! paths exist or its outputs are newer than its inputs.

use crate::config::{Task, TaskCommand, TaskRegistry};
use crate::error::{RunError, RunResult};
use crate::runner::command::{run_shell_command, task_interpreter, Flow};
use crate::runner::context::{RunOptions, RunReport, RunState, TaskOutcome, TaskState};
use crate::runner::patterns::resolve_patterns;
use crate::shell::{DefaultExecHandler, DefaultOpenHandler, ExecHandler, OpenHandler};
use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Runs tasks of one registry
pub struct Runner<'a> {
    registry: &'a TaskRegistry,
    options: RunOptions,
    exec_handler: Rc<dyn ExecHandler>,
    open_handler: Rc<dyn OpenHandler>,
}

impl<'a> Runner<'a> {
    pub fn new(registry: &'a TaskRegistry) -> Self {
        Runner {
            registry,
            options: RunOptions::default(),
            exec_handler: Rc::new(DefaultExecHandler),
            open_handler: Rc::new(DefaultOpenHandler),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Handler for external commands. `mv`, `rm` and `mkdir` never reach it.
    pub fn with_exec_handler(mut self, handler: Rc<dyn ExecHandler>) -> Self {
        self.exec_handler = handler;
        self
    }

    pub fn with_open_handler(mut self, handler: Rc<dyn OpenHandler>) -> Self {
        self.open_handler = handler;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run task `name` and everything it depends on
    pub fn run(&self, name: &str) -> RunResult<RunReport> {
        let task = self
            .registry
            .get(name)
            .ok_or_else(|| RunError::TaskNotFound(name.to_string()))?
            .clone();

        let mut state = RunState::default();
        self.run_task(&task, self.options.force, true, &mut state)?;
        debug_assert!(state.running().is_empty());

        Ok(state.report)
    }

    fn run_task(&self, task: &Task, force: bool, can_skip: bool, state: &mut RunState) -> RunResult<()> {
        match state.state(&task.name) {
            Some(TaskState::Done) => {
                debug!(task = %task.name, "already run");
                return Ok(());
            }
            Some(TaskState::Running) => return Err(RunError::Recursive(task.name.clone())),
            None => {}
        }
        state.start(&task.name);

        for dep in &task.deps {
            if state.is_done(dep) {
                continue;
            }

            let dep_task = self
                .registry
                .get(dep)
                .ok_or_else(|| RunError::TaskNotFound(dep.clone()))?
                .clone();

            self.run_task(&dep_task, false, true, state)
                .map_err(|source| RunError::Dependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                    source: Box::new(source),
                })?;
        }

        if can_skip && !force && self.skip_paths_exist(task)? {
            info!(task = %task.name, "skipped because all skip files exist");
            state.finish(&task.name, TaskOutcome::Skipped);
            return Ok(());
        }

        if !force && self.is_up_to_date(task)? {
            state.finish(&task.name, TaskOutcome::UpToDate);
            return Ok(());
        }

        self.run_body(task, force, state)?;

        let outcome = if self.options.dry_run {
            TaskOutcome::DryRun
        } else {
            TaskOutcome::Executed
        };
        state.finish(&task.name, outcome);
        Ok(())
    }

    fn skip_paths_exist(&self, task: &Task) -> RunResult<bool> {
        let paths = resolve_patterns(&task.base, &task.skip_if_exists).map_err(|source| {
            RunError::Pattern {
                task: task.name.clone(),
                source,
            }
        })?;
        if paths.is_empty() {
            return Ok(false);
        }

        for path in &paths {
            match fs::metadata(path) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
                Err(source) => {
                    return Err(RunError::Stat {
                        task: task.name.clone(),
                        path: path.clone(),
                        source,
                    })
                }
            }
        }
        Ok(true)
    }

    /// Compare the newest input with the existing outputs
    fn is_up_to_date(&self, task: &Task) -> RunResult<bool> {
        let pattern_error = |source| RunError::Pattern {
            task: task.name.clone(),
            source,
        };
        let inputs = resolve_patterns(&task.base, &task.inputs).map_err(pattern_error)?;
        let outputs = resolve_patterns(&task.base, &task.outputs).map_err(pattern_error)?;

        let mut newest_input: Option<SystemTime> = None;
        for path in &inputs {
            let modified = fs::metadata(path)
                .and_then(|m| m.modified())
                .map_err(|source| RunError::MissingInput {
                    task: task.name.clone(),
                    path: path.clone(),
                    source,
                })?;
            newest_input = newest_input.max(Some(modified));
        }

        let newest_input = match newest_input {
            Some(time) => time,
            None => return Ok(false),
        };

        let mut newest_output: Option<SystemTime> = None;
        let mut oldest_output: Option<SystemTime> = None;
        for path in &outputs {
            let modified = match output_mtime(path) {
                Ok(Some(time)) => time,
                Ok(None) => continue,
                Err(source) => {
                    return Err(RunError::Stat {
                        task: task.name.clone(),
                        path: path.clone(),
                        source,
                    })
                }
            };
            newest_output = newest_output.max(Some(modified));
            oldest_output = Some(oldest_output.map_or(modified, |t| t.min(modified)));
        }

        let (newest_output, oldest_output) = match (newest_output, oldest_output) {
            (Some(newest), Some(oldest)) => (newest, oldest),
            _ => return Ok(false),
        };

        if let Ok(spread) = newest_output.duration_since(oldest_output) {
            if spread > self.options.output_spread_warning {
                warn!(
                    task = %task.name,
                    "oldest output is {:.1} minutes older than the newest output",
                    spread.as_secs_f64() / 60.0
                );
            }
        }

        match newest_output.duration_since(newest_input) {
            Ok(lead) if !lead.is_zero() => {
                info!(
                    task = %task.name,
                    "nothing to do (output is {:.1} seconds newer)",
                    lead.as_secs_f64()
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn run_body(&self, task: &Task, force: bool, state: &mut RunState) -> RunResult<()> {
        let mut interp = task_interpreter(
            task,
            self.registry.env(),
            self.exec_handler.clone(),
            self.open_handler.clone(),
        );

        for (index, cmd) in task.cmds.iter().enumerate() {
            match cmd {
                TaskCommand::ShellScript(source) => {
                    let (flow, executed) =
                        run_shell_command(task, index, source, &mut interp, self.options.dry_run)?;
                    state.report.statements += executed;
                    if flow == Flow::Exit {
                        break;
                    }
                }
                TaskCommand::TaskReference(sub) => self.run_task(sub, force, true, state)?,
            }
        }

        Ok(())
    }
}

fn output_mtime(path: &Path) -> io::Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => meta.modified().map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn shell_task(name: &str, base: &Path, cmds: &[&str]) -> Task {
        let mut task = Task::new(name, base);
        task.cmds = cmds
            .iter()
            .map(|c| TaskCommand::ShellScript(c.to_string()))
            .collect();
        task
    }

    fn registry(tasks: Vec<Task>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for task in tasks {
            registry.insert(Rc::new(task)).unwrap();
        }
        registry
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_unknown_task() {
        let registry = TaskRegistry::new();
        let err = Runner::new(&registry).run("nope").unwrap_err();
        assert_eq!(err.to_string(), "Task nope not found");
    }

    #[test]
    fn test_dependencies_run_first_and_once() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();

        let a = shell_task("a", base, &["echo a >> log.txt"]);
        let mut b = shell_task("b", base, &["echo b >> log.txt"]);
        b.deps = vec!["a".to_string()];
        let mut c = shell_task("c", base, &["echo c >> log.txt"]);
        c.deps = vec!["a".to_string(), "b".to_string()];
        let registry = registry(vec![a, b, c]);

        let report = Runner::new(&registry).run("c").unwrap();
        assert_eq!(report.executed(), vec!["a", "b", "c"]);
        assert_eq!(fs::read_to_string(base.join("log.txt")).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn test_cycle_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let mut a = Task::new("a", temp_dir.path());
        a.deps = vec!["b".to_string()];
        let mut b = Task::new("b", temp_dir.path());
        b.deps = vec!["a".to_string()];
        let registry = registry(vec![a, b]);

        let err = Runner::new(&registry).run("a").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Task a failed due to its dependency b: Task b failed due to its dependency a: Task a was called recursively"
        );
        assert!(matches!(err.root_cause(), RunError::Recursive(name) if name == "a"));
    }

    #[test]
    fn test_missing_dependency() {
        let temp_dir = TempDir::new().unwrap();
        let mut a = Task::new("a", temp_dir.path());
        a.deps = vec!["ghost".to_string()];
        let registry = registry(vec![a]);

        let err = Runner::new(&registry).run("a").unwrap_err();
        assert!(matches!(err, RunError::TaskNotFound(name) if name == "ghost"));
    }

    #[test]
    fn test_skip_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("marker"), "").unwrap();

        let mut task = shell_task("t", base, &["echo ran > ran.txt"]);
        task.skip_if_exists = vec!["marker".to_string()];
        let registry = registry(vec![task]);

        let report = Runner::new(&registry).run("t").unwrap();
        assert_eq!(report.outcome("t"), Some(TaskOutcome::Skipped));
        assert!(!base.join("ran.txt").exists());

        let report = Runner::new(&registry)
            .with_options(RunOptions::new().with_force(true))
            .run("t")
            .unwrap();
        assert_eq!(report.outcome("t"), Some(TaskOutcome::Executed));
        assert!(base.join("ran.txt").exists());
    }

    #[test]
    fn test_partial_skip_list_runs() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("one"), "").unwrap();

        let mut task = shell_task("t", base, &["true"]);
        task.skip_if_exists = vec!["one".to_string(), "two".to_string()];
        let registry = registry(vec![task]);

        let report = Runner::new(&registry).run("t").unwrap();
        assert_eq!(report.outcome("t"), Some(TaskOutcome::Executed));
    }

    #[test]
    fn test_staleness() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("in.txt"), "").unwrap();
        fs::write(base.join("out.txt"), "").unwrap();

        let now = SystemTime::now();
        set_mtime(&base.join("in.txt"), now - Duration::from_secs(60));
        set_mtime(&base.join("out.txt"), now - Duration::from_secs(30));

        let mut task = shell_task("t", base, &["echo x > out.txt"]);
        task.inputs = vec!["in.txt".to_string()];
        task.outputs = vec!["out.txt".to_string()];
        let registry = registry(vec![task]);

        let report = Runner::new(&registry).run("t").unwrap();
        assert_eq!(report.outcome("t"), Some(TaskOutcome::UpToDate));

        set_mtime(&base.join("in.txt"), now);
        let report = Runner::new(&registry).run("t").unwrap();
        assert_eq!(report.outcome("t"), Some(TaskOutcome::Executed));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut task = shell_task("t", temp_dir.path(), &["true"]);
        task.inputs = vec!["absent.txt".to_string()];
        let registry = registry(vec![task]);

        let err = Runner::new(&registry).run("t").unwrap_err();
        assert!(matches!(err, RunError::MissingInput { .. }));
    }

    #[test]
    fn test_outputs_without_inputs_always_run() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("out.txt"), "").unwrap();

        let mut task = shell_task("t", base, &["true"]);
        task.outputs = vec!["out.txt".to_string()];
        let registry = registry(vec![task]);

        let report = Runner::new(&registry).run("t").unwrap();
        assert_eq!(report.outcome("t"), Some(TaskOutcome::Executed));
    }

    #[test]
    fn test_task_reference_runs_sub_task() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();

        let sub = Rc::new(shell_task("auto#sub", base, &["echo sub >> log.txt"]));
        let mut all = Task::new("all", base);
        all.cmds = vec![
            TaskCommand::TaskReference(sub),
            TaskCommand::ShellScript("echo all >> log.txt".to_string()),
        ];
        let registry = registry(vec![all]);

        let report = Runner::new(&registry).run("all").unwrap();
        assert_eq!(report.executed(), vec!["auto#sub", "all"]);
        assert_eq!(fs::read_to_string(base.join("log.txt")).unwrap(), "sub\nall\n");
    }

    #[test]
    fn test_exit_ends_task_successfully() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        let task = shell_task("t", base, &["exit 0", "echo late > late.txt"]);
        let registry = registry(vec![task]);

        let report = Runner::new(&registry).run("t").unwrap();
        assert_eq!(report.outcome("t"), Some(TaskOutcome::Executed));
        assert!(!base.join("late.txt").exists());
    }

    #[test]
    fn test_dry_run() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        let task = shell_task("t", base, &["echo x > x.txt"]);
        let registry = registry(vec![task]);

        let report = Runner::new(&registry)
            .with_options(RunOptions::new().with_dry_run(true))
            .run("t")
            .unwrap();
        assert_eq!(report.outcome("t"), Some(TaskOutcome::DryRun));
        assert_eq!(report.statements, 0);
        assert!(!base.join("x.txt").exists());
    }
}
