//! Shell command execution for task bodies

use crate::config::Task;
use crate::error::{RunError, RunResult};
use crate::shell::{self, EngineExecHandler, ExecHandler, Interpreter, OpenHandler};
use std::collections::BTreeMap;
use std::env;
use std::rc::Rc;
use tracing::info;

/// Whether the task body continues after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// `exit` was called; the task ends successfully
    Exit,
}

/// Environment of a task: process environment, then the script-wide
/// overrides, then the task's own overrides
pub fn task_env(global: &BTreeMap<String, String>, task: &Task) -> BTreeMap<String, String> {
    let mut vars: BTreeMap<String, String> = env::vars()
        .map(|(key, value)| {
            if cfg!(windows) {
                (key.to_uppercase(), value)
            } else {
                (key, value)
            }
        })
        .collect();

    for (key, value) in global.iter().chain(task.env.iter()) {
        vars.insert(key.clone(), value.clone());
    }
    vars
}

/// Interpreter that runs the body of `task`
pub fn task_interpreter(
    task: &Task,
    global_env: &BTreeMap<String, String>,
    exec_handler: Rc<dyn ExecHandler>,
    open_handler: Rc<dyn OpenHandler>,
) -> Interpreter {
    Interpreter::new(&task.base)
        .with_env(task_env(global_env, task))
        .with_exec_handler(Rc::new(EngineExecHandler::new(exec_handler)))
        .with_open_handler(open_handler)
        .inherit_stdin()
        .errexit(true)
}

/// Run one shell command of a task, statement by statement.
///
/// Returns the number of statements executed.
pub fn run_shell_command(
    task: &Task,
    index: usize,
    source: &str,
    interp: &mut Interpreter,
    dry_run: bool,
) -> RunResult<(Flow, usize)> {
    let name = format!("{}:{}", task.name, index);
    let script = shell::parse(source, &name).map_err(|source| RunError::Shell {
        task: task.name.clone(),
        source,
    })?;

    let mut executed = 0;
    for stmt in &script.stmts {
        info!(task = %task.name, command = true, "{}", stmt.text);
        if dry_run {
            continue;
        }

        interp.run(stmt).map_err(|source| RunError::Shell {
            task: task.name.clone(),
            source,
        })?;
        executed += 1;

        if interp.exited() {
            return Ok((Flow::Exit, executed));
        }
    }

    Ok((Flow::Continue, executed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShellError;
    use crate::shell::{DefaultExecHandler, DefaultOpenHandler};
    use std::fs;
    use tempfile::TempDir;

    fn interpreter(task: &Task) -> Interpreter {
        task_interpreter(
            task,
            &BTreeMap::new(),
            Rc::new(DefaultExecHandler),
            Rc::new(DefaultOpenHandler),
        )
    }

    #[test]
    fn test_task_env_layers() {
        let mut task = Task::new("t", "/tmp");
        task.env.insert("RBUILD_LAYER".to_string(), "task".to_string());
        let mut global = BTreeMap::new();
        global.insert("RBUILD_LAYER".to_string(), "global".to_string());
        global.insert("RBUILD_GLOBAL_ONLY".to_string(), "yes".to_string());

        let env = task_env(&global, &task);
        assert_eq!(env.get("RBUILD_LAYER").unwrap(), "task");
        assert_eq!(env.get("RBUILD_GLOBAL_ONLY").unwrap(), "yes");
    }

    #[test]
    fn test_statements_run_in_task_base() {
        let temp_dir = TempDir::new().unwrap();
        let task = Task::new("gen", temp_dir.path());
        let mut interp = interpreter(&task);

        let (flow, count) =
            run_shell_command(&task, 0, "echo one > out.txt\necho two >> out.txt", &mut interp, false)
                .unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(count, 2);
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("out.txt")).unwrap(),
            "one\ntwo\n"
        );
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let task = Task::new("gen", temp_dir.path());
        let mut interp = interpreter(&task);

        let (_, count) = run_shell_command(&task, 0, "echo x > out.txt", &mut interp, true).unwrap();
        assert_eq!(count, 0);
        assert!(!temp_dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_exit_ends_command() {
        let temp_dir = TempDir::new().unwrap();
        let task = Task::new("t", temp_dir.path());
        let mut interp = interpreter(&task);

        let (flow, count) =
            run_shell_command(&task, 0, "exit 0\necho late > late.txt", &mut interp, false).unwrap();
        assert_eq!(flow, Flow::Exit);
        assert_eq!(count, 1);
        assert!(!temp_dir.path().join("late.txt").exists());
    }

    #[test]
    fn test_failure_names_task() {
        let temp_dir = TempDir::new().unwrap();
        let task = Task::new("broken", temp_dir.path());
        let mut interp = interpreter(&task);

        let err = run_shell_command(&task, 0, "false\necho late", &mut interp, false).unwrap_err();
        match err {
            RunError::Shell { task, source } => {
                assert_eq!(task, "broken");
                assert!(matches!(source, ShellError::ExitStatus(1)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
