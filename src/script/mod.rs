//! Task script evaluation
//!
//! A task script is a Rhai program. Its top-level statements declare options
//! with `option()`. The evaluator then calls `configure(options)`, which
//! declares tasks with `task()`.
//!
//! ```text
//! let mode = option("mode", "debug", "build flavour");
//!
//! fn configure(options) {
//!     let gen = task(#{
//!         short: "gen",
//!         inputs: ["gen.sh"],
//!         outputs: ["out.txt"],
//!         cmds: ["sh gen.sh > out.txt"],
//!     });
//!     task(#{ short: "all", deps: ["gen"], cmds: [["echo", "mode", options.mode]] });
//! }
//! ```

pub mod builtins;
pub mod commands;
pub mod context;
pub mod paths;
pub mod values;

pub use context::{EvalContext, Phase};
pub use values::{ScriptPath, TaskHandle};

use crate::config::{unknown_dependencies, OptionValues, ScriptOption, TaskRegistry, RESERVED_TASK};
use crate::error::{ScriptError, ScriptResult};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, ParseError, Scope};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, info, warn};

const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FUNCTION_EXPR_DEPTH: usize = 32;

/// Result of evaluating a task script
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Visible tasks and the environment overrides set by the script
    pub registry: TaskRegistry,

    /// Options in declaration order
    pub options: Vec<ScriptOption>,
}

/// Evaluates one task script
#[derive(Debug, Clone)]
pub struct Evaluator {
    script: PathBuf,
    project_root: PathBuf,
    options: OptionValues,
    options_only: bool,
}

impl Evaluator {
    pub fn new(script: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            project_root: project_root.into(),
            options: OptionValues::new(),
            options_only: false,
        }
    }

    /// Option values that override the script defaults
    pub fn with_options(mut self, options: OptionValues) -> Self {
        self.options = options;
        self
    }

    /// Stop after the top-level statements, collecting only the options
    pub fn options_only(mut self) -> Self {
        self.options_only = true;
        self
    }

    pub fn evaluate(self) -> ScriptResult<Evaluation> {
        let script = absolute(self.script);
        let project_root = absolute(self.project_root);

        let source = fs::read_to_string(&script).map_err(|source| ScriptError::Read {
            path: script.clone(),
            source,
        })?;

        let ctx = Rc::new(RefCell::new(EvalContext::new(
            script,
            project_root,
            self.options,
        )));
        let file = ctx.borrow().display_name();
        debug!(file = %file, "evaluating task script");

        let engine = build_engine(&ctx);
        let ast = engine
            .compile(&source)
            .map_err(|err| syntax_error(&file, err))?;

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|err| eval_error(&file, *err))?;

        if !self.options_only {
            let has_entry = ast
                .iter_functions()
                .any(|f| f.name == RESERVED_TASK && f.params.len() == 1);
            if !has_entry {
                return Err(ScriptError::MissingEntry { file });
            }

            let options = {
                let mut ctx = ctx.borrow_mut();
                ctx.phase = Phase::Configure;
                builtins::option_map(&ctx.declared, &ctx.overrides)
            };

            let call = CallFnOptions::new().eval_ast(false).rewind_scope(false);
            engine
                .call_fn_with_options::<Dynamic>(call, &mut scope, &ast, RESERVED_TASK, (options,))
                .map_err(|err| eval_error(&file, *err))?;
        }
        drop(engine);

        let mut ctx = ctx.borrow_mut();
        for key in ctx.overrides.keys() {
            if !ctx.declared.iter().any(|o| &o.name == key) {
                warn!(file = %file, "option {} is not declared by the script", key);
            }
        }

        let mut registry = std::mem::take(&mut ctx.registry);
        for (task, dep) in unknown_dependencies(&registry) {
            warn!(file = %file, task = %task, "task {} depends on unknown task {}", task, dep);
        }
        registry.set_env(std::mem::take(&mut ctx.env));

        if !self.options_only {
            info!(file = %file, tasks = registry.len(), "evaluated task script");
        }

        Ok(Evaluation {
            registry,
            options: std::mem::take(&mut ctx.declared),
        })
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return paths::clean(&path);
    }
    match std::env::current_dir() {
        Ok(cwd) => paths::clean(&cwd.join(path)),
        Err(_) => path,
    }
}

/// Sandboxed engine with the builtins registered
fn build_engine(ctx: &Rc<RefCell<EvalContext>>) -> Engine {
    let mut engine = Engine::new();
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FUNCTION_EXPR_DEPTH);

    let c = ctx.clone();
    engine.on_print(move |text| info!(file = %c.borrow().display_name(), "{}", text));
    let c = ctx.clone();
    engine.on_debug(move |text, _source, pos| {
        debug!(
            file = %c.borrow().display_name(),
            line = pos.line().unwrap_or(0),
            column = pos.position().unwrap_or(0),
            "{}",
            text
        )
    });

    builtins::register(&mut engine, ctx);
    engine
}

fn syntax_error(file: &str, err: ParseError) -> ScriptError {
    ScriptError::Syntax {
        file: file.to_string(),
        line: err.1.line().unwrap_or(0),
        column: err.1.position().unwrap_or(0),
        message: err.0.to_string(),
    }
}

/// Report the innermost failure of a call chain with its own position
fn eval_error(file: &str, err: EvalAltResult) -> ScriptError {
    let mut err = err;
    loop {
        match err {
            EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => err = *inner,
            other => {
                err = other;
                break;
            }
        }
    }

    let pos = err.take_position();
    let message = match err {
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        other => other.to_string(),
    };

    ScriptError::Eval {
        file: file.to_string(),
        line: pos.line().unwrap_or(0),
        column: pos.position().unwrap_or(0),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskCommand;
    use std::fs;
    use tempfile::TempDir;

    fn evaluate(source: &str) -> ScriptResult<Evaluation> {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("tasks.rhai");
        fs::write(&script, source).unwrap();
        Evaluator::new(&script, temp_dir.path()).evaluate()
    }

    #[test]
    fn test_tasks_are_registered_in_order() {
        let evaluation = evaluate(
            r#"
            fn configure(options) {
                task(#{ short: "gen", outputs: ["out.txt"], cmds: ["echo hi > out.txt"] });
                task(#{ short: "all", deps: ["gen"], desc: "everything" });
                task(#{ short: "secret", hidden: true });
            }
            "#,
        )
        .unwrap();

        assert_eq!(evaluation.registry.names(), vec!["gen", "all"]);
        let all = evaluation.registry.get("all").unwrap();
        assert_eq!(all.deps, vec!["gen"]);
        assert_eq!(all.description, "everything");
    }

    #[test]
    fn test_missing_entry_is_fatal() {
        let err = evaluate("let x = 1;").unwrap_err();
        assert!(matches!(err, ScriptError::MissingEntry { .. }));
    }

    #[test]
    fn test_task_outside_configure_is_fatal() {
        let err = evaluate(
            r#"
            task(#{ short: "early" });
            fn configure(options) {}
            "#,
        )
        .unwrap_err();

        match err {
            ScriptError::Eval { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("configure(options)"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_error_inside_configure_reports_inner_position() {
        let err = evaluate("fn configure(options) {\n    error(\"boom\");\n}\n").unwrap_err();

        match err {
            ScriptError::Eval { line, message, .. } => {
                assert_eq!(line, 2);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_is_positioned() {
        let err = evaluate("fn configure(options) {\n  let = ;\n}\n").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_anonymous_tasks_are_embedded_not_registered() {
        let evaluation = evaluate(
            r#"
            fn configure(options) {
                let step = task(#{ cmds: ["echo step"] });
                task(#{ short: "all", cmds: [step, "echo done"] });
            }
            "#,
        )
        .unwrap();

        assert_eq!(evaluation.registry.len(), 1);
        let all = evaluation.registry.get("all").unwrap();
        match &all.cmds[0] {
            TaskCommand::TaskReference(sub) => {
                assert!(sub.is_anonymous());
                assert!(!sub.visible);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
