//! Functions available to task scripts
//!
//! Every builtin shares the [`EvalContext`] of the running evaluation. Rhai
//! resolves overloads by argument type, so a call with the wrong argument
//! shapes fails with a "function not found" error.

use crate::config::{
    validate_declaration, ScriptOption, Task, TaskCommand, ANONYMOUS_PREFIX,
};
use crate::script::commands::{build_commands, word_list_command};
use crate::script::context::{EvalContext, Phase};
use crate::script::paths::{normalize_pattern, relative_to};
use crate::script::values::{
    json_to_dynamic, path_or_string, string_list, yaml_lookup, yaml_scalar, ScriptPath,
    TaskHandle,
};
use crate::shell::{self, EngineExecHandler, Interpreter};
use regex::Regex;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, NativeCallContext, Position};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::debug;
use uuid::Uuid;

type Shared = Rc<RefCell<EvalContext>>;
type BuiltinResult<T> = Result<T, Box<EvalAltResult>>;

/// Keys accepted by `task()`
const TASK_KEYS: &[&str] = &[
    "short",
    "desc",
    "hidden",
    "deps",
    "base",
    "skip_if_exists",
    "inputs",
    "outputs",
    "env",
    "cmds",
];

fn runtime_error(message: impl Into<String>, pos: Position) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(message.into()), pos).into()
}

/// Register the builtin types and functions on `engine`
pub fn register(engine: &mut Engine, ctx: &Shared) {
    register_types(engine);
    register_options(engine, ctx);
    register_tasks(engine, ctx);
    register_paths(engine, ctx);
    register_env(engine, ctx);
    register_execute(engine, ctx);
    register_files(engine, ctx);
    register_logging(engine, ctx);

    engine.register_fn("host_os", || std::env::consts::OS.to_string());
    engine.register_fn("host_arch", || std::env::consts::ARCH.to_string());
}

fn register_types(engine: &mut Engine) {
    engine
        .register_type_with_name::<ScriptPath>("path")
        .register_fn("to_string", |p: &mut ScriptPath| p.0.clone())
        .register_fn("to_debug", |p: &mut ScriptPath| format!("path({:?})", p.0))
        .register_fn("+", |p: ScriptPath, s: &str| format!("{}{}", p.0, s))
        .register_fn("+", |s: &str, p: ScriptPath| format!("{}{}", s, p.0))
        .register_fn("==", |a: ScriptPath, b: ScriptPath| a == b)
        .register_fn("!=", |a: ScriptPath, b: ScriptPath| a != b);

    engine
        .register_type_with_name::<TaskHandle>("task")
        .register_get("name", |t: &mut TaskHandle| t.0.name.clone())
        .register_fn("to_string", |t: &mut TaskHandle| t.to_string());
}

fn register_options(engine: &mut Engine, ctx: &Shared) {
    let c = ctx.clone();
    engine.register_fn(
        "option",
        move |nc: NativeCallContext, name: &str, default: &str| {
            declare_option(&c, nc.position(), name, default, "")
        },
    );

    let c = ctx.clone();
    engine.register_fn(
        "option",
        move |nc: NativeCallContext, name: &str, default: &str, help: &str| {
            declare_option(&c, nc.position(), name, default, help)
        },
    );
}

fn declare_option(
    ctx: &Shared,
    pos: Position,
    name: &str,
    default: &str,
    help: &str,
) -> BuiltinResult<String> {
    let mut ctx = ctx.borrow_mut();
    if ctx.phase != Phase::Init {
        return Err(runtime_error(
            "option() can only be used at the top level of the script",
            pos,
        ));
    }

    if !ctx.declared.iter().any(|o| o.name == name) {
        ctx.declared.push(ScriptOption {
            name: name.to_string(),
            default: default.to_string(),
            help: help.to_string(),
        });
    }

    Ok(ctx
        .overrides
        .get(name)
        .cloned()
        .unwrap_or_else(|| default.to_string()))
}

fn register_tasks(engine: &mut Engine, ctx: &Shared) {
    let c = ctx.clone();
    engine.register_fn("task", move |nc: NativeCallContext, decl: Map| {
        let pos = nc.position();
        let mut ctx = c.borrow_mut();
        declare_task(&mut ctx, pos, &decl).map_err(|message| runtime_error(message, pos))
    });
}

fn optional_string(decl: &Map, key: &str) -> Result<Option<String>, String> {
    match decl.get(key) {
        None => Ok(None),
        Some(value) => value
            .clone()
            .into_string()
            .map(Some)
            .map_err(|found| format!("task: {} must be a string, found {}", key, found)),
    }
}

fn optional_list(decl: &Map, key: &str) -> Result<Vec<String>, String> {
    match decl.get(key) {
        None => Ok(Vec::new()),
        Some(value) => string_list(value, key).map_err(|e| format!("task: {}", e)),
    }
}

/// Build a task from the keyword map passed to `task()` and register it
fn declare_task(ctx: &mut EvalContext, pos: Position, decl: &Map) -> Result<TaskHandle, String> {
    if ctx.phase != Phase::Configure {
        return Err("task() can only be called from configure(options)".to_string());
    }

    if let Some(key) = decl.keys().find(|k| !TASK_KEYS.contains(&k.as_str())) {
        return Err(format!("task: unexpected key {}", key));
    }

    let short = optional_string(decl, "short")?;
    let hidden = match decl.get("hidden") {
        None => false,
        Some(value) => value
            .as_bool()
            .map_err(|found| format!("task: hidden must be a bool, found {}", found))?,
    };
    let (name, visible) = match short {
        Some(short) if !short.is_empty() => (short, !hidden),
        _ => (format!("{}{}", ANONYMOUS_PREFIX, Uuid::new_v4().simple()), false),
    };

    let base = match decl.get("base") {
        None => ".".to_string(),
        Some(value) => path_or_string(value)
            .ok_or_else(|| format!("task: base must be a string or path, found {}", value.type_name()))?,
    };
    let base = ctx.normalize(&[base]);

    let resolve = |patterns: Vec<String>| -> Vec<String> {
        patterns
            .iter()
            .map(|p| normalize_pattern(&base, &ctx.project_root, p))
            .collect()
    };

    let mut task = Task::new(name.clone(), base.clone());
    task.visible = visible;
    task.description = optional_string(decl, "desc")?.unwrap_or_default();
    task.deps = optional_list(decl, "deps")?;
    task.skip_if_exists = resolve(optional_list(decl, "skip_if_exists")?);
    task.inputs = resolve(optional_list(decl, "inputs")?);
    task.outputs = resolve(optional_list(decl, "outputs")?);

    if let Some(value) = decl.get("env") {
        let env = value
            .clone()
            .try_cast::<Map>()
            .ok_or_else(|| format!("task: env must be a map, found {}", value.type_name()))?;
        for (key, value) in env {
            let value = value.into_string().map_err(|found| {
                format!(
                    "task: found value of type {} for env key {} but only strings are supported",
                    found, key
                )
            })?;
            task.env.insert(key.to_string(), value);
        }
    }

    task.cmds = match decl.get("cmds") {
        None => Vec::new(),
        Some(value) => {
            let cmds = value
                .clone()
                .try_cast::<Array>()
                .ok_or_else(|| format!("task: cmds must be a list, found {}", value.type_name()))?;
            build_commands(&name, &base, &cmds)?
        }
    };

    validate_declaration(&task, &ctx.task_names).map_err(|issue| issue.describe(&name))?;
    ctx.task_names.insert(name.clone());

    if !task.inputs.is_empty() && task.outputs.is_empty() {
        ctx.log_warn(pos, &format!("task {}: found inputs but no outputs", name));
    }

    let task = Rc::new(task);
    if task.visible {
        ctx.registry
            .insert(task.clone())
            .map_err(|t| format!("task \"{}\" is declared twice", t.name))?;
    }
    debug!(
        task = %task.name,
        commands = task.cmds.len(),
        references = task.cmds.iter().filter(|c| matches!(c, TaskCommand::TaskReference(_))).count(),
        "declared task"
    );

    Ok(TaskHandle(task))
}

fn register_paths(engine: &mut Engine, ctx: &Shared) {
    let c = ctx.clone();
    engine.register_fn("resolve_path", move |a: &str| {
        ScriptPath(c.borrow().normalize(&[a]).to_string_lossy().into_owned())
    });

    let c = ctx.clone();
    engine.register_fn("resolve_path", move |a: &str, b: &str| {
        ScriptPath(c.borrow().normalize(&[a, b]).to_string_lossy().into_owned())
    });

    let c = ctx.clone();
    engine.register_fn("resolve_path", move |a: &str, b: &str, d: &str| {
        ScriptPath(c.borrow().normalize(&[a, b, d]).to_string_lossy().into_owned())
    });

    let c = ctx.clone();
    engine.register_fn(
        "resolve_path",
        move |nc: NativeCallContext, parts: Array| {
            resolve_path(&c, nc.position(), &parts, &Map::new())
        },
    );

    let c = ctx.clone();
    engine.register_fn(
        "resolve_path",
        move |nc: NativeCallContext, parts: Array, kwargs: Map| {
            resolve_path(&c, nc.position(), &parts, &kwargs)
        },
    );

    let c = ctx.clone();
    engine.register_fn("isdir", move |nc: NativeCallContext, path: Dynamic| {
        let path = existing_path_arg(&c, nc.position(), "isdir", &path)?;
        Ok::<_, Box<EvalAltResult>>(path.is_dir())
    });

    let c = ctx.clone();
    engine.register_fn("isfile", move |nc: NativeCallContext, path: Dynamic| {
        let path = existing_path_arg(&c, nc.position(), "isfile", &path)?;
        Ok::<_, Box<EvalAltResult>>(path.is_file())
    });
}

fn existing_path_arg(ctx: &Shared, pos: Position, name: &str, value: &Dynamic) -> BuiltinResult<PathBuf> {
    let text = path_or_string(value).ok_or_else(|| {
        runtime_error(
            format!("{}: expected a string or path, found {}", name, value.type_name()),
            pos,
        )
    })?;
    Ok(ctx.borrow().normalize(&[text]))
}

fn resolve_path(ctx: &Shared, pos: Position, parts: &Array, kwargs: &Map) -> BuiltinResult<ScriptPath> {
    let ctx = ctx.borrow();

    if parts.is_empty() {
        return Err(runtime_error("resolve_path: expects at least one argument", pos));
    }

    let mut fragments = Vec::with_capacity(parts.len());
    for (idx, part) in parts.iter().enumerate() {
        let text = part.clone().into_string().map_err(|found| {
            runtime_error(
                format!(
                    "resolve_path: only accepts string arguments but argument {} was a {}",
                    idx, found
                ),
                pos,
            )
        })?;
        fragments.push(text);
    }
    let path = ctx.normalize(&fragments);

    let mut base = None;
    for (key, value) in kwargs {
        if key.as_str() != "base" {
            return Err(runtime_error(
                format!("resolve_path: unexpected keyword argument {}", key),
                pos,
            ));
        }
        let text = path_or_string(value).ok_or_else(|| {
            runtime_error(
                format!(
                    "resolve_path: invalid type {} for keyword base, expected string or path",
                    value.type_name()
                ),
                pos,
            )
        })?;
        base = Some(ctx.normalize(&[text]));
    }

    let path = match base {
        Some(base) => relative_to(&base, &path).ok_or_else(|| {
            runtime_error(
                format!(
                    "resolve_path: {} can not be made relative to {}",
                    path.display(),
                    base.display()
                ),
                pos,
            )
        })?,
        None => path,
    };

    Ok(ScriptPath(path.to_string_lossy().into_owned()))
}

fn register_env(engine: &mut Engine, ctx: &Shared) {
    let c = ctx.clone();
    engine.register_fn("getenv", move |key: &str| c.borrow().getenv(key));

    let c = ctx.clone();
    engine.register_fn("setenv", move |key: &str, value: &str| {
        c.borrow_mut().env.insert(key.to_string(), value.to_string());
        true
    });

    let c = ctx.clone();
    engine.register_fn("prepend_path", move |nc: NativeCallContext, dir: Dynamic| {
        let pos = nc.position();
        let dir = path_or_string(&dir).ok_or_else(|| {
            runtime_error(
                format!("prepend_path: got {}, want path or string", dir.type_name()),
                pos,
            )
        })?;

        let mut ctx = c.borrow_mut();
        let current = ctx.getenv("PATH");
        let dir = ctx.normalize(&[dir]);
        let separator = if cfg!(windows) { ";" } else { ":" };
        let value = if current.is_empty() {
            dir.to_string_lossy().into_owned()
        } else {
            format!("{}{}{}", dir.display(), separator, current)
        };
        ctx.env.insert("PATH".to_string(), value.clone());
        Ok::<_, Box<EvalAltResult>>(value)
    });

    let c = ctx.clone();
    engine.register_fn("load_vcvars", move |nc: NativeCallContext| {
        load_vcvars(&c, nc.position(), "amd64")
    });

    let c = ctx.clone();
    engine.register_fn("load_vcvars", move |nc: NativeCallContext, arch: &str| {
        load_vcvars(&c, nc.position(), arch)
    });
}

/// Import the Visual Studio build environment for `arch`. Does nothing on
/// other platforms.
fn load_vcvars(ctx: &Shared, pos: Position, arch: &str) -> BuiltinResult<bool> {
    if !cfg!(windows) {
        return Ok(true);
    }

    let fail = |message: String| runtime_error(message, pos);
    let vswhere = r"C:\Program Files (x86)\Microsoft Visual Studio\Installer\vswhere.exe";
    let output = std::process::Command::new(vswhere)
        .args(["-property", "installationPath", "-latest"])
        .output()
        .map_err(|e| fail(format!("failed to run {}: {}", vswhere, e)))?;

    let vs_path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if vs_path.is_empty() {
        return Err(fail(
            "No Visual Studio installation found. If you recently updated VS, you might have to restart your PC."
                .to_string(),
        ));
    }
    let vs_path = PathBuf::from(vs_path);
    if !vs_path.is_dir() {
        return Err(fail(format!(
            "the detected VS installation path {} does not exist",
            vs_path.display()
        )));
    }

    let vcvarsall = vs_path.join("VC").join("Auxiliary").join("Build").join("vcvarsall.bat");
    if !vcvarsall.is_file() {
        return Err(fail(format!("could not find {}", vcvarsall.display())));
    }

    let helper =
        std::env::temp_dir().join(format!("rbuild-vcvars-{}.bat", Uuid::new_v4().simple()));
    let script = format!(
        "@echo off\r\ncall \"{}\" %*\r\necho RB_PATH=%PATH%\r\necho RB_INCLUDE=%INCLUDE%\r\necho RB_LIBPATH=%LIBPATH%\r\necho RB_LIB=%LIB%\r\n",
        vcvarsall.display()
    );
    fs::write(&helper, script).map_err(|e| fail(format!("failed to write helper script: {}", e)))?;

    let env = ctx.borrow().shell_env();
    let result = std::process::Command::new("cmd")
        .arg("/C")
        .arg(&helper)
        .arg(arch)
        .env_clear()
        .envs(&env)
        .output();
    let _ = fs::remove_file(&helper);
    let output = result.map_err(|e| fail(format!("failed to run helper script: {}", e)))?;

    let line_re = Regex::new(r"^RB_([A-Z]+)=(.*)$").map_err(|e| fail(e.to_string()))?;
    let mut ctx = ctx.borrow_mut();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if let Some(caps) = line_re.captures(line.trim_end_matches('\r')) {
            ctx.env.insert(caps[1].to_string(), caps[2].to_string());
        }
    }

    Ok(true)
}

fn register_execute(engine: &mut Engine, ctx: &Shared) {
    let c = ctx.clone();
    engine.register_fn("execute", move |nc: NativeCallContext, cmd: Dynamic| {
        execute(&c, nc.position(), &cmd, "text", false)
    });

    let c = ctx.clone();
    engine.register_fn(
        "execute",
        move |nc: NativeCallContext, cmd: Dynamic, format: &str| {
            execute(&c, nc.position(), &cmd, format, false)
        },
    );

    let c = ctx.clone();
    engine.register_fn(
        "execute",
        move |nc: NativeCallContext, cmd: Dynamic, format: &str, show_error: bool| {
            execute(&c, nc.position(), &cmd, format, show_error)
        },
    );
}

/// Run a command from the script directory and return its output.
///
/// Returns `false` when the command fails.
fn execute(
    ctx: &Shared,
    pos: Position,
    cmd: &Dynamic,
    format: &str,
    show_error: bool,
) -> BuiltinResult<Dynamic> {
    if format != "text" && format != "json" {
        return Err(runtime_error(format!("execute: unsupported format {}", format), pos));
    }

    let (dir, env) = {
        let ctx = ctx.borrow();
        (ctx.script_dir.clone(), ctx.shell_env())
    };

    let source = if let Ok(text) = cmd.clone().into_string() {
        text
    } else if let Some(words) = cmd.clone().try_cast::<Array>() {
        word_list_command(&dir, &words).map_err(|e| runtime_error(format!("execute: {}", e), pos))?
    } else {
        return Err(runtime_error(
            format!(
                "execute: unexpected type {} for command, only strings and lists are valid",
                cmd.type_name()
            ),
            pos,
        ));
    };

    let script = shell::parse(&source, "execute")
        .map_err(|e| runtime_error(format!("execute: {}", e), pos))?;

    let mut interp = Interpreter::new(&dir)
        .with_env(env)
        .with_exec_handler(Rc::new(EngineExecHandler::default()))
        .capture_stdout()
        .errexit(true);
    if !show_error {
        interp = interp.discard_stderr();
    }

    if let Err(e) = interp.run_script(&script) {
        if show_error {
            ctx.borrow().log_error(pos, &format!("shell error: {}", e));
        }
        return Ok(Dynamic::from(false));
    }

    let output = String::from_utf8_lossy(&interp.take_output()).into_owned();
    if format == "json" {
        let value: serde_json::Value = serde_json::from_str(&output).map_err(|e| {
            runtime_error(format!("execute: failed to parse command output: {}", e), pos)
        })?;
        return Ok(json_to_dynamic(value));
    }

    Ok(Dynamic::from(output))
}

fn register_files(engine: &mut Engine, ctx: &Shared) {
    let c = ctx.clone();
    engine.register_fn(
        "read_yaml",
        move |nc: NativeCallContext, file: &str, key: &str, default: Dynamic| {
            read_yaml(&c, nc.position(), file, key, default)
        },
    );
}

/// Look up a dotted key in a YAML file. Parsed files are cached for the rest
/// of the evaluation.
fn read_yaml(
    ctx: &Shared,
    pos: Position,
    file: &str,
    key: &str,
    default: Dynamic,
) -> BuiltinResult<Dynamic> {
    let mut ctx = ctx.borrow_mut();
    let path = ctx.normalize(&[file]);

    if !ctx.yaml_cache.contains_key(&path) {
        let content = fs::read_to_string(&path).map_err(|e| {
            runtime_error(format!("failed to open file {}: {}", path.display(), e), pos)
        })?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|e| {
            runtime_error(format!("failed to parse file {}: {}", path.display(), e), pos)
        })?;
        ctx.yaml_cache.insert(path.clone(), doc);
    }

    let doc = match ctx.yaml_cache.get(&path) {
        Some(doc) => doc,
        None => return Ok(default),
    };
    match yaml_lookup(doc, key).map_err(|e| runtime_error(e, pos))? {
        None => Ok(default),
        Some(value) => yaml_scalar(value)
            .ok_or_else(|| runtime_error(format!("read_yaml: can't return value of {}", key), pos)),
    }
}

fn register_logging(engine: &mut Engine, ctx: &Shared) {
    let c = ctx.clone();
    engine.register_fn("info", move |nc: NativeCallContext, message: &str| {
        c.borrow().log_info(nc.position(), message);
    });

    let c = ctx.clone();
    engine.register_fn("warn", move |nc: NativeCallContext, message: &str| {
        c.borrow().log_warn(nc.position(), message);
    });

    engine.register_fn("error", move |nc: NativeCallContext, message: &str| {
        Err::<(), _>(runtime_error(message, nc.position()))
    });
}

/// Resolved option values passed to `configure(options)`
pub fn option_map(declared: &[ScriptOption], overrides: &BTreeMap<String, String>) -> Map {
    declared
        .iter()
        .map(|option| {
            let value = overrides
                .get(&option.name)
                .cloned()
                .unwrap_or_else(|| option.default.clone());
            (option.name.as_str().into(), Dynamic::from(value))
        })
        .collect()
}
