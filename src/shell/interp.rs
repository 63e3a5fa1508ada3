//! Shell interpreter
//!
//! Executes parsed statements against a working directory and a variable
//! table. Commands that are not builtins go through the [`ExecHandler`],
//! redirect targets through the [`OpenHandler`].
//!
//! Pipeline stages run one after another. Each stage's output is buffered in
//! memory and becomes the next stage's input once the stage has finished, so
//! a producer that never ends (`yes | head -1`) never lets the pipeline
//! finish. The status of a pipeline is the status of its last stage.

use crate::error::{ShellError, ShellResult};
use crate::shell::ast::*;
use crate::shell::builtins;
use crate::shell::expand::{self, Expand};
use crate::shell::handlers::{
    DefaultExecHandler, DefaultOpenHandler, ExecContext, ExecHandler, ExecIo, Input, OpenHandler,
    OpenMode, Output,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Destination of an output stream inside the interpreter
#[derive(Debug, Clone)]
pub(super) enum Sink {
    Stdout,
    Stderr,
    Null,
    /// The enclosing capture buffer
    Capture,
    File(Rc<File>),
}

/// Source of standard input inside the interpreter
#[derive(Debug, Clone)]
pub(super) enum Source {
    Null,
    Inherit,
    Bytes(Rc<Vec<u8>>),
    File(Rc<File>),
}

/// The standard streams a command runs with
#[derive(Debug, Clone)]
pub(super) struct Streams {
    pub stdin: Source,
    pub stdout: Sink,
    pub stderr: Sink,
}

/// A POSIX shell subset interpreter
#[derive(Clone)]
pub struct Interpreter {
    dir: PathBuf,
    env: BTreeMap<String, String>,
    locals: BTreeMap<String, String>,
    last_status: i32,
    exited: bool,
    errexit: bool,
    suppress_errexit: usize,
    stdin: Source,
    stdout: Sink,
    stderr: Sink,
    output: Vec<u8>,
    exec_handler: Rc<dyn ExecHandler>,
    open_handler: Rc<dyn OpenHandler>,
}

impl Interpreter {
    /// Create an interpreter running in `dir` with an empty environment
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Interpreter {
            dir: dir.into(),
            env: BTreeMap::new(),
            locals: BTreeMap::new(),
            last_status: 0,
            exited: false,
            errexit: false,
            suppress_errexit: 0,
            stdin: Source::Null,
            stdout: Sink::Stdout,
            stderr: Sink::Stderr,
            output: Vec::new(),
            exec_handler: Rc::new(DefaultExecHandler),
            open_handler: Rc::new(DefaultOpenHandler),
        }
    }

    /// Set the exported environment
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_exec_handler(mut self, handler: Rc<dyn ExecHandler>) -> Self {
        self.exec_handler = handler;
        self
    }

    pub fn with_open_handler(mut self, handler: Rc<dyn OpenHandler>) -> Self {
        self.open_handler = handler;
        self
    }

    /// Let commands read the process's standard input
    pub fn inherit_stdin(mut self) -> Self {
        self.stdin = Source::Inherit;
        self
    }

    /// Collect standard output instead of printing it; see [`Interpreter::take_output`]
    pub fn capture_stdout(mut self) -> Self {
        self.stdout = Sink::Capture;
        self
    }

    pub fn discard_stderr(mut self) -> Self {
        self.stderr = Sink::Null;
        self
    }

    /// Abort on the first failing statement, like `set -e`
    pub fn errexit(mut self, enabled: bool) -> Self {
        self.errexit = enabled;
        self
    }

    /// Current working directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Exit status of the last command
    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    /// Whether `exit` was called
    pub fn exited(&self) -> bool {
        self.exited
    }

    /// Look up a shell or environment variable
    pub fn var(&self, name: &str) -> Option<&str> {
        self.locals
            .get(name)
            .or_else(|| self.env.get(name))
            .map(String::as_str)
    }

    /// Take the captured standard output
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Run every statement of a script
    pub fn run_script(&mut self, script: &Script) -> ShellResult<()> {
        for stmt in &script.stmts {
            if self.exited {
                break;
            }
            self.run(stmt)?;
        }
        Ok(())
    }

    /// Run one statement.
    ///
    /// With errexit enabled a failing statement returns
    /// [`ShellError::ExitStatus`]. `exit 0` succeeds and marks the
    /// interpreter as exited; later statements are ignored.
    pub fn run(&mut self, stmt: &Stmt) -> ShellResult<()> {
        if self.exited {
            return Ok(());
        }

        let streams = self.default_streams();
        let mut buf = std::mem::take(&mut self.output);
        let result = self.run_and_or(&stmt.list, &streams, &mut buf);
        self.output = buf;

        match result {
            Ok(status) => {
                self.last_status = status;
                Ok(())
            }
            Err(ShellError::ExitStatus(0)) if self.exited => {
                self.last_status = 0;
                Ok(())
            }
            Err(e) => {
                if let ShellError::ExitStatus(code) = e {
                    self.last_status = code;
                }
                Err(e)
            }
        }
    }

    fn default_streams(&self) -> Streams {
        Streams {
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }

    fn errexit_active(&self) -> bool {
        self.errexit && self.suppress_errexit == 0
    }

    fn run_list(&mut self, script: &Script, streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
        for stmt in &script.stmts {
            if self.exited {
                break;
            }
            let status = self.run_and_or(&stmt.list, streams, buf)?;
            self.last_status = status;
        }
        Ok(self.last_status)
    }

    fn run_and_or(&mut self, list: &AndOrList, streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
        let final_index = list.rest.len();
        let mut last_ran = 0;

        let mut status = self.run_guarded(&list.first, final_index != 0, streams, buf)?;
        for (i, (connector, pipeline)) in list.rest.iter().enumerate() {
            let proceed = match connector {
                Connector::And => status == 0,
                Connector::Or => status != 0,
            };
            if !proceed {
                continue;
            }
            last_ran = i + 1;
            status = self.run_guarded(pipeline, last_ran != final_index, streams, buf)?;
        }

        let last = match last_ran {
            0 => &list.first,
            n => &list.rest[n - 1].1,
        };
        if status != 0 && last_ran == final_index && !last.negated && self.errexit_active() {
            return Err(ShellError::ExitStatus(status));
        }
        Ok(status)
    }

    /// Run a pipeline, suppressing errexit inside it when its status is tested
    fn run_guarded(
        &mut self,
        pipeline: &Pipeline,
        tested: bool,
        streams: &Streams,
        buf: &mut Vec<u8>,
    ) -> ShellResult<i32> {
        let guard = tested || pipeline.negated;
        if guard {
            self.suppress_errexit += 1;
        }
        let result = self.run_pipeline(pipeline, streams, buf);
        if guard {
            self.suppress_errexit -= 1;
        }
        result
    }

    fn run_pipeline(&mut self, pipeline: &Pipeline, streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
        let status = if pipeline.commands.len() == 1 {
            self.run_command(&pipeline.commands[0], streams, buf)?
        } else {
            let mut input = streams.stdin.clone();
            let mut status = 0;
            let last = pipeline.commands.len() - 1;
            for (i, command) in pipeline.commands.iter().enumerate() {
                let mut stage_buf = Vec::new();
                let stage = Streams {
                    stdin: input.clone(),
                    stdout: if i == last {
                        streams.stdout.clone()
                    } else {
                        Sink::Capture
                    },
                    stderr: streams.stderr.clone(),
                };
                let target = if i == last { &mut *buf } else { &mut stage_buf };
                status = self.subshell(|sub| sub.run_command(command, &stage, target))?;
                input = Source::Bytes(Rc::new(stage_buf));
            }
            status
        };

        if pipeline.negated {
            Ok(if status == 0 { 1 } else { 0 })
        } else {
            Ok(status)
        }
    }

    /// Run `f` on a copy of the interpreter. `exit` and errexit inside it only
    /// end the copy and become its status.
    fn subshell<F>(&mut self, f: F) -> ShellResult<i32>
    where
        F: FnOnce(&mut Interpreter) -> ShellResult<i32>,
    {
        let mut sub = self.clone();
        sub.output = Vec::new();
        let status = match f(&mut sub) {
            Ok(status) => status,
            Err(ShellError::ExitStatus(code)) => code,
            Err(e) => return Err(e),
        };
        self.last_status = status;
        Ok(status)
    }

    fn run_command(&mut self, command: &Command, streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
        match command {
            Command::Simple(simple) => self.run_simple(simple, streams, buf),
            Command::Subshell(script, redirects) => {
                let streams = match self.redirected(redirects, streams, buf)? {
                    Some(streams) => streams,
                    None => return Ok(1),
                };
                self.subshell(|sub| sub.run_list(script, &streams, buf))
            }
            Command::Group(script, redirects) => {
                let streams = match self.redirected(redirects, streams, buf)? {
                    Some(streams) => streams,
                    None => return Ok(1),
                };
                self.run_list(script, &streams, buf)
            }
        }
    }

    fn run_simple(&mut self, cmd: &SimpleCommand, streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
        let args = expand::expand_fields(self, &cmd.words)?;
        let mut assigns = Vec::with_capacity(cmd.assigns.len());
        for assign in &cmd.assigns {
            let value = expand::expand_string(self, &assign.value)?;
            assigns.push((assign.name.clone(), value));
        }
        let streams = match self.redirected(&cmd.redirects, streams, buf)? {
            Some(streams) => streams,
            None => return Ok(1),
        };

        if args.is_empty() {
            for (name, value) in assigns {
                self.set_var(&name, value);
            }
            return Ok(0);
        }

        if let Some(builtin) = builtins::lookup(&args[0]) {
            return builtin(self, &args[1..], &streams, buf);
        }

        let mut env = self.env.clone();
        env.extend(assigns);
        let io = ExecIo {
            stdin: self.input(&streams.stdin, &args[0])?,
            stdout: self.output_for(&streams.stdout, &Sink::Stdout, &args[0])?,
            stderr: self.output_for(&streams.stderr, &Sink::Stderr, &args[0])?,
        };
        let ctx = ExecContext {
            dir: &self.dir,
            env: &env,
        };
        let outcome = self.exec_handler.exec(&ctx, &args, io)?;

        write_sink(&streams.stdout, &outcome.stdout, buf);
        write_sink(&streams.stderr, &outcome.stderr, buf);
        Ok(outcome.status)
    }

    fn input(&self, source: &Source, command: &str) -> ShellResult<Input> {
        Ok(match source {
            Source::Null => Input::Null,
            Source::Inherit => Input::Inherit,
            Source::Bytes(bytes) => Input::Bytes(bytes.as_ref().clone()),
            Source::File(file) => Input::File(clone_file(file, command)?),
        })
    }

    /// Translate a sink into a handler output. A sink the child cannot write
    /// to directly is captured and forwarded afterwards.
    fn output_for(&self, sink: &Sink, native: &Sink, command: &str) -> ShellResult<Output> {
        Ok(match (sink, native) {
            (Sink::Stdout, Sink::Stdout) | (Sink::Stderr, Sink::Stderr) => Output::Inherit,
            (Sink::Null, _) => Output::Null,
            (Sink::File(file), _) => Output::File(clone_file(file, command)?),
            _ => Output::Capture,
        })
    }

    /// Apply `redirects`. A target that cannot be opened is reported on
    /// stderr and gives `None`, which the command turns into status 1.
    fn redirected(
        &mut self,
        redirects: &[Redirect],
        streams: &Streams,
        buf: &mut Vec<u8>,
    ) -> ShellResult<Option<Streams>> {
        match self.apply_redirects(redirects, streams) {
            Ok(streams) => Ok(Some(streams)),
            Err(ShellError::Redirect { path, source }) => {
                let message = format!("{}: {}\n", path.display(), source);
                write_sink(&streams.stderr, message.as_bytes(), buf);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn apply_redirects(&mut self, redirects: &[Redirect], streams: &Streams) -> ShellResult<Streams> {
        let mut streams = streams.clone();

        for redirect in redirects {
            let target = expand::expand_string(self, &redirect.target)?;
            match redirect.op {
                RedirectOp::Read => {
                    let file = self.open(&target, OpenMode::Read)?;
                    if redirect.fd == 0 {
                        streams.stdin = Source::File(Rc::new(file));
                    }
                }
                RedirectOp::Write | RedirectOp::Append => {
                    let mode = if redirect.op == RedirectOp::Append {
                        OpenMode::Append
                    } else {
                        OpenMode::Write
                    };
                    let sink = Sink::File(Rc::new(self.open(&target, mode)?));
                    match redirect.fd {
                        1 => streams.stdout = sink,
                        2 => streams.stderr = sink,
                        _ => {}
                    }
                }
                RedirectOp::Duplicate => {
                    let sink = match target.as_str() {
                        "1" => streams.stdout.clone(),
                        "2" => streams.stderr.clone(),
                        _ => continue,
                    };
                    match redirect.fd {
                        1 => streams.stdout = sink,
                        2 => streams.stderr = sink,
                        _ => {}
                    }
                }
                RedirectOp::WriteBoth => {
                    let file = Rc::new(self.open(&target, OpenMode::Write)?);
                    streams.stdout = Sink::File(file.clone());
                    streams.stderr = Sink::File(file);
                }
            }
        }

        Ok(streams)
    }

    fn open(&self, target: &str, mode: OpenMode) -> ShellResult<File> {
        self.open_handler
            .open(&self.dir, target, mode)
            .map_err(|source| ShellError::Redirect {
                path: self.dir.join(target),
                source,
            })
    }

    pub(super) fn set_var(&mut self, name: &str, value: String) {
        if let Some(slot) = self.env.get_mut(name) {
            *slot = value;
        } else {
            self.locals.insert(name.to_string(), value);
        }
    }

    pub(super) fn export_var(&mut self, name: &str, value: Option<String>) {
        let value = value.or_else(|| self.locals.remove(name));
        self.locals.remove(name);
        if let Some(value) = value {
            self.env.insert(name.to_string(), value);
        }
    }

    pub(super) fn unset_var(&mut self, name: &str) {
        self.locals.remove(name);
        self.env.remove(name);
    }

    pub(super) fn set_dir(&mut self, dir: PathBuf) {
        self.env
            .insert("PWD".to_string(), dir.to_string_lossy().into_owned());
        self.dir = dir;
    }

    pub(super) fn mark_exited(&mut self) {
        self.exited = true;
    }
}

fn clone_file(file: &Rc<File>, command: &str) -> ShellResult<File> {
    file.try_clone().map_err(|source| ShellError::Spawn {
        command: command.to_string(),
        source,
    })
}

/// Write bytes produced for a stream to its destination
pub(super) fn write_sink(sink: &Sink, bytes: &[u8], buf: &mut Vec<u8>) {
    if bytes.is_empty() {
        return;
    }
    let result = match sink {
        Sink::Stdout => io::stdout().write_all(bytes),
        Sink::Stderr => io::stderr().write_all(bytes),
        Sink::Null => Ok(()),
        Sink::Capture => {
            buf.extend_from_slice(bytes);
            Ok(())
        }
        Sink::File(file) => (&**file).write_all(bytes),
    };
    if let Err(e) = result {
        tracing::trace!(error = %e, "failed to write shell output");
    }
}

impl Expand for Interpreter {
    fn lookup(&self, name: &str) -> Option<String> {
        if name == "?" {
            return Some(self.last_status.to_string());
        }
        self.var(name).map(str::to_string)
    }

    fn substitute(&mut self, script: &Script) -> ShellResult<String> {
        let streams = Streams {
            stdin: Source::Null,
            stdout: Sink::Capture,
            stderr: self.stderr.clone(),
        };
        let mut captured = Vec::new();
        self.subshell(|sub| {
            sub.exited = false;
            sub.run_list(script, &streams, &mut captured)
        })?;

        let mut text = String::from_utf8_lossy(&captured).into_owned();
        while text.ends_with('\n') {
            text.pop();
        }
        Ok(text)
    }

    fn cwd(&self) -> &Path {
        &self.dir
    }
}
