//! Process execution and file opening hooks
//!
//! The interpreter never spawns processes or opens redirect targets itself. It
//! goes through an [`ExecHandler`] and an [`OpenHandler`] so callers can swap
//! the behaviour out, for example to record commands in tests.

use crate::error::{ShellError, ShellResult};
use crate::posix;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::thread;
use tracing::trace;

/// Exit status reported when a command cannot be found
pub const STATUS_NOT_FOUND: i32 = 127;

/// Where a command reads its standard input from
#[derive(Debug, Default)]
pub enum Input {
    #[default]
    Null,
    Inherit,
    Bytes(Vec<u8>),
    File(File),
}

/// Where a command writes one of its output streams
#[derive(Debug)]
pub enum Output {
    Inherit,
    Null,
    Capture,
    File(File),
}

/// Standard streams handed to an [`ExecHandler`]
#[derive(Debug)]
pub struct ExecIo {
    pub stdin: Input,
    pub stdout: Output,
    pub stderr: Output,
}

impl Default for ExecIo {
    fn default() -> Self {
        ExecIo {
            stdin: Input::Null,
            stdout: Output::Inherit,
            stderr: Output::Inherit,
        }
    }
}

impl ExecIo {
    /// Deliver output produced in-process to the requested streams
    pub fn finish(self, status: i32, stdout: &[u8], stderr: &[u8]) -> ExecOutcome {
        let mut outcome = ExecOutcome {
            status,
            ..ExecOutcome::default()
        };
        deliver(self.stdout, stdout, &mut outcome.stdout, false);
        deliver(self.stderr, stderr, &mut outcome.stderr, true);
        outcome
    }
}

fn deliver(output: Output, bytes: &[u8], captured: &mut Vec<u8>, is_stderr: bool) {
    if bytes.is_empty() {
        return;
    }
    let result = match output {
        Output::Inherit if is_stderr => io::stderr().write_all(bytes),
        Output::Inherit => io::stdout().write_all(bytes),
        Output::Null => Ok(()),
        Output::Capture => {
            captured.extend_from_slice(bytes);
            Ok(())
        }
        Output::File(mut file) => file.write_all(bytes),
    };
    if let Err(e) = result {
        trace!(error = %e, "failed to write command output");
    }
}

/// Result of running one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub status: i32,
    /// Standard output, when it was requested as [`Output::Capture`]
    pub stdout: Vec<u8>,
    /// Standard error, when it was requested as [`Output::Capture`]
    pub stderr: Vec<u8>,
}

/// Environment a command runs in
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    pub dir: &'a Path,
    pub env: &'a BTreeMap<String, String>,
}

/// Runs commands that are not shell builtins
pub trait ExecHandler {
    fn exec(&self, ctx: &ExecContext<'_>, args: &[String], io: ExecIo) -> ShellResult<ExecOutcome>;
}

/// Spawns commands as child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExecHandler;

impl ExecHandler for DefaultExecHandler {
    fn exec(&self, ctx: &ExecContext<'_>, args: &[String], io: ExecIo) -> ShellResult<ExecOutcome> {
        let (program, rest) = match args.split_first() {
            Some(split) => split,
            None => return Ok(io.finish(0, &[], &[])),
        };

        let mut command = Command::new(program);
        command
            .args(rest)
            .current_dir(ctx.dir)
            .env_clear()
            .envs(ctx.env);

        let mut feed = None;
        command.stdin(match io.stdin {
            Input::Null => Stdio::null(),
            Input::Inherit => Stdio::inherit(),
            Input::Bytes(bytes) => {
                feed = Some(bytes);
                Stdio::piped()
            }
            Input::File(file) => Stdio::from(file),
        });

        let stderr_captured = matches!(io.stderr, Output::Capture);
        command.stdout(to_stdio(io.stdout));
        command.stderr(to_stdio(io.stderr));

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let message = format!("{}: command not found\n", program);
                let mut outcome = ExecOutcome {
                    status: STATUS_NOT_FOUND,
                    ..ExecOutcome::default()
                };
                if stderr_captured {
                    outcome.stderr = message.into_bytes();
                } else {
                    let _ = io::stderr().write_all(message.as_bytes());
                }
                return Ok(outcome);
            }
            Err(source) => {
                return Err(ShellError::Spawn {
                    command: program.clone(),
                    source,
                })
            }
        };

        let writer = match (feed, child.stdin.take()) {
            (Some(bytes), Some(mut stdin)) => Some(thread::spawn(move || {
                // The child may exit without reading everything
                let _ = stdin.write_all(&bytes);
            })),
            _ => None,
        };

        let mut outcome = ExecOutcome::default();
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                buf
            })
        });
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_end(&mut outcome.stdout)
                .map_err(|source| ShellError::Spawn {
                    command: program.clone(),
                    source,
                })?;
        }
        if let Some(handle) = stderr_reader {
            outcome.stderr = handle.join().unwrap_or_default();
        }

        let status = child.wait().map_err(|source| ShellError::Spawn {
            command: program.clone(),
            source,
        })?;
        if let Some(handle) = writer {
            let _ = handle.join();
        }

        outcome.status = exit_code(status);
        Ok(outcome)
    }
}

fn to_stdio(output: Output) -> Stdio {
    match output {
        Output::Inherit => Stdio::inherit(),
        Output::Null => Stdio::null(),
        Output::Capture => Stdio::piped(),
        Output::File(file) => Stdio::from(file),
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Routes the file utilities `mv`, `rm` and `mkdir` to portable in-process
/// implementations and everything else to `inner`
#[derive(Clone)]
pub struct EngineExecHandler {
    inner: Rc<dyn ExecHandler>,
}

impl EngineExecHandler {
    pub fn new(inner: Rc<dyn ExecHandler>) -> Self {
        EngineExecHandler { inner }
    }
}

impl Default for EngineExecHandler {
    fn default() -> Self {
        EngineExecHandler::new(Rc::new(DefaultExecHandler))
    }
}

impl ExecHandler for EngineExecHandler {
    fn exec(&self, ctx: &ExecContext<'_>, args: &[String], io: ExecIo) -> ShellResult<ExecOutcome> {
        if let Some((name, rest)) = args.split_first() {
            if let Some(result) = posix::run(name, ctx.dir, rest) {
                return Ok(match result {
                    Ok(()) => io.finish(0, &[], &[]),
                    Err(message) => {
                        let line = format!("{}: {}\n", name, message);
                        io.finish(1, &[], line.as_bytes())
                    }
                });
            }
        }
        self.inner.exec(ctx, args, io)
    }
}

/// How a redirect target is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// Opens redirect targets
pub trait OpenHandler {
    fn open(&self, dir: &Path, path: &str, mode: OpenMode) -> io::Result<File>;
}

/// Opens files on the local filesystem relative to the working directory
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOpenHandler;

impl DefaultOpenHandler {
    fn resolve(dir: &Path, path: &str) -> PathBuf {
        if cfg!(windows) && path == "/dev/null" {
            return PathBuf::from("NUL");
        }
        dir.join(path)
    }
}

impl OpenHandler for DefaultOpenHandler {
    fn open(&self, dir: &Path, path: &str, mode: OpenMode) -> io::Result<File> {
        let target = Self::resolve(dir, path);
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
        };
        options.open(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env() -> BTreeMap<String, String> {
        std::env::vars().collect()
    }

    #[test]
    fn test_finish_captures_requested_streams() {
        let io = ExecIo {
            stdin: Input::Null,
            stdout: Output::Capture,
            stderr: Output::Null,
        };
        let outcome = io.finish(3, b"out", b"err");
        assert_eq!(outcome.status, 3);
        assert_eq!(outcome.stdout, b"out");
        assert!(outcome.stderr.is_empty());
    }

    #[test]
    fn test_missing_command_reports_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let env = env();
        let ctx = ExecContext {
            dir: temp_dir.path(),
            env: &env,
        };
        let io = ExecIo {
            stderr: Output::Capture,
            ..ExecIo::default()
        };
        let args = vec!["definitely-not-a-real-command-xyz".to_string()];

        let outcome = DefaultExecHandler.exec(&ctx, &args, io).unwrap();
        assert_eq!(outcome.status, STATUS_NOT_FOUND);
        assert!(String::from_utf8_lossy(&outcome.stderr).contains("command not found"));
    }

    #[test]
    fn test_engine_handler_runs_mkdir_in_process() {
        let temp_dir = TempDir::new().unwrap();
        let env = BTreeMap::new();
        let ctx = ExecContext {
            dir: temp_dir.path(),
            env: &env,
        };
        let args = vec!["mkdir".to_string(), "-p".to_string(), "a/b".to_string()];

        let outcome = EngineExecHandler::default()
            .exec(&ctx, &args, ExecIo::default())
            .unwrap();
        assert_eq!(outcome.status, 0);
        assert!(temp_dir.path().join("a/b").is_dir());
    }

    #[test]
    fn test_engine_handler_reports_shim_failure() {
        let temp_dir = TempDir::new().unwrap();
        let env = BTreeMap::new();
        let ctx = ExecContext {
            dir: temp_dir.path(),
            env: &env,
        };
        let io = ExecIo {
            stderr: Output::Capture,
            ..ExecIo::default()
        };
        let args = vec!["rm".to_string(), "missing.txt".to_string()];

        let outcome = EngineExecHandler::default().exec(&ctx, &args, io).unwrap();
        assert_eq!(outcome.status, 1);
        assert!(String::from_utf8_lossy(&outcome.stderr).starts_with("rm: "));
    }

    #[test]
    fn test_open_handler_modes() {
        let temp_dir = TempDir::new().unwrap();
        let handler = DefaultOpenHandler;

        let mut file = handler.open(temp_dir.path(), "log.txt", OpenMode::Write).unwrap();
        file.write_all(b"one\n").unwrap();
        let mut file = handler.open(temp_dir.path(), "log.txt", OpenMode::Append).unwrap();
        file.write_all(b"two\n").unwrap();

        let mut content = String::new();
        handler
            .open(temp_dir.path(), "log.txt", OpenMode::Read)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "one\ntwo\n");
    }
}
