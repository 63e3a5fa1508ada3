//! Builtin commands
//!
//! These run inside the interpreter and may change its state, so they can
//! not go through the exec handler.

use crate::error::{ShellError, ShellResult};
use crate::shell::interp::{write_sink, Interpreter, Streams};
use std::path::{Component, Path, PathBuf};

pub(super) type Builtin = fn(&mut Interpreter, &[String], &Streams, &mut Vec<u8>) -> ShellResult<i32>;

/// Find the builtin named `name`
pub(super) fn lookup(name: &str) -> Option<Builtin> {
    let builtin: Builtin = match name {
        "cd" => cd,
        "pwd" => pwd,
        "echo" => echo,
        "true" | ":" => |_, _, _, _| Ok(0),
        "false" => |_, _, _, _| Ok(1),
        "exit" => exit,
        "export" => export,
        "unset" => unset,
        "test" => test,
        "[" => bracket,
        _ => return None,
    };
    Some(builtin)
}

fn fail(name: &str, message: &str, streams: &Streams, buf: &mut Vec<u8>, status: i32) -> ShellResult<i32> {
    let line = format!("{}: {}\n", name, message);
    write_sink(&streams.stderr, line.as_bytes(), buf);
    Ok(status)
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn cd(interp: &mut Interpreter, args: &[String], streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
    let target = match args.first() {
        Some(arg) => arg.clone(),
        None => match interp.var("HOME") {
            Some(home) => home.to_string(),
            None => return fail("cd", "HOME not set", streams, buf, 1),
        },
    };

    let dir = clean(&interp.dir().join(&target));
    if !dir.is_dir() {
        return fail("cd", &format!("{}: No such file or directory", target), streams, buf, 1);
    }
    interp.set_dir(dir);
    Ok(0)
}

fn pwd(interp: &mut Interpreter, _args: &[String], streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
    let line = format!("{}\n", interp.dir().display());
    write_sink(&streams.stdout, line.as_bytes(), buf);
    Ok(0)
}

fn echo(_interp: &mut Interpreter, args: &[String], streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
    let (newline, words) = match args.first() {
        Some(flag) if flag == "-n" => (false, &args[1..]),
        _ => (true, args),
    };
    let mut line = words.join(" ");
    if newline {
        line.push('\n');
    }
    write_sink(&streams.stdout, line.as_bytes(), buf);
    Ok(0)
}

fn exit(interp: &mut Interpreter, args: &[String], streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
    let code = match args.first() {
        None => interp.last_status(),
        Some(arg) => match arg.parse::<i32>() {
            Ok(code) => code,
            Err(_) => {
                fail("exit", &format!("{}: numeric argument required", arg), streams, buf, 2)?;
                2
            }
        },
    };
    interp.mark_exited();
    Err(ShellError::ExitStatus(code))
}

fn export(interp: &mut Interpreter, args: &[String], _streams: &Streams, _buf: &mut Vec<u8>) -> ShellResult<i32> {
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) => interp.export_var(name, Some(value.to_string())),
            None => interp.export_var(arg, None),
        }
    }
    Ok(0)
}

fn unset(interp: &mut Interpreter, args: &[String], _streams: &Streams, _buf: &mut Vec<u8>) -> ShellResult<i32> {
    for name in args {
        interp.unset_var(name);
    }
    Ok(0)
}

fn bracket(interp: &mut Interpreter, args: &[String], streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
    match args.split_last() {
        Some((last, rest)) if last == "]" => test(interp, rest, streams, buf),
        _ => fail("[", "missing ']'", streams, buf, 2),
    }
}

fn test(interp: &mut Interpreter, args: &[String], streams: &Streams, buf: &mut Vec<u8>) -> ShellResult<i32> {
    match evaluate(interp.dir(), args) {
        Some(true) => Ok(0),
        Some(false) => Ok(1),
        None => fail("test", "unsupported expression", streams, buf, 2),
    }
}

fn evaluate(dir: &Path, args: &[String]) -> Option<bool> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        [] => Some(false),
        ["!", rest @ ..] => {
            let owned: Vec<String> = rest.iter().map(|s| s.to_string()).collect();
            evaluate(dir, &owned).map(|result| !result)
        }
        [value] => Some(!value.is_empty()),
        [op, operand] => unary(dir, op, operand),
        [left, "=", right] => Some(left == right),
        [left, "!=", right] => Some(left != right),
        _ => None,
    }
}

fn unary(dir: &Path, op: &str, operand: &str) -> Option<bool> {
    let path = || dir.join(operand);
    match op {
        "-e" => Some(path().exists()),
        "-f" => Some(path().is_file()),
        "-d" => Some(path().is_dir()),
        "-z" => Some(operand.is_empty()),
        "-n" => Some(!operand.is_empty()),
        _ => None,
    }
}
