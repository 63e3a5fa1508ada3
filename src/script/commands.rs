//! Conversion of `cmds` entries into task commands
//!
//! Each entry is either shell source, a word list assembled into a single
//! shell command, or a task handle embedded as a sub-task.

use crate::config::TaskCommand;
use crate::script::paths::{relative_to, to_slash};
use crate::script::values::{ScriptPath, TaskHandle};
use crate::shell;
use regex::Regex;
use rhai::{Array, Dynamic};
use std::path::Path;

/// Build the command list of task `task_name` whose commands run in `base`
pub fn build_commands(task_name: &str, base: &Path, cmds: &Array) -> Result<Vec<TaskCommand>, String> {
    let assignment = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").map_err(|e| e.to_string())?;
    let mut result = Vec::with_capacity(cmds.len());

    for (idx, item) in cmds.iter().enumerate() {
        let name = format!("{}:{}", task_name, idx);

        let command = if let Ok(text) = item.clone().into_string() {
            shell::parse(&text, &name)
                .map_err(|e| format!("failed to parse command {}: {}", text, e))?;
            TaskCommand::ShellScript(text)
        } else if let Some(words) = item.clone().try_cast::<Array>() {
            let text = word_list_script(&assignment, base, &words)?;
            shell::parse(&text, &name)
                .map_err(|e| format!("failed to parse command {}: {}", text, e))?;
            TaskCommand::ShellScript(text)
        } else if let Some(handle) = item.clone().try_cast::<TaskHandle>() {
            TaskCommand::TaskReference(handle.0)
        } else {
            return Err(format!(
                "unexpected type {} in cmds, only strings, word lists and tasks are valid",
                item.type_name()
            ));
        };

        result.push(command);
    }

    Ok(result)
}

/// Assemble a word list passed to `execute` into shell source
pub fn word_list_command(base: &Path, words: &[Dynamic]) -> Result<String, String> {
    let assignment = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").map_err(|e| e.to_string())?;
    word_list_script(&assignment, base, words)
}

/// Assemble a word list into shell source.
///
/// Leading `NAME=value` strings become variable assignments. Every word is
/// quoted so it reaches the command verbatim. Absolute `path` values are made
/// relative to `base`.
fn word_list_script(assignment: &Regex, base: &Path, words: &[Dynamic]) -> Result<String, String> {
    if words.is_empty() {
        return Err("empty word list in cmds".to_string());
    }

    let mut parts = Vec::with_capacity(words.len());
    let mut in_prefix = true;

    for word in words {
        if let Ok(text) = word.clone().into_string() {
            if in_prefix && assignment.is_match(&text) {
                if let Some((name, value)) = text.split_once('=') {
                    parts.push(format!("{}={}", name, shell::quote(value)));
                    continue;
                }
            }
            in_prefix = false;
            parts.push(shell::quote(&text));
        } else if let Some(path) = word.clone().try_cast::<ScriptPath>() {
            in_prefix = false;
            let path = Path::new(&path.0);
            let shown = if path.is_absolute() {
                relative_to(base, path)
                    .map(|rel| to_slash(&rel))
                    .unwrap_or_else(|| to_slash(path))
            } else {
                to_slash(path)
            };
            parts.push(shell::quote(&shown));
        } else {
            return Err(format!(
                "found argument of type {} but only strings and paths are supported",
                word.type_name()
            ));
        }
    }

    Ok(parts.join(" "))
}
