//! Task declaration validation
//!
//! Checks applied while tasks are registered and once the whole registry is known.

use crate::config::types::{Task, TaskRegistry, RESERVED_TASK};
use std::collections::HashSet;

/// Problems that make a task declaration invalid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationIssue {
    /// The name is reserved for the configure step
    ReservedName,

    /// Another task, hidden or visible, already uses the name
    DuplicateName,
}

impl DeclarationIssue {
    pub fn describe(&self, name: &str) -> String {
        match self {
            DeclarationIssue::ReservedName => {
                format!("task name \"{}\" is reserved for the configure step", name)
            }
            DeclarationIssue::DuplicateName => format!("task \"{}\" is declared twice", name),
        }
    }
}

/// Validate a task against the names declared before it
pub fn validate_declaration(task: &Task, names: &HashSet<String>) -> Result<(), DeclarationIssue> {
    if task.name == RESERVED_TASK {
        return Err(DeclarationIssue::ReservedName);
    }

    if names.contains(&task.name) {
        return Err(DeclarationIssue::DuplicateName);
    }

    Ok(())
}

/// Find dependency names that do not resolve within the registry.
///
/// Embedded sub-tasks are checked as well. Each `(task, dependency)` pair is
/// reported once.
pub fn unknown_dependencies(registry: &TaskRegistry) -> Vec<(String, String)> {
    let mut missing = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<&Task> = registry.iter().map(|t| t.as_ref()).collect();

    while let Some(task) = stack.pop() {
        if !seen.insert(task.name.as_str()) {
            continue;
        }

        for dep in &task.deps {
            if !registry.contains(dep) {
                missing.push((task.name.clone(), dep.clone()));
            }
        }

        stack.extend(task.sub_tasks().map(|t| t.as_ref()));
    }

    missing.sort();
    missing
}
