//! Core task model
//!
//! This module defines the data structures produced by evaluating a task script
//! and consumed by the runner and the cache.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

/// Name of the task reserved for (re)configuring a project
pub const RESERVED_TASK: &str = "configure";

/// Prefix of generated names for anonymous tasks
pub const ANONYMOUS_PREFIX: &str = "auto#";

/// A task declared by the task script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique short name
    pub name: String,

    /// Description shown in task listings
    pub description: String,

    /// Whether this task is listed and invocable by name
    pub visible: bool,

    /// Working directory for the task's commands
    pub base: PathBuf,

    /// Names of tasks that must run first
    pub deps: Vec<String>,

    /// Input patterns used for staleness checks
    pub inputs: Vec<String>,

    /// Output patterns used for staleness checks
    pub outputs: Vec<String>,

    /// Patterns which skip the task when all of them exist
    pub skip_if_exists: Vec<String>,

    /// Environment overrides for this task's commands
    pub env: BTreeMap<String, String>,

    /// Commands in execution order
    pub cmds: Vec<TaskCommand>,
}

/// A single entry in a task body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskCommand {
    /// Shell source, parsed when the task runs
    ShellScript(String),

    /// Another task executed in place
    TaskReference(Rc<Task>),
}

impl Task {
    /// Create an empty task with the given name and base directory
    pub fn new(name: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        Task {
            name: name.into(),
            description: String::new(),
            visible: true,
            base: base.into(),
            deps: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            skip_if_exists: Vec::new(),
            env: BTreeMap::new(),
            cmds: Vec::new(),
        }
    }

    /// Whether the task name was generated for an anonymous task
    pub fn is_anonymous(&self) -> bool {
        self.name.starts_with(ANONYMOUS_PREFIX)
    }

    /// Tasks embedded as commands
    pub fn sub_tasks(&self) -> impl Iterator<Item = &Rc<Task>> {
        self.cmds.iter().filter_map(|cmd| match cmd {
            TaskCommand::TaskReference(task) => Some(task),
            TaskCommand::ShellScript(_) => None,
        })
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Task {}: {}>", self.name, self.description)
    }
}

/// An option declared with `option()` during the init phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOption {
    pub name: String,
    pub default: String,
    pub help: String,
}

/// All visible tasks of one evaluation, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RegistryData", into = "RegistryData")]
pub struct TaskRegistry {
    tasks: Vec<Rc<Task>>,
    index: HashMap<String, usize>,
    env: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct RegistryData {
    tasks: Vec<Rc<Task>>,
    env: BTreeMap<String, String>,
}

impl TryFrom<RegistryData> for TaskRegistry {
    type Error = String;

    fn try_from(data: RegistryData) -> std::result::Result<Self, Self::Error> {
        let mut registry = TaskRegistry {
            env: data.env,
            ..TaskRegistry::default()
        };
        for task in data.tasks {
            registry
                .insert(task)
                .map_err(|t| format!("task \"{}\" is stored twice", t.name))?;
        }
        Ok(registry)
    }
}

impl From<TaskRegistry> for RegistryData {
    fn from(registry: TaskRegistry) -> Self {
        RegistryData {
            tasks: registry.tasks,
            env: registry.env,
        }
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Returns the task back if its name is already taken.
    pub fn insert(&mut self, task: Rc<Task>) -> std::result::Result<(), Rc<Task>> {
        if self.index.contains_key(&task.name) {
            return Err(task);
        }
        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Task>> {
        self.index.get(name).map(|idx| &self.tasks[*idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tasks in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Rc<Task>> {
        self.tasks.iter()
    }

    /// Task names in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Environment overrides collected during evaluation
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn set_env(&mut self, env: BTreeMap<String, String>) {
        self.env = env;
    }
}
