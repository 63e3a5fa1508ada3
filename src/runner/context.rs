//! Options and bookkeeping for one run
//!
//! The run state tracks which tasks are in progress or finished so each task
//! runs at most once and cycles are detected.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Default threshold for the output spread warning
pub const DEFAULT_OUTPUT_SPREAD: Duration = Duration::from_secs(10 * 60);

/// Options controlling how tasks are run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Log commands without executing them
    pub dry_run: bool,

    /// Ignore skip-if-exists and staleness checks for the requested task
    pub force: bool,

    /// Warn when the outputs of a task are further apart than this
    pub output_spread_warning: Duration,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_output_spread_warning(mut self, threshold: Duration) -> Self {
        self.output_spread_warning = threshold;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            dry_run: false,
            force: false,
            output_spread_warning: DEFAULT_OUTPUT_SPREAD,
        }
    }
}

/// How a task finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The body ran
    Executed,
    /// Every skip-if-exists path exists
    Skipped,
    /// The outputs are newer than the inputs
    UpToDate,
    /// The body was only logged
    DryRun,
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TaskOutcome::Executed => "executed",
            TaskOutcome::Skipped => "skipped",
            TaskOutcome::UpToDate => "up to date",
            TaskOutcome::DryRun => "dry run",
        };
        f.write_str(text)
    }
}

/// What happened during one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Finished tasks in completion order
    pub outcomes: Vec<(String, TaskOutcome)>,

    /// Shell statements executed
    pub statements: usize,
}

impl RunReport {
    pub fn outcome(&self, task: &str) -> Option<TaskOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == task)
            .map(|(_, outcome)| *outcome)
    }

    /// Names of tasks whose body ran, in order
    pub fn executed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == TaskOutcome::Executed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Running,
    Done,
}

/// Progress of every task touched by one run
#[derive(Debug, Default)]
pub(crate) struct RunState {
    tasks: HashMap<String, TaskState>,
    pub report: RunReport,
}

impl RunState {
    pub fn state(&self, name: &str) -> Option<TaskState> {
        self.tasks.get(name).copied()
    }

    pub fn is_done(&self, name: &str) -> bool {
        self.state(name) == Some(TaskState::Done)
    }

    pub fn start(&mut self, name: &str) {
        self.tasks.insert(name.to_string(), TaskState::Running);
    }

    pub fn finish(&mut self, name: &str, outcome: TaskOutcome) {
        self.tasks.insert(name.to_string(), TaskState::Done);
        self.report.outcomes.push((name.to_string(), outcome));
    }

    /// Tasks left in progress; empty after a successful run
    pub fn running(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, state)| **state == TaskState::Running)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_options_builder() {
        let options = RunOptions::new()
            .with_dry_run(true)
            .with_force(true)
            .with_output_spread_warning(Duration::from_secs(5));

        assert!(options.dry_run);
        assert!(options.force);
        assert_eq!(options.output_spread_warning, Duration::from_secs(5));
        assert_eq!(RunOptions::default().output_spread_warning, DEFAULT_OUTPUT_SPREAD);
    }

    #[test]
    fn test_run_state() {
        let mut state = RunState::default();
        assert_eq!(state.state("a"), None);

        state.start("a");
        assert_eq!(state.state("a"), Some(TaskState::Running));
        assert_eq!(state.running(), vec!["a"]);

        state.finish("a", TaskOutcome::UpToDate);
        assert!(state.is_done("a"));
        assert!(state.running().is_empty());
        assert_eq!(state.report.outcome("a"), Some(TaskOutcome::UpToDate));
        assert!(state.report.executed().is_empty());
    }
}
