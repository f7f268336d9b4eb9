/// Killed code used for attempts aborted by the engine (group teardown, race
/// loss, external signal). Never the natural exit code of a child process
/// that simply returned 130 on its own — the engine assigns it by
/// convention on abort, per the supervisor contract.
pub const KILLED_CODE: i32 = 130;

/// One scheduled invocation of a script, with arguments.
///
/// `display_name` preserves the original pattern segment as typed (including
/// any inline arguments) and is what appears in summaries. `script_name` is
/// what the child supervisor is asked to invoke.
#[derive(Debug, Clone)]
pub struct Task {
    pub display_name: String,
    pub script_name: String,
    pub extra_args: Vec<String>,
}

impl Task {
    pub fn new(display_name: impl Into<String>, script_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            script_name: script_name.into(),
            extra_args: Vec::new(),
        }
    }
}

/// Per-group effective settings.
#[derive(Debug, Clone)]
pub struct GroupPolicy {
    pub parallel: bool,
    /// `None` means unlimited (treated as `tasks.len()` at run time).
    pub concurrency_cap: Option<usize>,
    pub race: bool,
    pub continue_on_error: bool,
    pub aggregate_output: bool,
    pub print_label: bool,
    pub print_name: bool,
    pub silent: bool,
    pub retry_limit: u32,
}

impl Default for GroupPolicy {
    fn default() -> Self {
        Self {
            parallel: false,
            concurrency_cap: None,
            race: false,
            continue_on_error: false,
            aggregate_output: false,
            print_label: false,
            print_name: false,
            silent: false,
            retry_limit: 0,
        }
    }
}

impl GroupPolicy {
    /// Validates cross-flag constraints that do not depend on the task list.
    /// `race`/`aggregate_output` only make sense on a parallel group.
    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        if !self.parallel && self.race {
            return Err(crate::error::EngineError::InvalidOption(
                "--race (parallel only)".to_string(),
            ));
        }
        if !self.parallel && self.aggregate_output {
            return Err(crate::error::EngineError::InvalidOption(
                "--aggregate-output (parallel only)".to_string(),
            ));
        }
        if !self.parallel && self.concurrency_cap.is_some() {
            return Err(crate::error::EngineError::InvalidOption(
                "--max-parallel (parallel only)".to_string(),
            ));
        }
        Ok(())
    }
}

/// One child-process execution of a task.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub task_index: usize,
    pub attempt_number: u32,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
}

/// The final, per-task outcome reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub name: String,
    /// `None` represents the spec's "undefined" code: a sequential task
    /// never started because an earlier task failed without
    /// continue-on-error.
    pub code: Option<i32>,
    pub retries: u32,
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
            retries: 0,
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    pub fn killed(&self) -> bool {
        self.code == Some(KILLED_CODE)
    }
}
