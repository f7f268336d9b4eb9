use crate::error::{EngineError, Result};
use crate::group::{run_parallel, run_sequential, CtrlC};
use crate::supervisor::Supervisor;
use crate::task::{GroupPolicy, Task, TaskResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One group ready to run: a policy plus its concrete, already-expanded
/// task list (patterns have already been turned into tasks by this point).
pub struct GroupSpec {
    pub policy: GroupPolicy,
    pub tasks: Vec<Task>,
}

/// Iterates the ordered group list, short-circuiting after a group fails
/// unless that group's own `continue_on_error` is set — there is no
/// separate driver-level flag; a failing group either lets the pipeline
/// proceed (its own policy said so) or stops it, and either way every
/// group's tasks appear exactly once in the returned/attached result list.
pub async fn run_pipeline(
    groups: &[GroupSpec],
    supervisor: Arc<dyn Supervisor>,
    cwd: &Path,
    env: &HashMap<String, String>,
    ctrl_c: &CtrlC,
) -> Result<Vec<TaskResult>> {
    let mut all_results = Vec::new();
    let mut failed = false;
    let mut stop = false;

    for group in groups {
        if stop || ctrl_c.is_set() {
            all_results.extend(group.tasks.iter().map(|t| TaskResult::skipped(&t.display_name)));
            continue;
        }

        let outcome = if group.policy.parallel {
            run_parallel(&group.tasks, &group.policy, supervisor.clone(), cwd, env, ctrl_c).await
        } else {
            run_sequential(&group.tasks, &group.policy, supervisor.clone(), cwd, env, ctrl_c).await
        };

        if outcome.failed {
            failed = true;
            if !group.policy.continue_on_error {
                stop = true;
            }
        }
        all_results.extend(outcome.results);
    }

    if failed {
        Err(EngineError::TaskFailure { results: all_results })
    } else {
        Ok(all_results)
    }
}
