use crate::output::{pump_lines, LineSink, StreamKind};
use crate::supervisor::{ChildHandle, IoPolicy, Supervisor};
use crate::task::{GroupPolicy, Task, TaskResult, KILLED_CODE};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// RFC3339 timestamp attached to spawn/finish log events for cross-process
/// correlation (the wall-clock `durationMs` accounting itself uses the
/// monotonic `Instant` below, not this).
fn log_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Runs one task through its retry loop and reports the final `TaskResult`.
///
/// `on_spawn` fires with each attempt's child handle the moment it starts,
/// so the owning group can register it for abort forwarding. `aborted` is
/// observed before every attempt (including the first) and, per spec,
/// stops the loop before spawning another attempt — an attempt already
/// aborted mid-flight is reported with the killed code rather than
/// counting toward `retry_limit` exhaustion.
pub async fn run_attempt(
    task: &Task,
    policy: &GroupPolicy,
    supervisor: &dyn Supervisor,
    cwd: &Path,
    env: &HashMap<String, String>,
    sink: Option<Arc<dyn LineSink>>,
    aborted: Arc<AtomicBool>,
    mut on_spawn: impl FnMut(Arc<ChildHandle>),
) -> TaskResult {
    let start = Instant::now();
    let mut attempt_number: u32 = 0;

    if policy.print_name {
        println!("> {}", task.display_name);
    }

    loop {
        if aborted.load(Ordering::SeqCst) {
            return TaskResult {
                name: task.display_name.clone(),
                code: Some(KILLED_CODE),
                retries: attempt_number,
                duration_ms: elapsed_ms(start),
            };
        }

        let io = if sink.is_some() {
            IoPolicy::Piped
        } else {
            IoPolicy::Inherit
        };

        let spawned = match supervisor
            .start(&task.script_name, &task.extra_args, cwd, env, io)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!(task = %task.display_name, error = %e, "failed to spawn attempt");
                if attempt_number >= policy.retry_limit {
                    return TaskResult {
                        name: task.display_name.clone(),
                        code: Some(1),
                        retries: attempt_number,
                        duration_ms: elapsed_ms(start),
                    };
                }
                attempt_number += 1;
                continue;
            }
        };

        on_spawn(spawned.handle.clone());

        let mut pumps = Vec::new();
        if let (Some(sink), Some(stdout)) = (sink.clone(), spawned.stdout) {
            pumps.push(tokio::spawn(pump_lines(stdout, StreamKind::Stdout, sink)));
        }
        if let (Some(sink), Some(stderr)) = (sink.clone(), spawned.stderr) {
            pumps.push(tokio::spawn(pump_lines(stderr, StreamKind::Stderr, sink)));
        }

        let result = spawned.handle.wait().await;
        for pump in pumps {
            let _ = pump.await;
        }

        debug!(
            task = %task.display_name,
            attempt = attempt_number,
            code = ?result.code,
            at = %log_timestamp(),
            "attempt finished"
        );

        if result.aborted {
            return TaskResult {
                name: task.display_name.clone(),
                code: Some(KILLED_CODE),
                retries: attempt_number,
                duration_ms: elapsed_ms(start),
            };
        }

        if result.code == Some(0) {
            return TaskResult {
                name: task.display_name.clone(),
                code: Some(0),
                retries: attempt_number,
                duration_ms: elapsed_ms(start),
            };
        }

        if attempt_number >= policy.retry_limit {
            return TaskResult {
                name: task.display_name.clone(),
                code: result.code,
                retries: attempt_number,
                duration_ms: elapsed_ms(start),
            };
        }
        attempt_number += 1;
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::SpawnedChild;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fake supervisor whose attempts succeed only after `fail_until`
    /// attempts have been reported as failed.
    struct ScriptedSupervisor {
        calls: AtomicU32,
        fail_until: u32,
        exit_code_on_fail: i32,
    }

    #[async_trait]
    impl Supervisor for ScriptedSupervisor {
        async fn start(
            &self,
            _script_name: &str,
            _extra_args: &[String],
            _cwd: &Path,
            _env: &HashMap<String, String>,
            _io: IoPolicy,
        ) -> anyhow::Result<SpawnedChild> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let code = if n < self.fail_until {
                self.exit_code_on_fail
            } else {
                0
            };
            Ok(fake_spawned_child(code))
        }
    }

    fn fake_spawned_child(code: i32) -> SpawnedChild {
        use std::process::Stdio;
        use tokio::process::Command;
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("exit {code}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd.spawn().expect("spawn sh");
        let pid = child.id();
        SpawnedChild {
            handle: Arc::new(crate::supervisor::ChildHandle::new(child, pid)),
            stdout: None,
            stderr: None,
        }
    }

    #[tokio::test]
    async fn succeeds_first_try_reports_zero_retries() {
        let supervisor = ScriptedSupervisor {
            calls: AtomicU32::new(0),
            fail_until: 0,
            exit_code_on_fail: 1,
        };
        let task = Task::new("ok", "ok");
        let policy = GroupPolicy {
            retry_limit: 3,
            ..Default::default()
        };
        let result = run_attempt(
            &task,
            &policy,
            &supervisor,
            Path::new("."),
            &HashMap::new(),
            None,
            Arc::new(AtomicBool::new(false)),
            |_| {},
        )
        .await;
        assert_eq!(result.code, Some(0));
        assert_eq!(result.retries, 0);
    }

    #[tokio::test]
    async fn retries_until_success_within_limit() {
        let supervisor = ScriptedSupervisor {
            calls: AtomicU32::new(0),
            fail_until: 2,
            exit_code_on_fail: 1,
        };
        let task = Task::new("flaky", "flaky");
        let policy = GroupPolicy {
            retry_limit: 5,
            ..Default::default()
        };
        let result = run_attempt(
            &task,
            &policy,
            &supervisor,
            Path::new("."),
            &HashMap::new(),
            None,
            Arc::new(AtomicBool::new(false)),
            |_| {},
        )
        .await;
        assert_eq!(result.code, Some(0));
        assert_eq!(result.retries, 2);
    }

    #[tokio::test]
    async fn exhausts_retry_limit_and_reports_last_code() {
        let supervisor = ScriptedSupervisor {
            calls: AtomicU32::new(0),
            fail_until: 100,
            exit_code_on_fail: 1,
        };
        let task = Task::new("always-fails", "always-fails");
        let policy = GroupPolicy {
            retry_limit: 5,
            ..Default::default()
        };
        let result = run_attempt(
            &task,
            &policy,
            &supervisor,
            Path::new("."),
            &HashMap::new(),
            None,
            Arc::new(AtomicBool::new(false)),
            |_| {},
        )
        .await;
        assert_eq!(result.code, Some(1));
        assert_eq!(result.retries, 5);
        assert_eq!(supervisor.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn observes_abort_before_spawning_next_attempt() {
        let supervisor = ScriptedSupervisor {
            calls: AtomicU32::new(0),
            fail_until: 100,
            exit_code_on_fail: 1,
        };
        let task = Task::new("flaky", "flaky");
        let policy = GroupPolicy {
            retry_limit: 5,
            ..Default::default()
        };
        let aborted = Arc::new(AtomicBool::new(true));
        let result = run_attempt(
            &task,
            &policy,
            &supervisor,
            Path::new("."),
            &HashMap::new(),
            None,
            aborted,
            |_| {},
        )
        .await;
        assert_eq!(result.code, Some(KILLED_CODE));
        assert_eq!(result.retries, 0);
        assert_eq!(supervisor.calls.load(Ordering::SeqCst), 0);
    }
}
