use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;

pub use crate::task::KILLED_CODE;

/// How a spawned child's standard streams should be wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPolicy {
    /// Inherit the host process's stdio directly (no label/aggregate plumbing active).
    Inherit,
    /// Discard all stdio.
    Ignore,
    /// Pipe stdout/stderr back to the caller for label-prefixing or aggregation.
    Piped,
}

/// Outcome of waiting on one attempt's child process.
#[derive(Debug, Clone)]
pub struct WaitResult {
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub aborted: bool,
}

/// Spawns one script invocation, given a tool that, given a script name,
/// knows how to invoke it (here: the underlying script runner binary, e.g.
/// `npm`). The exact invocation mechanism is out of this crate's core
/// scope; `LocalSupervisor` below is the reference implementation.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn start(
        &self,
        script_name: &str,
        extra_args: &[String],
        cwd: &Path,
        env: &HashMap<String, String>,
        io: IoPolicy,
    ) -> anyhow::Result<SpawnedChild>;
}

/// A live child process plus any piped stdio streams taken at spawn time.
pub struct SpawnedChild {
    pub handle: Arc<ChildHandle>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// A handle to one child process subtree. `abort()` is idempotent and may be
/// called concurrently with an in-flight `wait()` from a different owner —
/// the group executor calls `abort()` while the attempt runner awaits
/// `wait()` on its own clone of the same `Arc<ChildHandle>`.
pub struct ChildHandle {
    child: AsyncMutex<Child>,
    pid: Option<u32>,
    aborted: Arc<AtomicBool>,
}

impl ChildHandle {
    pub(crate) fn new(child: Child, pid: Option<u32>) -> Self {
        Self {
            child: AsyncMutex::new(child),
            pid,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests termination of the entire process subtree. Idempotent.
    pub fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pid) = self.pid {
            kill_process_group(pid);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Completes when the child exits. If `abort()` was called, the result
    /// is normalized to the conventional killed code regardless of what
    /// signal was actually observed.
    pub async fn wait(&self) -> WaitResult {
        let mut guard = self.child.lock().await;
        if self.aborted.load(Ordering::SeqCst) {
            let _ = guard.start_kill();
        }
        let status = guard.wait().await;
        if self.aborted.load(Ordering::SeqCst) {
            return WaitResult {
                code: Some(KILLED_CODE),
                signal: Some("SIGTERM".to_string()),
                aborted: true,
            };
        }
        match status {
            Ok(status) => WaitResult {
                code: status.code(),
                signal: terminating_signal(&status),
                aborted: false,
            },
            Err(_) => WaitResult {
                code: Some(KILLED_CODE),
                signal: None,
                aborted: true,
            },
        }
    }
}

#[cfg(unix)]
fn terminating_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|s| format!("SIG{}", s))
}

#[cfg(not(unix))]
fn terminating_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
    // Best-effort direct kill in case the child never joined its own group
    // (e.g. it execve'd before the group was established).
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {
    // No portable tree-kill without a platform job-object API; direct
    // termination happens via `Child::start_kill` in `wait()`.
}

/// Runs scripts by shelling out to the script-runner tool the way `npm run
/// <script>` would — resolving a script name to its command line is that
/// tool's job, not this crate's (see spec.md §1's out-of-scope list).
/// `runner_path` overrides which binary plays that role (CLI `--npm-path`,
/// or the `npm_execpath` env convention); it defaults to `npm` on the host
/// `PATH`.
#[derive(Debug, Clone)]
pub struct LocalSupervisor {
    pub runner_path: Option<String>,
}

impl LocalSupervisor {
    pub fn new(runner_path: Option<String>) -> Self {
        Self { runner_path }
    }
}

#[async_trait]
impl Supervisor for LocalSupervisor {
    async fn start(
        &self,
        script_name: &str,
        extra_args: &[String],
        cwd: &Path,
        env: &HashMap<String, String>,
        io: IoPolicy,
    ) -> anyhow::Result<SpawnedChild> {
        let runner = self.runner_path.as_deref().unwrap_or("npm");
        let mut command = Command::new(runner);
        command.arg("run").arg(script_name);
        if !extra_args.is_empty() {
            command.arg("--").args(extra_args);
        }

        command.current_dir(cwd).envs(env).kill_on_drop(true);
        match io {
            IoPolicy::Inherit => {
                command
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            IoPolicy::Ignore => {
                command
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
            IoPolicy::Piped => {
                command
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn script '{}': {}", script_name, e))?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(SpawnedChild {
            handle: Arc::new(ChildHandle::new(child, pid)),
            stdout,
            stderr,
        })
    }
}
