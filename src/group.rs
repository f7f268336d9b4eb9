use crate::attempt::run_attempt;
use crate::output::{AggregatingSink, LabelSink, LineSink, PlainSink};
use crate::supervisor::{ChildHandle, Supervisor};
use crate::task::{GroupPolicy, Task, TaskResult, KILLED_CODE};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Notify;
use tracing::info;

/// Fires once when the host process receives an interrupt; `is_set()` is
/// then durably true so subsequent poll points short-circuit immediately.
#[derive(Clone)]
pub struct CtrlC {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CtrlC {
    pub fn install() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        {
            let flag = flag.clone();
            let notify = notify.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("received interrupt, aborting current group");
                    flag.store(true, Ordering::SeqCst);
                    notify.notify_waiters();
                }
            });
        }
        Self { flag, notify }
    }

    /// A `CtrlC` that never fires; used in tests and library callers that
    /// manage their own cancellation.
    pub fn never() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Result of running one group to completion.
pub struct GroupOutcome {
    pub results: Vec<TaskResult>,
    pub failed: bool,
}

/// A task's output sink, plus the aggregator to flush once it completes
/// (when aggregate-output is active).
#[derive(Clone)]
struct TaskSink {
    run: Option<Arc<dyn LineSink>>,
    aggregator: Option<Arc<AggregatingSink>>,
}

impl TaskSink {
    async fn flush(&self) {
        if let Some(agg) = &self.aggregator {
            agg.flush().await;
        }
    }
}

/// Builds the line sink for one task given the group's output policy. Both
/// fields are `None` when neither labeling nor aggregation is requested, in
/// which case the attempt runner lets the child inherit stdio directly.
fn build_sink(task: &Task, policy: &GroupPolicy, width: usize) -> TaskSink {
    if !policy.print_label && !policy.aggregate_output {
        return TaskSink {
            run: None,
            aggregator: None,
        };
    }
    let base: Arc<dyn LineSink> = if policy.print_label {
        Arc::new(LabelSink::new(task.display_name.clone(), width, true))
    } else {
        Arc::new(PlainSink)
    };
    if policy.aggregate_output {
        let agg = Arc::new(AggregatingSink::new(base));
        TaskSink {
            run: Some(agg.clone() as Arc<dyn LineSink>),
            aggregator: Some(agg),
        }
    } else {
        TaskSink {
            run: Some(base),
            aggregator: None,
        }
    }
}

fn label_width(tasks: &[Task]) -> usize {
    tasks.iter().map(|t| t.display_name.len()).max().unwrap_or(0)
}

/// Runs tasks one after another. Stops before starting the next task once
/// one fails without `continue_on_error`; every task after that point is
/// reported with an undefined (`None`) code and zero retries.
pub async fn run_sequential(
    tasks: &[Task],
    policy: &GroupPolicy,
    supervisor: Arc<dyn Supervisor>,
    cwd: &Path,
    env: &HashMap<String, String>,
    ctrl_c: &CtrlC,
) -> GroupOutcome {
    let width = label_width(tasks);
    let aborted = Arc::new(AtomicBool::new(false));
    let mut results = Vec::with_capacity(tasks.len());
    let mut stop = false;

    for task in tasks {
        if stop || ctrl_c.is_set() {
            break;
        }

        let sink = build_sink(task, policy, width);
        let current_handle: Arc<StdMutex<Option<Arc<ChildHandle>>>> = Arc::new(StdMutex::new(None));
        let aborted_clone = aborted.clone();
        let ch_for_spawn = current_handle.clone();
        let sink_for_run = sink.run.clone();

        let attempt_fut = run_attempt(
            task,
            policy,
            supervisor.as_ref(),
            cwd,
            env,
            sink_for_run,
            aborted_clone,
            move |handle| {
                *ch_for_spawn.lock().unwrap() = Some(handle);
            },
        );
        tokio::pin!(attempt_fut);

        let result = loop {
            tokio::select! {
                res = &mut attempt_fut => break res,
                _ = ctrl_c.notified(), if !ctrl_c.is_set() => {}
            }
            if ctrl_c.is_set() {
                aborted.store(true, Ordering::SeqCst);
                if let Some(h) = current_handle.lock().unwrap().as_ref() {
                    h.abort();
                }
            }
        };

        sink.flush().await;

        let failed = result.code.is_some() && result.code != Some(0);
        results.push(result);
        if failed && !policy.continue_on_error {
            stop = true;
        }
    }

    for task in &tasks[results.len()..] {
        results.push(TaskResult::skipped(&task.display_name));
    }

    let failed = results
        .iter()
        .any(|r| r.code.is_some() && r.code != Some(0));
    GroupOutcome { results, failed }
}

struct TaskCompletion {
    index: usize,
    result: TaskResult,
}

/// Runs tasks under a bounded concurrency pool. `race` cancels the rest of
/// the group the moment any task succeeds; otherwise a failing task
/// without `continue_on_error` triggers the same abort. Pending tasks never
/// dequeued when the group aborts keep an undefined (`None`) code.
pub async fn run_parallel(
    tasks: &[Task],
    policy: &GroupPolicy,
    supervisor: Arc<dyn Supervisor>,
    cwd: &Path,
    env: &HashMap<String, String>,
    ctrl_c: &CtrlC,
) -> GroupOutcome {
    let width = label_width(tasks);
    let n = tasks.len();
    if n == 0 {
        return GroupOutcome {
            results: Vec::new(),
            failed: false,
        };
    }
    let cap = policy.concurrency_cap.unwrap_or(n).clamp(1, n);

    let aborted = Arc::new(AtomicBool::new(false));
    let registry: Arc<StdMutex<HashMap<usize, Arc<ChildHandle>>>> =
        Arc::new(StdMutex::new(HashMap::new()));
    let mut results: Vec<Option<TaskResult>> = (0..n).map(|_| None).collect();
    let mut queue: VecDeque<usize> = (0..n).collect();
    let mut in_flight = FuturesUnordered::new();

    let mut spawn_one = |idx: usize, in_flight: &mut FuturesUnordered<_>| {
        let task = tasks[idx].clone();
        let policy = policy.clone();
        let supervisor = supervisor.clone();
        let cwd = cwd.to_path_buf();
        let env = env.clone();
        let aborted = aborted.clone();
        let registry = registry.clone();
        let sink = build_sink(&task, &policy, width);
        let sink_for_run = sink.run.clone();

        in_flight.push(Box::pin(async move {
            let reg_for_spawn = registry.clone();
            let result = run_attempt(
                &task,
                &policy,
                supervisor.as_ref(),
                &cwd,
                &env,
                sink_for_run,
                aborted,
                move |handle| {
                    reg_for_spawn.lock().unwrap().insert(idx, handle);
                },
            )
            .await;
            sink.flush().await;
            registry.lock().unwrap().remove(&idx);
            TaskCompletion { index: idx, result }
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = TaskCompletion> + Send>>);
    };

    for _ in 0..cap {
        if let Some(idx) = queue.pop_front() {
            spawn_one(idx, &mut in_flight);
        }
    }

    loop {
        if in_flight.is_empty() {
            break;
        }
        tokio::select! {
            maybe = in_flight.next() => {
                let completion = maybe.expect("in_flight was non-empty");
                let TaskCompletion { index, result } = completion;
                let succeeded = result.code == Some(0);
                let failed = result.code.is_some() && result.code != Some(0);
                results[index] = Some(result);

                if !aborted.load(Ordering::SeqCst) {
                    if policy.race && succeeded {
                        aborted.store(true, Ordering::SeqCst);
                        for handle in registry.lock().unwrap().values() {
                            handle.abort();
                        }
                    } else if failed && !policy.continue_on_error {
                        aborted.store(true, Ordering::SeqCst);
                        for handle in registry.lock().unwrap().values() {
                            handle.abort();
                        }
                    } else if let Some(next_idx) = queue.pop_front() {
                        spawn_one(next_idx, &mut in_flight);
                    }
                }
            }
            _ = ctrl_c.notified(), if !ctrl_c.is_set() => {}
        }

        if ctrl_c.is_set() && !aborted.load(Ordering::SeqCst) {
            aborted.store(true, Ordering::SeqCst);
            for handle in registry.lock().unwrap().values() {
                handle.abort();
            }
        }
    }

    for (idx, slot) in results.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(TaskResult::skipped(&tasks[idx].display_name));
        }
    }
    let results: Vec<TaskResult> = results.into_iter().map(|r| r.expect("filled above")).collect();

    // A race winner's siblings are expected to come back killed — that's
    // not a failure. A genuine non-zero, non-killed code is, regardless of
    // whether some other task in the group happened to win the race.
    let failed = results
        .iter()
        .any(|r| matches!(r.code, Some(code) if code != 0 && code != KILLED_CODE));

    GroupOutcome { results, failed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{IoPolicy, SpawnedChild};
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct FakeSupervisor {
        exit_codes: Map<String, Vec<i32>>,
    }

    #[async_trait]
    impl Supervisor for FakeSupervisor {
        async fn start(
            &self,
            script_name: &str,
            _extra_args: &[String],
            _cwd: &Path,
            _env: &Map<String, String>,
            _io: IoPolicy,
        ) -> anyhow::Result<SpawnedChild> {
            use std::process::Stdio;
            use tokio::process::Command;

            static CALLS: once_counter::Counters = once_counter::Counters::new();
            let n = CALLS.next(script_name);
            let codes = self.exit_codes.get(script_name).cloned().unwrap_or_default();
            let code = codes.get(n).copied().unwrap_or(*codes.last().unwrap_or(&0));

            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(format!("exit {code}"))
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            let child = cmd.spawn().expect("spawn sh");
            let pid = child.id();
            Ok(SpawnedChild {
                handle: Arc::new(ChildHandle::new(child, pid)),
                stdout: None,
                stderr: None,
            })
        }
    }

    mod once_counter {
        use std::collections::HashMap;
        use std::sync::Mutex;

        pub struct Counters(Mutex<Option<HashMap<String, usize>>>);
        impl Counters {
            pub const fn new() -> Self {
                Self(Mutex::new(None))
            }
            pub fn next(&self, key: &str) -> usize {
                let mut guard = self.0.lock().unwrap();
                let map = guard.get_or_insert_with(HashMap::new);
                let entry = map.entry(key.to_string()).or_insert(0);
                let cur = *entry;
                *entry += 1;
                cur
            }
        }
    }

    #[tokio::test]
    async fn sequential_stops_after_first_failure_without_continue_on_error() {
        let mut codes = Map::new();
        codes.insert("a".to_string(), vec![0]);
        codes.insert("b".to_string(), vec![1]);
        codes.insert("c".to_string(), vec![0]);
        let supervisor: Arc<dyn Supervisor> = Arc::new(FakeSupervisor { exit_codes: codes });

        let tasks = vec![Task::new("a", "a"), Task::new("b", "b"), Task::new("c", "c")];
        let policy = GroupPolicy::default();
        let outcome = run_sequential(
            &tasks,
            &policy,
            supervisor,
            Path::new("."),
            &Map::new(),
            &CtrlC::never(),
        )
        .await;

        assert!(outcome.failed);
        assert_eq!(outcome.results[0].code, Some(0));
        assert_eq!(outcome.results[1].code, Some(1));
        assert_eq!(outcome.results[2].code, None);
        assert_eq!(outcome.results[2].retries, 0);
    }

    #[tokio::test]
    async fn sequential_continue_on_error_runs_every_task() {
        let mut codes = Map::new();
        codes.insert("a".to_string(), vec![0]);
        codes.insert("b".to_string(), vec![1]);
        codes.insert("c".to_string(), vec![0]);
        let supervisor: Arc<dyn Supervisor> = Arc::new(FakeSupervisor { exit_codes: codes });

        let tasks = vec![Task::new("a", "a"), Task::new("b", "b"), Task::new("c", "c")];
        let policy = GroupPolicy {
            continue_on_error: true,
            ..Default::default()
        };
        let outcome = run_sequential(
            &tasks,
            &policy,
            supervisor,
            Path::new("."),
            &Map::new(),
            &CtrlC::never(),
        )
        .await;

        assert!(outcome.failed);
        assert_eq!(outcome.results[0].code, Some(0));
        assert_eq!(outcome.results[1].code, Some(1));
        assert_eq!(outcome.results[2].code, Some(0));
    }

    #[tokio::test]
    async fn parallel_race_has_at_most_one_winner() {
        let mut codes = Map::new();
        codes.insert("slow-fail".to_string(), vec![1]);
        codes.insert("fast-ok".to_string(), vec![0]);
        let supervisor: Arc<dyn Supervisor> = Arc::new(FakeSupervisor { exit_codes: codes });

        let tasks = vec![Task::new("slow-fail", "slow-fail"), Task::new("fast-ok", "fast-ok")];
        let policy = GroupPolicy {
            parallel: true,
            race: true,
            ..Default::default()
        };
        let outcome = run_parallel(
            &tasks,
            &policy,
            supervisor,
            Path::new("."),
            &Map::new(),
            &CtrlC::never(),
        )
        .await;

        let winners = outcome.results.iter().filter(|r| r.code == Some(0)).count();
        assert!(winners <= 1);
        assert!(!outcome.failed || winners == 0);
    }

    #[tokio::test]
    async fn race_winner_does_not_hide_an_earlier_genuine_failure() {
        let mut codes = Map::new();
        codes.insert("bad".to_string(), vec![1]);
        codes.insert("winner".to_string(), vec![0]);
        let supervisor: Arc<dyn Supervisor> = Arc::new(FakeSupervisor { exit_codes: codes });

        let tasks = vec![Task::new("bad", "bad"), Task::new("winner", "winner")];
        let policy = GroupPolicy {
            parallel: true,
            race: true,
            continue_on_error: true,
            concurrency_cap: Some(1),
            ..Default::default()
        };
        let outcome = run_parallel(
            &tasks,
            &policy,
            supervisor,
            Path::new("."),
            &Map::new(),
            &CtrlC::never(),
        )
        .await;

        assert_eq!(outcome.results[0].code, Some(1));
        assert_eq!(outcome.results[1].code, Some(0));
        assert!(outcome.failed, "a genuine non-killed failure must still fail the group even when a later task wins the race");
    }

    #[tokio::test]
    async fn parallel_result_order_matches_input_order() {
        let mut codes = Map::new();
        codes.insert("a".to_string(), vec![0]);
        codes.insert("b".to_string(), vec![0]);
        codes.insert("c".to_string(), vec![0]);
        let supervisor: Arc<dyn Supervisor> = Arc::new(FakeSupervisor { exit_codes: codes });

        let tasks = vec![Task::new("a", "a"), Task::new("b", "b"), Task::new("c", "c")];
        let policy = GroupPolicy {
            parallel: true,
            ..Default::default()
        };
        let outcome = run_parallel(
            &tasks,
            &policy,
            supervisor,
            Path::new("."),
            &Map::new(),
            &CtrlC::never(),
        )
        .await;

        let names: Vec<&str> = outcome.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(!outcome.failed);
    }
}
