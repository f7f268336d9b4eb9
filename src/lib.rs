pub mod attempt;
pub mod cli;
pub mod config;
pub mod error;
pub mod group;
pub mod manifest;
pub mod output;
pub mod pattern;
pub mod pipeline;
pub mod placeholder;
pub mod summary;
pub mod supervisor;
pub mod task;

use cli::{CliOutcome, DefaultMode, Invocation};
use error::{EngineError, Result};
use group::CtrlC;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use supervisor::{LocalSupervisor, Supervisor};
use task::{Task, TaskResult};

/// Initializes the `tracing` subscriber once, at process start. `silent`
/// lowers the max level instead of special-casing every log call site —
/// the same effect `--silent`/`loglevel=silent` has on engine log writes.
pub fn init_logging(silent: bool) {
    use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};
    let level = if silent { LevelFilter::ERROR } else { LevelFilter::INFO };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(level)
        .try_init();
}

/// Drives one process invocation end to end: parses argv, reads the
/// manifest, expands patterns (with placeholder substitution) into
/// concrete tasks, runs the pipeline, optionally prints the summary table,
/// and returns the process exit code (0 on full success, 1 on any
/// failure), per spec.md §6.
pub async fn run(default_mode: DefaultMode) -> anyhow::Result<i32> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let env_config = config::EnvConfig::from_env();

    let invocation = match cli::parse(&raw_args, default_mode) {
        Ok(CliOutcome::Help(text)) => {
            println!("{text}");
            return Ok(0);
        }
        Ok(CliOutcome::Version(v)) => {
            println!("{v}");
            return Ok(0);
        }
        Ok(CliOutcome::Run(inv)) => inv,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return Ok(1);
        }
    };

    let silent = invocation.silent || env_config.silent;
    let print_summary = invocation.print_summary;
    let cwd = std::env::current_dir()?;

    match run_invocation(invocation, &env_config, &cwd).await {
        Ok(results) => {
            if print_summary {
                println!("{}", summary::render(&results, !silent));
            }
            Ok(0)
        }
        Err(EngineError::TaskFailure { results }) => {
            if print_summary {
                println!("{}", summary::render(&results, !silent));
            }
            if !silent {
                let failed = results.iter().filter(|r| r.code != Some(0)).count();
                eprintln!("ERROR: {failed} of {} task(s) failed", results.len());
            }
            Ok(1)
        }
        Err(e) => {
            if !silent {
                eprintln!("ERROR: {e}");
            }
            Ok(1)
        }
    }
}

/// The library entry point: validation errors (bad patterns, bad options,
/// missing manifest, bad placeholders) short-circuit before any child is
/// spawned, per spec.md §7.
async fn run_invocation(
    invocation: Invocation,
    env_config: &config::EnvConfig,
    cwd: &Path,
) -> Result<Vec<TaskResult>> {
    let (_manifest, order) = manifest::load_manifest(cwd)?;

    let mut defaults: HashMap<usize, String> = HashMap::new();
    let mut pipeline_groups = Vec::with_capacity(invocation.groups.len());

    for group in &invocation.groups {
        group.policy.validate()?;

        let expanded_patterns = group
            .patterns
            .iter()
            .map(|p| placeholder::expand(p, &invocation.extra_args, &mut defaults))
            .collect::<Result<Vec<String>>>()?;

        let tasks: Vec<Task> = pattern::expand(&expanded_patterns, &order)?;

        pipeline_groups.push(pipeline::GroupSpec {
            policy: group.policy.clone(),
            tasks,
        });
    }

    let env = build_child_env(&invocation, env_config);
    let runner_path = invocation
        .npm_path
        .clone()
        .or_else(|| env_config.runner_path.clone());
    let supervisor: Arc<dyn Supervisor> = Arc::new(LocalSupervisor::new(runner_path));
    let ctrl_c = CtrlC::install();

    pipeline::run_pipeline(&pipeline_groups, supervisor, cwd, &env, &ctrl_c).await
}

/// Builds the environment handed to every child process: `--KEY=VALUE` run
/// vars are exposed verbatim, and `--PKG:VAR=VALUE`/env-sourced
/// package-scoped vars are exposed as `PKG_config_VAR`, matching the
/// convention `config::EnvConfig` reads back on the next invocation.
fn build_child_env(
    invocation: &Invocation,
    env_config: &config::EnvConfig,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = invocation.run_vars.clone();

    let mut package_vars = env_config.package_vars.clone();
    for (pkg, vars) in &invocation.package_vars {
        package_vars.entry(pkg.clone()).or_default().extend(vars.clone());
    }
    for (pkg, vars) in &package_vars {
        for (var, value) in vars {
            env.insert(format!("{pkg}_config_{var}"), value.clone());
        }
    }

    env
}
