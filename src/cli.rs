use crate::error::{EngineError, Result};
use crate::task::GroupPolicy;
use std::collections::HashMap;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const HELP: &str = "\
taskrunner [options] [--] <pattern>...

Runs named scripts from the local package manifest, sequentially or in
parallel, with retries and a final summary.

  -s, --sequential, --serial   start a new sequential group
  -p, --parallel               start a new parallel group
  -c, --continue-on-error      don't stop the group on a failing task
  -l, --print-label            prefix each line of output with [task-name]
  -n, --print-name             print a header line before each task
  -r, --race                   (parallel only) first success wins, abort the rest
      --max-parallel N         (parallel only) concurrency cap
      --aggregate-output       (parallel only) buffer each task's output, flush on completion
      --silent                 suppress engine log lines
      --retry N                retry a failing task up to N additional times (N > 0)
      --print-summary, --summary
                               print the final results table
      --npm-path P             override the script-runner binary
      --KEY=VALUE              expose a run-time config variable to child scripts
      --PKG:VAR=VALUE          overwrite a package-scoped config variable
      --PKG:VAR VALUE          same, two-token form
  -h, --help                   print this help and exit
  -v, --version                print the version and exit
      --                       end of flags; remaining tokens are passed to child scripts
";

/// Which policy an invocation's first (not-yet-`-s`/`-p`-qualified) group
/// starts with. The three historical entry points (general runner,
/// sequential-only runner, parallel-only runner) differ only in this
/// default — they share one parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultMode {
    Sequential,
    Parallel,
}

/// One `-s`/`-p`-delimited section of the command line: a policy plus the
/// raw (pre-placeholder-expansion, pre-pattern-expansion) pattern strings
/// that belong to it.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub policy: GroupPolicy,
    pub patterns: Vec<String>,
}

/// The fully parsed command line, before the manifest is consulted.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub groups: Vec<GroupSpec>,
    /// Tokens after `--`: positional arguments available to `{1}`/`{@}`/`{*}`
    /// placeholder expansion in patterns.
    pub extra_args: Vec<String>,
    pub run_vars: HashMap<String, String>,
    pub package_vars: HashMap<String, HashMap<String, String>>,
    pub print_summary: bool,
    pub npm_path: Option<String>,
    pub silent: bool,
}

pub enum CliOutcome {
    Help(&'static str),
    Version(&'static str),
    Run(Invocation),
}

/// Parses `argv` (without the program name) into a [`CliOutcome`].
pub fn parse(raw_args: &[String], default_mode: DefaultMode) -> Result<CliOutcome> {
    let args = expand_clustered_flags(raw_args);

    let mut groups: Vec<GroupSpec> = Vec::new();
    let mut current = GroupSpec {
        policy: default_policy(default_mode),
        patterns: Vec::new(),
    };
    let mut extra_args = Vec::new();
    let mut run_vars = HashMap::new();
    let mut package_vars: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut print_summary = false;
    let mut npm_path = None;
    let mut silent = false;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--" => {
                extra_args.extend(args[i + 1..].iter().cloned());
                break;
            }
            "-h" | "--help" => return Ok(CliOutcome::Help(HELP)),
            "-v" | "--version" => return Ok(CliOutcome::Version(VERSION)),
            "-s" | "--sequential" | "--serial" => {
                start_group(&mut groups, &mut current, false);
            }
            "-p" | "--parallel" => {
                start_group(&mut groups, &mut current, true);
            }
            "-c" | "--continue-on-error" => current.policy.continue_on_error = true,
            "-l" | "--print-label" => current.policy.print_label = true,
            "-n" | "--print-name" => current.policy.print_name = true,
            "-r" | "--race" => current.policy.race = true,
            "--aggregate-output" => current.policy.aggregate_output = true,
            "--silent" => {
                current.policy.silent = true;
                silent = true;
            }
            "--print-summary" | "--summary" => print_summary = true,
            "--max-parallel" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| EngineError::InvalidOption("--max-parallel".to_string()))?;
                let n: usize = val
                    .parse()
                    .map_err(|_| EngineError::InvalidOption("--max-parallel".to_string()))?;
                if n == 0 {
                    return Err(EngineError::InvalidOption("--max-parallel".to_string()));
                }
                current.policy.concurrency_cap = Some(n);
            }
            "--retry" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| EngineError::InvalidOption("--retry".to_string()))?;
                let n: u32 = val
                    .parse()
                    .map_err(|_| EngineError::InvalidOption("--retry".to_string()))?;
                if n == 0 {
                    return Err(EngineError::InvalidOption("--retry".to_string()));
                }
                current.policy.retry_limit = n;
            }
            "--npm-path" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| EngineError::InvalidOption("--npm-path".to_string()))?;
                npm_path = Some(val.clone());
            }
            other if other.starts_with("--") && other[2..].contains('=') => {
                let body = &other[2..];
                let (key, value) = body.split_once('=').expect("checked above");
                if let Some((pkg, var)) = key.split_once(':') {
                    package_vars
                        .entry(pkg.to_string())
                        .or_default()
                        .insert(var.to_string(), value.to_string());
                } else {
                    run_vars.insert(key.to_string(), value.to_string());
                }
            }
            other if other.starts_with("--") && other[2..].contains(':') => {
                let key = &other[2..];
                let (pkg, var) = key
                    .split_once(':')
                    .ok_or_else(|| EngineError::InvalidOption(other.to_string()))?;
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| EngineError::InvalidOption(other.to_string()))?;
                package_vars
                    .entry(pkg.to_string())
                    .or_default()
                    .insert(var.to_string(), value.clone());
            }
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(EngineError::InvalidOption(other.to_string()));
            }
            positional => current.patterns.push(positional.to_string()),
        }
        i += 1;
    }

    if !current.patterns.is_empty() || groups.is_empty() {
        groups.push(current);
    }

    for group in &groups {
        group.policy.validate()?;
    }

    if groups.iter().all(|g| g.patterns.is_empty()) {
        return Err(EngineError::InvalidOption(
            "no patterns given on the command line".to_string(),
        ));
    }

    Ok(CliOutcome::Run(Invocation {
        groups,
        extra_args,
        run_vars,
        package_vars,
        print_summary,
        npm_path,
        silent,
    }))
}

/// Begins a new group with the given parallelism, unless the group in
/// progress has no patterns yet — in which case the flag just sets the
/// policy on that still-empty group instead of opening an empty one ahead
/// of it.
fn start_group(groups: &mut Vec<GroupSpec>, current: &mut GroupSpec, parallel: bool) {
    if !current.patterns.is_empty() {
        let finished = std::mem::replace(
            current,
            GroupSpec {
                policy: GroupPolicy {
                    parallel,
                    ..Default::default()
                },
                patterns: Vec::new(),
            },
        );
        groups.push(finished);
    } else {
        current.policy.parallel = parallel;
    }
}

fn default_policy(mode: DefaultMode) -> GroupPolicy {
    GroupPolicy {
        parallel: matches!(mode, DefaultMode::Parallel),
        ..Default::default()
    }
}

/// Expands clustered short flags (`-cp` → `-c -p`) into individual tokens.
/// Stops expanding once `--` is seen; everything after it is passed through
/// verbatim.
fn expand_clustered_flags(args: &[String]) -> Vec<String> {
    const CLUSTERABLE: &str = "spclnrhv";
    let mut out = Vec::with_capacity(args.len());
    let mut end_of_flags = false;

    for arg in args {
        if end_of_flags {
            out.push(arg.clone());
            continue;
        }
        if arg == "--" {
            end_of_flags = true;
            out.push(arg.clone());
            continue;
        }
        let is_cluster = arg.len() > 2
            && arg.starts_with('-')
            && !arg.starts_with("--")
            && arg[1..].chars().all(|c| CLUSTERABLE.contains(c));
        if is_cluster {
            out.extend(arg[1..].chars().map(|c| format!("-{c}")));
        } else {
            out.push(arg.clone());
        }
    }
    out
}
