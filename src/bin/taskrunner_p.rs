//! Parallel-only entry point (`taskrunner-p`): same parser as the general
//! runner, but the first, not-yet-`-s`/`-p`-qualified group defaults to
//! parallel, matching spec.md §6's "parallel-only runner" default.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    taskrunner::init_logging(args.iter().any(|a| a == "--silent"));

    let code = taskrunner::run(taskrunner::cli::DefaultMode::Parallel).await?;
    std::process::exit(code);
}
