//! Sequential-only entry point (`taskrunner-s`): same parser as the general
//! runner, but the first, not-yet-`-s`/`-p`-qualified group defaults to
//! sequential, matching spec.md §6's "sequential-only runner" default.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    taskrunner::init_logging(args.iter().any(|a| a == "--silent"));

    let code = taskrunner::run(taskrunner::cli::DefaultMode::Sequential).await?;
    std::process::exit(code);
}
