#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    taskrunner::init_logging(args.iter().any(|a| a == "--silent"));

    let code = taskrunner::run(taskrunner::cli::DefaultMode::Sequential).await?;
    std::process::exit(code);
}
