use clap::Parser;

use locate_from_db::cli::Args;
use locate_from_db::error::Result;
use locate_from_db::{logger, runner};

/// Entry point of the application.
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Parses and validates CLI arguments, then hands off to the batch runner.
async fn run() -> Result<()> {
    let args = Args::parse();
    let config = args.validate()?;
    logger::Logger::init(config.verbosity);
    runner::run(config).await
}
