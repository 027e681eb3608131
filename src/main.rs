// src/main.rs

use buildplan::engine::BuildStatus;
use buildplan::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(BuildStatus::Succeeded) => {}
        Ok(_) => std::process::exit(1),
        Err(err) => {
            eprintln!("buildplan error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<BuildStatus> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    Ok(run(args).await?)
}
