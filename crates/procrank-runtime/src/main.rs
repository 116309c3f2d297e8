//! procrank: child-process ranking runtime binary.
//! Hosts the launcher context on its own task and replays recorded scenarios.

use clap::Parser;
use procrank_core::LauncherConfig;

mod cli;
mod launcher_task;
mod replay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr; stdout carries snapshots and config.
    let filter = std::env::var("PROCRANK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let config = args
        .config
        .as_deref()
        .map(LauncherConfig::load)
        .transpose()?;

    match args.command {
        cli::Command::Replay(opts) => {
            replay::run_replay(config, &opts).await?;
        }
        cli::Command::PrintConfig => {
            let config = config.unwrap_or_default();
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
