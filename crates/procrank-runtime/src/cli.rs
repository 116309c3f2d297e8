//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "procrank", about = "child-process ranking and binding manager")]
pub struct Cli {
    /// Launcher config file (TOML). Built-in defaults apply when omitted.
    #[arg(long, short = 'c', global = true, env = "PROCRANK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a JSON scenario through the launcher and print a snapshot per step
    Replay(ReplayOpts),
    /// Print the effective configuration as TOML
    PrintConfig,
}

#[derive(clap::Args)]
pub struct ReplayOpts {
    /// Scenario file (JSON)
    pub scenario: PathBuf,

    /// Wait between steps for as long as their timestamps say
    #[arg(long)]
    pub realtime: bool,

    /// Pretty-print snapshots instead of one JSON object per line
    #[arg(long)]
    pub pretty: bool,
}
