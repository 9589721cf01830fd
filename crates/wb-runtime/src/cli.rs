//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "wb",
    about = "token-authenticated file browser with live tail",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// TOML config file; CLI flags override its values
    #[arg(long, short = 'c', global = true, env = "WB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serve options when no subcommand is given
    #[command(flatten)]
    pub serve: ServeOpts,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Serve a directory (default when no subcommand is given)
    Serve(ServeOpts),
    /// Print a freshly generated access token
    GenToken,
}

#[derive(clap::Args, Default, Debug)]
pub struct ServeOpts {
    /// Directory to serve (default: current directory)
    #[arg(long, env = "WB_ROOT")]
    pub root: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// First port to try; the following ports are tried if it is busy
    #[arg(long, short = 'p', env = "WB_PORT")]
    pub port: Option<u16>,

    /// Access token (generated and logged when absent)
    #[arg(long, env = "WB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Tail poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Lines of history replayed when a tail opens
    #[arg(long)]
    pub replay_lines: Option<usize>,
}
