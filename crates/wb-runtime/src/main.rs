//! wb: token-authenticated network file browser with live tail.

use clap::Parser;

mod cli;
mod config;
mod context;
mod daemon;
mod handshake;
mod rpc;
mod tail_task;
mod ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let command = args
        .command
        .unwrap_or(cli::Command::Serve(args.serve));

    match command {
        cli::Command::Serve(opts) => {
            let filter = std::env::var("WB_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            let file = match &args.config {
                Some(path) => config::FileConfig::load(path)?,
                None => config::FileConfig::default(),
            };
            let server_config = config::ServerConfig::from_sources(opts, file)?;
            daemon::run_daemon(server_config).await?;
        }
        cli::Command::GenToken => {
            println!("{}", config::generate_token());
        }
    }

    Ok(())
}
