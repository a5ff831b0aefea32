//! Tandem CLI: run a REP server or a REQ client from the terminal.

mod cli;
mod cmd;

use crate::cli::{Cli, Commands};
use clap::Parser;
use tandem_socket::config::load_config;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let config = load_config(cli.config.as_deref());
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: could not start the async runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async {
        match cli.command {
            Commands::Rep { listen, reply, max } => {
                cmd::cmd_rep(config, &listen, reply.as_deref(), max)
                    .await
                    .map(|_| ())
            }
            Commands::Req {
                dial,
                count,
                frames,
            } => cmd::cmd_req(config, &dial, count, frames).await.map(|_| ()),
        }
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
