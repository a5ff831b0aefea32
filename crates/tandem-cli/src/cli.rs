//! Clap CLI definitions for Tandem.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  tandem rep --listen tcp://127.0.0.1:5555              Echo every request
  tandem rep --listen ipc:///tmp/tandem.sock --reply ok  Answer \"ok\" to everything
  tandem req --dial tcp://127.0.0.1:5555 NAME           Send one request
  tandem req --dial tcp://a:5555 --dial tcp://b:5555 --count 4 job
                                                        Round-robin over two servers";

/// Tandem: strict request/reply messaging from the terminal.
#[derive(Parser, Debug)]
#[command(name = "tandem", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to a socket config file (TOML).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve requests on an endpoint.
    Rep {
        /// Endpoint to listen on (tcp://host:port, ipc://path, inproc://name).
        #[arg(long)]
        listen: String,
        /// Fixed reply text. Requests are echoed back when omitted.
        #[arg(long)]
        reply: Option<String>,
        /// Stop after this many requests.
        #[arg(long)]
        max: Option<u64>,
    },
    /// Send requests and print the replies.
    Req {
        /// Endpoint to dial. Repeat to spread requests round-robin.
        #[arg(long, required = true)]
        dial: Vec<String>,
        /// How many times to send the request.
        #[arg(long, default_value_t = 1)]
        count: u64,
        /// Frames of the request message.
        #[arg(required = true)]
        frames: Vec<String>,
    },
}
