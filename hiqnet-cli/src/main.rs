//! hiqnet - inspect and build HiQnet messages and transport frames.
//!
//! All commands work offline on hex-encoded bytes.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hiqnet_client::Config;
use hiqnet_protocol::Address;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hiqnet")]
#[command(about = "Inspect and build HiQnet messages and transport frames")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "HIQNET_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode a hex-encoded message and print it as JSON
    Decode {
        /// Message bytes in hex (spaces, ':' and '-' are ignored)
        hex: String,
    },

    /// Build a message and print it as hex
    #[command(subcommand)]
    Encode(EncodeCommand),

    /// Split a hex-encoded message into physical frames, one per line
    Segment {
        hex: String,

        /// Transaction id written into every frame
        #[arg(short, long, default_value = "1")]
        tx: u8,

        /// Physical frame size (defaults to the configured size)
        #[arg(short, long)]
        frame_size: Option<usize>,
    },

    /// Reassemble hex-encoded frames and print each completed message
    Reassemble {
        /// Frames in hex, in arrival order
        #[arg(required = true)]
        frames: Vec<String>,
    },

    /// Print the effective configuration as YAML
    Config,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Decode { .. } => "decode",
            Commands::Encode(EncodeCommand::Locate { .. }) => "encode locate",
            Commands::Encode(EncodeCommand::Get { .. }) => "encode get",
            Commands::Encode(EncodeCommand::Set { .. }) => "encode set",
            Commands::Segment { .. } => "segment",
            Commands::Reassemble { .. } => "reassemble",
            Commands::Config => "config",
        }
    }
}

#[derive(Subcommand)]
pub enum EncodeCommand {
    /// Make a device identify itself
    Locate {
        /// Destination address (device[.vd[.o1.o2.o3]])
        dest: Address,

        /// Duration in milliseconds
        #[arg(short, long, default_value = "5000")]
        duration_ms: u16,

        /// Source address (defaults to the configured device)
        #[arg(short, long)]
        source: Option<Address>,
    },

    /// Read parameters
    Get {
        dest: Address,

        /// Parameter ids
        #[arg(required = true, value_delimiter = ',')]
        ids: Vec<u16>,

        #[arg(short, long)]
        source: Option<Address>,
    },

    /// Write parameters
    Set {
        dest: Address,

        /// Parameters as id=type:value (e.g. 4=f32:-6.5, 7=string:Main, 9=block:0a0b)
        #[arg(required = true)]
        params: Vec<String>,

        #[arg(short, long)]
        source: Option<Address>,
    },
}

fn run(cli: Cli) -> Result<String, Box<dyn std::error::Error>> {
    let config = Config::load_from(cli.config.as_deref())?;
    tracing::debug!(
        "Config: frame_size={} source_device={:#06x}",
        config.transport.frame_size,
        config.connection.source_device
    );
    commands::execute(&config, cli.command)
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
