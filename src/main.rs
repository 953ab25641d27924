//! agentrun - streaming agent-run client
//!
//! Runs one agent turn over a WebSocket connection, renders the streamed
//! output and answers the server's data requests from a local library file.

mod commands;
mod config;
mod library;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use config::AppConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentrun")]
#[command(about = "Streaming agent-run client")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "AGENTRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL (http, https, ws or wss)
    #[arg(short = 'u', long)]
    base_url: Option<String>,

    /// Authentication token
    #[arg(short = 't', long, env = "AGENTRUN_TOKEN")]
    token: Option<String>,

    /// Seconds to wait for the ready gate (no limit by default)
    #[arg(long)]
    ready_timeout: Option<u64>,

    // ===== TLS Options =====
    /// Path to CA certificate for server verification
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Path to client certificate (for mTLS)
    #[arg(long)]
    client_cert: Option<PathBuf>,

    /// Path to client private key (for mTLS)
    #[arg(long)]
    client_key: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one agent turn and stream the output
    Run(RunArgs),

    /// Decode captured server frames, one JSON frame per line
    Decode {
        /// Input file, or - for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to this YAML file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// The user prompt
    pub prompt: String,

    /// Continue an existing thread
    #[arg(long)]
    pub thread_id: Option<String>,

    /// Run ID (auto-generated if not provided)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Retry a previous run
    #[arg(long)]
    pub retry_of: Option<String>,

    /// Library file answering data requests
    #[arg(short, long)]
    pub library: Option<PathBuf>,

    /// Custom instructions for the agent
    #[arg(long)]
    pub custom_instructions: Option<String>,

    /// Custom model JSON (or @file.json to read from file)
    #[arg(short, long)]
    pub model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Decoding needs no configuration
    if let Commands::Decode { ref input } = cli.command {
        println!("{}", commands::decode(input)?);
        return Ok(());
    }

    let mut config = AppConfig::load(cli.config.as_deref()).map_err(|e| {
        eprintln!("{}: {}", "Config error".red(), e);
        e
    })?;
    if let Some(ref url) = cli.base_url {
        config.server.base_url = url.clone();
    }
    if let Some(secs) = cli.ready_timeout {
        config.timeouts.ready_timeout_secs = Some(secs);
    }
    if let Some(ref path) = cli.ca_cert {
        config.tls.ca_cert_path = Some(path.clone());
    }
    if let Some(ref path) = cli.client_cert {
        config.tls.client_cert_path = Some(path.clone());
    }
    if let Some(ref path) = cli.client_key {
        config.tls.client_key_path = Some(path.clone());
    }
    if let Err(e) = config.validate() {
        eprintln!("{}: {}", "Config error".red(), e);
        std::process::exit(1);
    }

    match cli.command {
        Commands::Decode { .. } => unreachable!(), // Already handled above
        Commands::Config { save } => {
            print!("{}", serde_yaml::to_string(&config.redacted())?);
            if let Some(path) = save {
                config.save(&path)?;
                eprintln!("{} {}", "Saved".green(), path.display());
            }
        }
        Commands::Run(args) => match commands::run(&config, cli.token, args).await {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
