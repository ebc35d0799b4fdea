//! mentorchat - one-to-one mentor and student chat
//!
//! `serve` runs a hub over a local SQLite database; the other subcommands
//! talk to a hub as one participant.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod error;

use commands::lookup::{PresenceArgs, RoomsArgs};
use commands::say::SayArgs;
use commands::serve::ServeOptions;
use commands::tail::TailArgs;
use config::AppConfig;

#[derive(Parser)]
#[command(name = "mentorchat", version)]
#[command(about = "One-to-one chat between mentors and students", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a hub over the local database
    Serve {
        /// Address to bind (overrides [hub] bind)
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Port to listen on (overrides [hub] port)
        #[arg(long, short)]
        port: Option<u16>,

        /// Database file (overrides [storage] database)
        #[arg(long, value_name = "FILE")]
        database: Option<PathBuf>,
    },
    Say(SayArgs),
    Tail(TailArgs),
    Presence(PresenceArgs),
    Rooms(RoomsArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mentorchat: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; RUST_LOG wins over the config file
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("mentorchat: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: AppConfig) -> error::Result<()> {
    match command {
        Commands::Serve {
            bind,
            port,
            database,
        } => {
            let options = ServeOptions {
                bind,
                port,
                database,
            };
            commands::serve::run(&config, options).await
        }
        Commands::Say(args) => commands::say::run(args).await,
        Commands::Tail(args) => commands::tail::run(args).await,
        Commands::Presence(args) => commands::lookup::presence(args).await,
        Commands::Rooms(args) => commands::lookup::rooms(args).await,
    }
}
