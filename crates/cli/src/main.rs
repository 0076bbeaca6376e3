//! ezkonnect CLI
//!
//! A command-line tool for viewing the instrumentation state of a cluster
//! and toggling traces and logs instrumentation through the ezkonnect server.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{annotate, state};

/// ezkonnect CLI
#[derive(Parser)]
#[command(name = "ezk")]
#[command(author, version, about = "CLI for the ezkonnect instrumentation server", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via EZK_API_URL env var;
    /// defaults to the config file value or http://localhost:5050)
    #[arg(long, env = "EZK_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Workload controller kinds accepted by the server
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Kind {
    Deployment,
    Statefulset,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Deployment => "deployment",
            Kind::Statefulset => "statefulset",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show detected applications and their instrumentation
    State {
        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,

        /// Filter by controller kind
        #[arg(long, short)]
        kind: Option<Kind>,
    },

    /// Enable or disable traces instrumentation
    #[command(subcommand)]
    Traces(TracesCommands),

    /// Set or clear the log type
    #[command(subcommand)]
    Logs(LogsCommands),
}

#[derive(Subcommand)]
pub enum TracesCommands {
    /// Enable traces instrumentation
    Enable {
        kind: Kind,

        /// Workload as namespace/name
        target: String,

        /// Service name reported by the instrumentation
        #[arg(long)]
        service_name: Option<String>,
    },

    /// Disable traces instrumentation
    Disable {
        kind: Kind,

        /// Workload as namespace/name
        target: String,
    },
}

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Set the log type
    Set {
        kind: Kind,

        /// Workload as namespace/name
        target: String,

        /// Log type, e.g. java or nginx
        log_type: String,
    },

    /// Remove the log type
    Clear {
        kind: Kind,

        /// Workload as namespace/name
        target: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let api_url = config::Config::load()?.resolve_api_url(cli.api_url);
    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::State { namespace, kind } => {
            state::show_state(&client, namespace, kind.map(|k| k.as_str().to_string()), cli.format)
                .await?;
        }
        Commands::Traces(traces_cmd) => match traces_cmd {
            TracesCommands::Enable {
                kind,
                target,
                service_name,
            } => {
                annotate::set_traces(&client, kind.as_str(), &target, true, service_name, cli.format)
                    .await?;
            }
            TracesCommands::Disable { kind, target } => {
                annotate::set_traces(&client, kind.as_str(), &target, false, None, cli.format)
                    .await?;
            }
        },
        Commands::Logs(logs_cmd) => match logs_cmd {
            LogsCommands::Set {
                kind,
                target,
                log_type,
            } => {
                annotate::set_log_type(&client, kind.as_str(), &target, &log_type, cli.format)
                    .await?;
            }
            LogsCommands::Clear { kind, target } => {
                annotate::set_log_type(&client, kind.as_str(), &target, "", cli.format).await?;
            }
        },
    }

    Ok(())
}
