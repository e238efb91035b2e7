//! Tooloop CLI, the main entry point.
//!
//! Commands:
//! - `chat`    Interactive chat or single-message mode
//! - `tools`   List the tools the agent would be given
//! - `config`  Show, locate or initialize the configuration file

use clap::{Parser, Subcommand};

mod commands;
mod render;

#[derive(Parser)]
#[command(
    name = "tooloop",
    about = "Tooloop: a tool-calling agent loop",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the model deployment for this session
        #[arg(short = 'd', long, env = "TOOLOOP_DEPLOYMENT")]
        deployment: Option<String>,

        /// Print every stream event as a JSON line instead of rendered text
        #[arg(long)]
        events: bool,

        /// Show trace stage contents of tool calls
        #[arg(long)]
        stages: bool,
    },

    /// List available tools
    Tools {
        /// Print the full definitions sent to the model as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logging format comes from the config file; a broken file is reported
    // by the command itself.
    let json_logs = tooloop_config::AppConfig::load()
        .map(|c| c.logging.json)
        .unwrap_or(false);
    init_tracing(cli.verbose, json_logs);

    match cli.command {
        Commands::Chat {
            message,
            deployment,
            events,
            stages,
        } => {
            let opts = commands::chat::ChatOptions {
                deployment,
                events,
                stages,
            };
            commands::chat::run(message, opts).await?
        }
        Commands::Tools { json } => commands::tools::run(json).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
