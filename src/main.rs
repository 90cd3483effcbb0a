use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use reflector::chat;
use reflector::constants;
use reflector::persistence::FilePersistence;
use reflector::relay::{self, RelayConfig};
use reflector::{ClientConfig, Mode, Orchestrator, SessionStore};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Chat with Reflector in the terminal.
    Chat {
        #[arg(long, default_value = "inquiry", value_parser = parse_mode, help = "Conversation mode.")]
        mode: Mode,
        #[arg(long, env = "REFLECTOR_API_URL", default_value = "http://127.0.0.1:9900", help = "Base URL of the chat functions.")]
        api_url: String,
        #[arg(long, env = "REFLECTOR_STATE_DIR", default_value = ".reflector", help = "Directory for persisted session state.")]
        state_dir: PathBuf,
    },
    /// List the available conversation modes.
    Modes,
    /// Serve the chat and review functions on top of the completion API.
    Serve {
        #[arg(long, default_value_t = 9900, help = "Port for the relay server.")]
        port: u16,
    },
}

fn parse_mode(value: &str) -> Result<Mode, String> {
    value.parse::<Mode>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for API keys and endpoints)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,reflector=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Reflector starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Chat {
            mode,
            api_url,
            state_dir,
        } => {
            let config = ClientConfig::new(api_url, constants::REFLECTOR_API_KEY.clone());
            let store = SessionStore::open(Arc::new(FilePersistence::new(state_dir))).into_shared();

            let orchestrator = Orchestrator::new(config, store);
            chat::run_chat(orchestrator, mode)
                .await
                .context("Chat session failed")?;
        }
        Commands::Modes => {
            for mode in Mode::ALL {
                println!("{:<12} {}", mode.id(), mode.display_name());
            }
        }
        Commands::Serve { port } => {
            info!("Starting relay on port {}...", port);
            let config = RelayConfig::from_env();
            if config.api_key.is_empty() {
                error!("OPENAI_API_KEY is not set; upstream requests will be rejected");
            }

            let server = relay::start_relay_server(port, config);
            tokio::select! {
                res = server => res?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down relay.");
                }
            }
        }
    }

    Ok(())
}
