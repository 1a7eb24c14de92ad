//! phx-client command-line entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use phx_client::commands;
use phx_client::config::{Config, Flow};
use phx_client::session::{FileStore, SessionManager};
use phx_client::ui::ConsoleUi;
use phx_client::ApiClient;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser)]
#[command(name = "phx-client")]
#[command(version = VERSION)]
#[command(about = "Phoenix channel client with session handshake")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, join the session channel and print events until Ctrl-C
    Listen {
        /// Channel flow (defaults to the configured one)
        #[arg(long, value_enum)]
        flow: Option<Flow>,
        /// Also print every frame
        #[arg(long)]
        frames: bool,
    },
    /// Exchange an OAuth authorization code for a session
    LoginCode {
        /// Authorization code
        #[arg(long)]
        code: String,
        /// PKCE code verifier
        #[arg(long)]
        verifier: String,
    },
    /// Exchange a signed wallet message for a session
    LoginWallet {
        /// Wallet address
        #[arg(long)]
        address: String,
        /// Signed message
        #[arg(long)]
        message: String,
        /// Signature
        #[arg(long)]
        signature: String,
    },
    /// Fetch and print the profile
    Profile,
    /// Add points to the balance
    AddPoints {
        /// Number of points
        #[arg(long, default_value_t = 1)]
        points: i64,
    },
    /// Add one fitcoin
    AddFitcoin,
    /// Register a wallet address with the user
    RegisterWallet {
        /// Wallet address
        #[arg(long)]
        address: String,
    },
    /// Clear the stored session
    Logout,
    /// Print the stored session and configuration
    Status,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var("PHX_CLIENT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = Config::load()?;
    let mut manager = SessionManager::new(FileStore::new(Config::session_path()?));
    manager.resume().context("Failed to read session store")?;
    let mut ui = ConsoleUi::new(false);

    match cli.command {
        Commands::Listen { flow, frames } => {
            commands::listen(&config, manager, ConsoleUi::new(frames), flow).await?;
        }
        Commands::LoginCode { code, verifier } => {
            let api = ApiClient::new(config.backend_url.clone())?;
            commands::login_code(&api, &mut manager, &mut ui, &code, &verifier).await?;
        }
        Commands::LoginWallet {
            address,
            message,
            signature,
        } => {
            let api = ApiClient::new(config.backend_url.clone())?;
            commands::login_wallet(&api, &mut manager, &mut ui, &address, &message, &signature)
                .await?;
        }
        Commands::Profile => {
            let api = ApiClient::new(config.backend_url.clone())?;
            commands::profile(&api, &mut manager, &mut ui).await?;
        }
        Commands::AddPoints { points } => {
            let api = ApiClient::new(config.backend_url.clone())?;
            commands::add_points(&api, &mut manager, &mut ui, points).await?;
        }
        Commands::AddFitcoin => {
            let api = ApiClient::new(config.backend_url.clone())?;
            commands::add_fitcoin(&api, &mut manager, &mut ui).await?;
        }
        Commands::RegisterWallet { address } => {
            let api = ApiClient::new(config.backend_url.clone())?;
            commands::register_wallet(&api, &mut manager, &mut ui, &address).await?;
        }
        Commands::Logout => {
            manager.logout(&mut ui)?;
        }
        Commands::Status => {
            println!(
                "{}",
                serde_json::to_string_pretty(&commands::status(&config, &manager))?
            );
        }
    }

    Ok(())
}
