//! Pool Sniper - buys newly created liquidity pools and sells on
//! take-profit or trailing stop-loss
//!
//! # WARNING
//! - This bot trades with real money. Only use funds you can afford to lose.
//! - Most freshly launched tokens go to zero.
//! - Other bots compete for the same pools.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use pool_sniper::cli::commands;
use pool_sniper::config::Config;

/// Pool Sniper - liquidity pool sniper
#[derive(Parser)]
#[command(name = "snipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sniper
    Start,

    /// Manually sell a monitored position
    Sell {
        /// Token mint address
        token: String,

        /// Raw token amount to sell (default: full recorded balance)
        #[arg(long)]
        amount: Option<u64>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Show persisted positions
    Status,

    /// Show current configuration (secrets masked)
    Config,

    /// Forget a sold, failed or skipped position so it can be traded again
    Reset {
        /// Token mint address
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pool_sniper=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start => match startup_checks() {
            Ok(()) => commands::start(&config).await,
            Err(e) => Err(e),
        },
        Commands::Sell {
            token,
            amount,
            force,
        } => match startup_checks() {
            Ok(()) => commands::sell(&config, &token, amount, force).await,
            Err(e) => Err(e),
        },
        Commands::Status => commands::status(&config).await,
        Commands::Config => commands::show_config(&config),
        Commands::Reset { token } => commands::reset(&config, &token).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Refuse to trade with a missing or group/world-readable keypair
fn startup_checks() -> Result<()> {
    info!("Performing startup checks...");

    let keypair_path = std::env::var("KEYPAIR_PATH")
        .map_err(|_| anyhow::anyhow!("KEYPAIR_PATH environment variable not set"))?;

    if !std::path::Path::new(&keypair_path).exists() {
        return Err(anyhow::anyhow!("Keypair file not found: {}", keypair_path));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(&keypair_path)
            .map_err(|e| anyhow::anyhow!("Cannot read keypair file {}: {}", keypair_path, e))?;
        let mode = metadata.permissions().mode();

        if mode & 0o077 != 0 {
            return Err(anyhow::anyhow!(
                "Keypair file {} has insecure permissions {:o}. \
                 Run 'chmod 600 {}' to fix.",
                keypair_path,
                mode & 0o777,
                keypair_path
            ));
        }

        info!("Keypair permissions OK");
    }

    info!("Startup checks passed");
    Ok(())
}
