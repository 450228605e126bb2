//! CLI command implementations

use anyhow::Result;
use dialoguer::Confirm;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::coordinator::{Collaborators, SellOutcome, TradeCoordinator};
use crate::filter::build_filters;
use crate::pool::parse_pubkey;
use crate::position::{LedgerReserveSource, Position, PositionManager};
use crate::store::JsonFileStore;
use crate::stream::{DiscoveryClient, DiscoveryEvent};
use crate::subscription::{PubsubAccountFeed, SubscriptionRecord, SubscriptionRegistry};
use crate::trading::{HttpTransport, JupiterQuoteProvider, Ledger, RpcLedger, TransactionSubmitter};

const QUOTE_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Load the signing keypair from `KEYPAIR_PATH` (JSON byte array)
fn load_keypair() -> Result<Arc<Keypair>> {
    let keypair_path = std::env::var("KEYPAIR_PATH")
        .map_err(|_| anyhow::anyhow!("KEYPAIR_PATH environment variable not set"))?;
    let keypair_data = std::fs::read_to_string(&keypair_path)?;
    let secret_key: Vec<u8> = serde_json::from_str(&keypair_data)?;
    let keypair = Keypair::from_bytes(&secret_key)
        .map_err(|e| anyhow::anyhow!("Invalid keypair {}: {}", keypair_path, e))?;
    info!("Loaded keypair: {}", keypair.pubkey());
    Ok(Arc::new(keypair))
}

fn position_manager(config: &Config) -> Arc<PositionManager> {
    let store = Arc::new(JsonFileStore::<Position>::new(
        config.persistence.positions_path(),
    ));
    Arc::new(PositionManager::new(store))
}

/// Wire every collaborator. Wallet balance updates go into `events`.
async fn build_coordinator(
    config: &Config,
    events: mpsc::Sender<DiscoveryEvent>,
) -> Result<Arc<TradeCoordinator>> {
    let payer = load_keypair()?;

    info!("Initializing RPC client...");
    let ledger: Arc<dyn Ledger> = Arc::new(RpcLedger::new(
        config.rpc.endpoint.clone(),
        Duration::from_millis(config.rpc.timeout_ms),
    ));

    let submitter = TransactionSubmitter::from_config(config, ledger.clone())?;
    info!("Submission method: {:?}", submitter.kind());

    let transport = Arc::new(HttpTransport::new(
        Duration::from_millis(config.quote.request_timeout_ms),
        QUOTE_RETRY_BASE_DELAY,
    )?);
    let quotes = Arc::new(JupiterQuoteProvider::new(&config.quote, transport));

    let feed = Arc::new(PubsubAccountFeed::connect(&config.rpc.ws_endpoint, events).await?);
    let subscription_store = Arc::new(JsonFileStore::<SubscriptionRecord>::new(
        config.persistence.subscriptions_path(),
    ));
    let registry = Arc::new(SubscriptionRegistry::new(feed, subscription_store));

    let parts = Collaborators {
        positions: position_manager(config),
        registry,
        submitter,
        quotes,
        filters: build_filters(&config.filters, ledger.clone()),
        prices: Arc::new(LedgerReserveSource::new(ledger)),
    };

    Ok(TradeCoordinator::new(config.clone(), payer, parts))
}

/// Start the sniper
pub async fn start(config: &Config) -> Result<()> {
    info!("Starting pool sniper...");
    info!(
        "Quote amount: {} SOL, buy slippage: {}bps, sell slippage: {}bps",
        config.trading.quote_amount_sol,
        config.trading.buy_slippage_bps,
        config.trading.sell_slippage_bps
    );
    if config.trading.one_token_at_a_time {
        info!("One token at a time");
    }

    let (event_tx, event_rx) = mpsc::channel::<DiscoveryEvent>(config.discovery.channel_capacity);

    let coordinator = build_coordinator(config, event_tx.clone()).await?;
    let shutdown = coordinator.shutdown_token();

    let discovery = DiscoveryClient::new(config.discovery.clone(), event_tx);
    let discovery_handle = discovery.start(shutdown.clone());

    let runner = coordinator.clone();
    let mut run_handle = tokio::spawn(async move { runner.run(event_rx).await });

    tokio::select! {
        result = &mut run_handle => {
            match result {
                Ok(Ok(())) => warn!("Event loop stopped"),
                Ok(Err(e)) => error!("Event loop failed: {}", e),
                Err(e) => error!("Event loop panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    if let Err(e) = coordinator.shutdown().await {
        error!("Failed to clear subscriptions: {}", e);
    }
    let _ = discovery_handle.await;

    info!("Stopped");
    Ok(())
}

/// Manually sell a monitored position
pub async fn sell(config: &Config, token: &str, amount: Option<u64>, force: bool) -> Result<()> {
    let mint: Pubkey = parse_pubkey(token)?;

    if !force {
        let what = amount
            .map(|a| a.to_string())
            .unwrap_or_else(|| "the full balance".to_string());
        let confirmed = Confirm::new()
            .with_prompt(format!("Sell {} of token {}? This cannot be undone.", what, mint))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Sell cancelled by user");
            return Ok(());
        }
    }

    let (event_tx, _event_rx) = mpsc::channel::<DiscoveryEvent>(16);
    let coordinator = build_coordinator(config, event_tx).await?;
    coordinator.load_state().await?;

    match coordinator.sell(mint, amount).await {
        SellOutcome::Sold { signature } => {
            println!("\nSell transaction confirmed!");
            println!("Signature: {}", signature);
            println!("View on Solscan: https://solscan.io/tx/{}", signature);
        }
        SellOutcome::Unconfirmed => {
            anyhow::bail!(
                "Sell not confirmed after {} attempts; position is back to monitoring",
                config.trading.max_sell_retries
            );
        }
        SellOutcome::NotHeld(reason) => anyhow::bail!("Nothing to sell: {}", reason),
    }

    Ok(())
}

/// Show persisted positions
pub async fn status(config: &Config) -> Result<()> {
    let positions = position_manager(config);
    positions.load().await?;

    let mut all = positions.all().await;
    all.sort_by_key(|p| p.discovered_at);

    println!("\n=== SNIPER STATUS ===\n");
    println!("Positions: {}", all.len());
    println!("Held: {}", positions.held().await.len());

    if all.is_empty() {
        println!("\nNo positions.");
        return Ok(());
    }

    println!(
        "\n{:<45} {:<13} {:>16} {:>16} {}",
        "MINT", "STATUS", "BUY PRICE", "HIGH", "LAST ERROR"
    );
    println!("{}", "-".repeat(110));
    for position in &all {
        println!(
            "{:<45} {:<13} {:>16} {:>16} {}",
            position.mint,
            position.status.to_string(),
            position
                .purchase_price
                .map(|p| format!("{:.10}", p))
                .unwrap_or_else(|| "-".into()),
            position
                .highest_price_seen
                .map(|p| format!("{:.10}", p))
                .unwrap_or_else(|| "-".into()),
            position.last_error.as_deref().unwrap_or("")
        );
    }
    println!();

    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Forget a finished position so its mint can be traded again
pub async fn reset(config: &Config, token: &str) -> Result<()> {
    let mint = parse_pubkey(token)?;
    let positions = position_manager(config);
    positions.load().await?;

    let removed = positions.reset(&mint).await?;
    println!("Reset {} (was {})", mint, removed.status);
    Ok(())
}
