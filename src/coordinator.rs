//! Trade coordinator
//!
//! Drives every position from discovery to sale:
//!
//! ```text
//! PoolDiscovered -> filter gate -> (entry signal) -> buy with retries
//!     -> subscribe wallet account -> exit monitor -> sell with retries
//!     -> tear down subscription
//! ```
//!
//! In one-token-at-a-time mode a buy is refused outright while another buy
//! holds the lock or any sell is in flight. The lock covers the buy only,
//! never the monitoring that follows.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use solana_sdk::native_token::sol_to_lamports;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::filter::{FilterGate, GateVerdict, PoolFilter};
use crate::pool::{PoolDescriptor, PoolKeys, SOL_DECIMALS, WSOL_MINT};
use crate::position::auto_sell::{ExitRules, ExitTracker};
use crate::position::entry::EntryTracker;
use crate::position::manager::{PositionManager, PositionStatus};
use crate::position::monitor::{MonitorResult, PriceMonitor};
use crate::position::price_feed::{compute_price, ReserveSource};
use crate::stream::DiscoveryEvent;
use crate::subscription::SubscriptionRegistry;
use crate::trading::quote::{QuoteProvider, QuoteRequest, QuotedSwap};
use crate::trading::submitter::{SubmissionRequest, SubmitOutcome, TransactionSubmitter};
use crate::trading::transaction::{derive_ata, sign_versioned};

/// How a buy ended
#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Bought { signature: String },
    /// Refused: another buy or a sell was in flight
    Busy,
    /// Gate did not pass the pool
    Filtered(GateVerdict),
    /// No entry signal in time
    Skipped(String),
    /// Every attempt went unconfirmed; the position stays BuyPending
    Unconfirmed,
    Failed(String),
}

/// How a sell ended
#[derive(Debug, Clone, PartialEq)]
pub enum SellOutcome {
    Sold { signature: String },
    /// Every attempt went unconfirmed; the position is back to Monitoring
    Unconfirmed,
    /// Nothing to sell (unknown mint, not monitoring, zero amount)
    NotHeld(String),
}

/// Everything the coordinator talks to
pub struct Collaborators {
    pub positions: Arc<PositionManager>,
    pub registry: Arc<SubscriptionRegistry>,
    pub submitter: TransactionSubmitter,
    pub quotes: Arc<dyn QuoteProvider>,
    pub filters: Vec<Box<dyn PoolFilter>>,
    pub prices: Arc<dyn ReserveSource>,
}

/// Decrements the in-flight sell count when dropped
struct SellInFlight<'a>(&'a AtomicUsize);

impl<'a> SellInFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for SellInFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TradeCoordinator {
    config: Config,
    payer: Arc<Keypair>,
    positions: Arc<PositionManager>,
    registry: Arc<SubscriptionRegistry>,
    submitter: TransactionSubmitter,
    quotes: Arc<dyn QuoteProvider>,
    gate: FilterGate,
    monitor: PriceMonitor,
    exit_rules: ExitRules,
    buy_lock: Mutex<()>,
    sells_in_flight: AtomicUsize,
    monitors: DashMap<Pubkey, CancellationToken>,
    shutdown: CancellationToken,
}

impl TradeCoordinator {
    pub fn new(config: Config, payer: Arc<Keypair>, parts: Collaborators) -> Arc<Self> {
        let gate = FilterGate::from_config(parts.filters, &config.filters);
        let monitor = PriceMonitor::from_config(parts.prices, &config.auto_sell);
        let exit_rules = ExitRules::from(&config.auto_sell);

        info!(
            "Coordinator ready: {} filter check(s) per pool, {} price check(s) per round",
            gate.budget(),
            monitor.budget()
        );

        Arc::new(Self {
            config,
            payer,
            positions: parts.positions,
            registry: parts.registry,
            submitter: parts.submitter,
            quotes: parts.quotes,
            gate,
            monitor,
            exit_rules,
            buy_lock: Mutex::new(()),
            sells_in_flight: AtomicUsize::new(0),
            monitors: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn positions(&self) -> &Arc<PositionManager> {
        &self.positions
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn active_monitors(&self) -> usize {
        self.monitors.len()
    }

    pub fn sells_in_flight(&self) -> usize {
        self.sells_in_flight.load(Ordering::SeqCst)
    }

    /// Token that fires once shutdown starts
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dispatch one feed event
    pub async fn handle_event(self: &Arc<Self>, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::PoolDiscovered { pool_id, pool } => {
                let mint = pool.token_mint();
                match self.positions.discover(mint, pool_id).await {
                    Ok(true) => {
                        let outcome = self.buy(pool_id, &pool).await;
                        debug!("Buy flow for {} ended: {:?}", mint, outcome);
                    }
                    Ok(false) => {}
                    Err(e) => error!("Failed to record discovery of {}: {}", mint, e),
                }
            }
            DiscoveryEvent::WalletBalanceChanged { mint, amount, .. } => {
                self.on_balance_change(mint, amount).await;
            }
        }
    }

    async fn on_balance_change(self: &Arc<Self>, mint: Pubkey, amount: u64) {
        let position = match self.positions.set_held_amount(&mint, amount).await {
            Ok(Some(position)) => position,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to record balance of {}: {}", mint, e);
                return;
            }
        };

        debug!("{} wallet balance {}", mint, amount);

        // A position left in Monitoring by an exhausted sell gets a new round
        if position.status == PositionStatus::Monitoring
            && amount > 0
            && !self.monitors.contains_key(&mint)
        {
            if let Some(keys) = position.pool_keys {
                info!("Restarting exit monitor for {}", mint);
                self.spawn_monitor(mint, keys);
            }
        }
    }

    /// Gate, buy and hand the position to the exit monitor
    pub async fn buy(self: &Arc<Self>, pool_id: Pubkey, pool: &PoolDescriptor) -> BuyOutcome {
        let mint = pool.token_mint();

        let guard = if self.config.trading.one_token_at_a_time {
            let in_flight = self.sells_in_flight.load(Ordering::SeqCst);
            match self.buy_lock.try_lock() {
                Ok(guard) if in_flight == 0 => Some(guard),
                _ => {
                    debug!("Skipping {}: a trade is already in progress", mint);
                    self.skip(&mint, "another trade in progress").await;
                    return BuyOutcome::Busy;
                }
            }
        } else {
            None
        };

        let keys = match PoolKeys::resolve(pool_id, pool) {
            Ok(keys) => keys,
            Err(e) => return self.fail(&mint, e.to_string()).await,
        };
        if let Err(e) = self.positions.set_pool_keys(&mint, keys.clone()).await {
            return self.fail(&mint, e.to_string()).await;
        }

        if !self.config.trading.skip_filters {
            if let Err(e) = self.positions.transition(&mint, PositionStatus::Filtering).await {
                return self.fail(&mint, e.to_string()).await;
            }

            let verdict = self.gate.evaluate(&keys).await;
            if let Err(e) = verdict.clone().into_result() {
                self.fail(&mint, e.to_string()).await;
                return BuyOutcome::Filtered(verdict);
            }
        }

        if self.config.entry.enabled {
            let mut tracker = EntryTracker::from_config(&self.config.entry);
            match self.monitor.watch_entry(&keys, &mut tracker, &self.shutdown).await {
                MonitorResult::Entry => {}
                other => {
                    let reason = format!("no entry signal ({:?})", other);
                    self.skip(&mint, &reason).await;
                    return BuyOutcome::Skipped(reason);
                }
            }
        }

        if let Err(e) = self.positions.transition(&mint, PositionStatus::BuyPending).await {
            return self.fail(&mint, e.to_string()).await;
        }

        let request = QuoteRequest {
            mint_in: *WSOL_MINT,
            mint_out: mint,
            amount: sol_to_lamports(self.config.trading.quote_amount_sol),
            slippage_bps: self.config.trading.buy_slippage_bps,
            sender: self.payer.pubkey(),
        };

        let max_retries = self.config.trading.max_buy_retries;
        for attempt in 1..=max_retries {
            if self.shutdown.is_cancelled() {
                break;
            }

            info!("Buying {} (attempt {}/{})", mint, attempt, max_retries);

            match self.execute(&request).await {
                Ok((outcome, swap)) if outcome.confirmed => {
                    let signature = outcome
                        .signature
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                    let price = compute_price(
                        swap.out_amount,
                        keys.token_decimals,
                        swap.in_amount,
                        SOL_DECIMALS,
                    )
                    .unwrap_or_default();

                    if let Err(e) = self
                        .positions
                        .mark_bought(&mint, price, swap.out_amount, signature.clone())
                        .await
                    {
                        return self.fail(&mint, e.to_string()).await;
                    }

                    info!(
                        "Bought {} tokens of {} at {:.12} SOL ({})",
                        swap.out_amount, mint, price, signature
                    );

                    drop(guard);
                    self.start_monitoring(mint, keys).await;
                    return BuyOutcome::Bought { signature };
                }
                Ok((outcome, _)) => {
                    let reason = outcome
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "not confirmed".to_string());
                    warn!("Buy attempt {} for {} not confirmed: {}", attempt, mint, reason);
                    self.note_error(&mint, reason).await;
                }
                Err(e) => {
                    warn!("Buy attempt {} for {} failed: {}", attempt, mint, e);
                    self.note_error(&mint, e.to_string()).await;
                }
            }
        }

        warn!("Giving up on buying {} after {} attempts", mint, max_retries);
        BuyOutcome::Unconfirmed
    }

    /// Sell a monitored position. `trigger_amount` overrides the amount
    /// recorded on the position.
    pub async fn sell(self: &Arc<Self>, mint: Pubkey, trigger_amount: Option<u64>) -> SellOutcome {
        let _in_flight = SellInFlight::enter(&self.sells_in_flight);

        let Some(position) = self.positions.get(&mint).await else {
            return SellOutcome::NotHeld(format!("unknown mint {}", mint));
        };

        if position.status != PositionStatus::Monitoring {
            return SellOutcome::NotHeld(format!("{} is {}", mint, position.status));
        }

        let amount = match trigger_amount.filter(|a| *a > 0).or(position.sell_amount()) {
            Some(amount) if amount > 0 => amount,
            _ => return SellOutcome::NotHeld(format!("no token balance recorded for {}", mint)),
        };

        if let Err(e) = self.positions.transition(&mint, PositionStatus::SellPending).await {
            return SellOutcome::NotHeld(e.to_string());
        }

        let request = QuoteRequest {
            mint_in: mint,
            mint_out: *WSOL_MINT,
            amount,
            slippage_bps: self.config.trading.sell_slippage_bps,
            sender: self.payer.pubkey(),
        };

        let max_retries = self.config.trading.max_sell_retries;
        for attempt in 1..=max_retries {
            info!("Selling {} of {} (attempt {}/{})", amount, mint, attempt, max_retries);

            match self.execute(&request).await {
                Ok((outcome, swap)) if outcome.confirmed => {
                    let signature = outcome
                        .signature
                        .map(|s| s.to_string())
                        .unwrap_or_default();

                    if let Err(e) = self.registry.remove(&mint).await {
                        warn!("Failed to remove subscription for {}: {}", mint, e);
                    }
                    if let Err(e) = self.positions.mark_sold(&mint, signature.clone()).await {
                        error!("Sold {} but could not record it: {}", mint, e);
                    }

                    info!(
                        "Sold {} of {} for {} lamports ({})",
                        amount, mint, swap.out_amount, signature
                    );
                    return SellOutcome::Sold { signature };
                }
                Ok((outcome, _)) => {
                    let reason = outcome
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "not confirmed".to_string());
                    warn!("Sell attempt {} for {} not confirmed: {}", attempt, mint, reason);
                }
                Err(e) => warn!("Sell attempt {} for {} failed: {}", attempt, mint, e),
            }
        }

        warn!("Giving up on selling {} after {} attempts", mint, max_retries);
        if let Err(e) = self.positions.transition(&mint, PositionStatus::Monitoring).await {
            error!("Failed to return {} to monitoring: {}", mint, e);
        }
        self.note_error(&mint, format!("sell unconfirmed after {} attempts", max_retries))
            .await;
        SellOutcome::Unconfirmed
    }

    async fn note_error(&self, mint: &Pubkey, reason: String) {
        if let Err(e) = self.positions.note_error(mint, reason).await {
            warn!("Failed to record error for {}: {}", mint, e);
        }
    }

    /// Quote, sign and submit one swap
    async fn execute(&self, request: &QuoteRequest) -> Result<(SubmitOutcome, QuotedSwap)> {
        let swap = self.quotes.swap_transaction(request).await?;
        if swap.out_amount == 0 {
            return Err(Error::Quote(format!("zero output quoted for {}", request.mint_out)));
        }

        let signed = sign_versioned(swap.transaction.clone(), &self.payer)?;
        let submission =
            SubmissionRequest::new(signed, Vec::new(), self.submitter.kind(), swap.window);
        let outcome = self.submitter.submit(&submission, &self.payer).await;
        Ok((outcome, swap))
    }

    /// Bought -> subscribed -> Monitoring -> exit monitor running
    async fn start_monitoring(self: &Arc<Self>, mint: Pubkey, keys: PoolKeys) {
        let account = derive_ata(&self.payer.pubkey(), &mint);
        if let Err(e) = self.registry.add(mint, account).await {
            warn!("No balance feed for {}: {}", mint, e);
            self.note_error(&mint, e.to_string()).await;
        }

        if let Err(e) = self.positions.transition(&mint, PositionStatus::Monitoring).await {
            error!("Cannot monitor {}: {}", mint, e);
            return;
        }

        self.spawn_monitor(mint, keys);
    }

    fn spawn_monitor(self: &Arc<Self>, mint: Pubkey, keys: PoolKeys) {
        let token = match self.monitors.entry(mint) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                let token = self.shutdown.child_token();
                slot.insert(token.clone());
                token
            }
        };

        let this = self.clone();
        tokio::spawn(async move {
            let result = this.watch_position(mint, &keys, &token).await;

            // The entry stays until the sell settles so balance updates cannot
            // start a second monitor meanwhile
            match result {
                MonitorResult::TakeProfit | MonitorResult::StopLoss => {
                    this.sell(mint, None).await;
                }
                MonitorResult::Timeout if this.config.auto_sell.sell_on_timeout => {
                    info!("Selling {} after monitor timeout", mint);
                    this.sell(mint, None).await;
                }
                MonitorResult::Timeout => {
                    info!("Monitor for {} timed out, holding", mint);
                }
                MonitorResult::Cancelled | MonitorResult::Entry => {}
            }
            this.monitors.remove(&mint);
        });
    }

    async fn watch_position(
        &self,
        mint: Pubkey,
        keys: &PoolKeys,
        token: &CancellationToken,
    ) -> MonitorResult {
        let Some(position) = self.positions.get(&mint).await else {
            return MonitorResult::Cancelled;
        };
        let Some(purchase_price) = position.purchase_price.filter(|p| *p > 0.0) else {
            warn!("{} has no purchase price, not monitoring", mint);
            return MonitorResult::Cancelled;
        };

        let mut tracker = ExitTracker::resume(
            self.exit_rules,
            purchase_price,
            position.highest_price_seen,
            position.trailing_stop_threshold,
        );

        let positions = self.positions.clone();
        self.monitor
            .watch_exit(keys, &mut tracker, token, move |tick| {
                let positions = positions.clone();
                async move {
                    if let Err(e) = positions
                        .update_trailing(&mint, tick.highest_price_seen, tick.threshold)
                        .await
                    {
                        warn!("Failed to persist trailing state for {}: {}", mint, e);
                    }
                }
            })
            .await
    }

    async fn fail(&self, mint: &Pubkey, reason: String) -> BuyOutcome {
        if let Err(e) = self.positions.mark_failed(mint, reason.clone()).await {
            error!("Failed to mark {} failed: {}", mint, e);
        }
        if let Err(e) = self.registry.remove(mint).await {
            warn!("Failed to remove subscription for {}: {}", mint, e);
        }
        BuyOutcome::Failed(reason)
    }

    async fn skip(&self, mint: &Pubkey, reason: &str) {
        if let Err(e) = self.positions.mark_skipped(mint, reason).await {
            warn!("Failed to mark {} skipped: {}", mint, e);
        }
    }

    /// Load persisted positions and subscription records
    pub async fn load_state(&self) -> Result<()> {
        self.registry.reload().await?;
        self.positions.load().await?;
        Ok(())
    }

    /// Restore state after a restart: reload, re-subscribe and re-monitor
    /// held positions, drop records nothing holds any more
    pub async fn resume(self: &Arc<Self>) -> Result<()> {
        self.load_state().await?;

        for position in self.positions.all().await {
            match position.status {
                PositionStatus::Discovered | PositionStatus::Filtering => {
                    if let Err(e) = self
                        .positions
                        .mark_failed(&position.mint, "interrupted before buying")
                        .await
                    {
                        error!("Failed to mark {} failed: {}", position.mint, e);
                    }
                }
                status if status.is_held() => match position.pool_keys {
                    Some(keys) => {
                        info!("Resuming {} ({})", position.mint, status);
                        self.start_monitoring(position.mint, keys).await;
                    }
                    None => {
                        if let Err(e) = self
                            .positions
                            .mark_failed(&position.mint, "held position without pool keys")
                            .await
                        {
                            error!("Failed to mark {} failed: {}", position.mint, e);
                        }
                    }
                },
                _ => {}
            }
        }

        for record in self.registry.records().await {
            let held = self
                .positions
                .get(&record.mint)
                .await
                .map(|p| p.status.is_held())
                .unwrap_or(false);
            if !held {
                if let Err(e) = self.registry.remove(&record.mint).await {
                    warn!("Failed to drop stale subscription for {}: {}", record.mint, e);
                }
            }
        }

        info!(
            "Resumed: {} position(s), {} subscription(s), {} monitor(s)",
            self.positions.position_count().await,
            self.registry.len().await,
            self.monitors.len()
        );
        Ok(())
    }

    /// Resume, then process events until the channel closes or shutdown.
    /// Each event runs in its own task.
    pub async fn run(self: &Arc<Self>, mut events: mpsc::Receiver<DiscoveryEvent>) -> Result<()> {
        self.resume().await?;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Event channel closed");
                        break;
                    };
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.handle_event(event).await;
                    });
                }
            }
        }

        Ok(())
    }

    /// Stop monitors and tear down every subscription
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down coordinator...");
        self.shutdown.cancel();
        for entry in self.monitors.iter() {
            entry.value().cancel();
        }
        self.monitors.clear();
        self.registry.clear_all().await
    }
}
