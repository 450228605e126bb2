//! Bounded price polling for entry and exit decisions

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{poll_budget, AutoSellConfig};
use crate::pool::PoolKeys;
use crate::position::auto_sell::{ExitTracker, TriggerType};
use crate::position::entry::EntryTracker;
use crate::position::price_feed::ReserveSource;

/// How a monitoring round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorResult {
    TakeProfit,
    StopLoss,
    /// Entry signal (pre-buy rounds only)
    Entry,
    /// Budget spent without a signal
    Timeout,
    /// Stop flag raised
    Cancelled,
}

impl From<TriggerType> for MonitorResult {
    fn from(trigger: TriggerType) -> Self {
        match trigger {
            TriggerType::TakeProfit => MonitorResult::TakeProfit,
            TriggerType::StopLoss => MonitorResult::StopLoss,
        }
    }
}

/// Exit state after a poll, reported back to the owner of the position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorTick {
    pub price: f64,
    pub highest_price_seen: f64,
    pub threshold: f64,
}

pub struct PriceMonitor {
    source: Arc<dyn ReserveSource>,
    interval: Duration,
    budget: u32,
}

impl PriceMonitor {
    pub fn new(source: Arc<dyn ReserveSource>, interval: Duration, budget: u32) -> Self {
        Self {
            source,
            interval,
            budget: budget.max(1),
        }
    }

    pub fn from_config(source: Arc<dyn ReserveSource>, config: &AutoSellConfig) -> Self {
        Self::new(
            source,
            Duration::from_millis(config.price_check_interval_ms),
            poll_budget(config.price_check_duration_ms, config.price_check_interval_ms),
        )
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Sleep one interval; `false` if cancelled meanwhile
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => true,
        }
    }

    /// Poll until take-profit, stop-loss, timeout or cancellation.
    ///
    /// `on_tick` sees the tracker state after every successful price read.
    /// Failed reads are logged and still use up an iteration.
    pub async fn watch_exit<F, Fut>(
        &self,
        pool: &PoolKeys,
        tracker: &mut ExitTracker,
        cancel: &CancellationToken,
        mut on_tick: F,
    ) -> MonitorResult
    where
        F: FnMut(MonitorTick) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        for iteration in 1..=self.budget {
            if cancel.is_cancelled() {
                return MonitorResult::Cancelled;
            }

            match self.source.price(pool).await {
                Ok(price) => {
                    let signal = tracker.observe(price);
                    on_tick(MonitorTick {
                        price,
                        highest_price_seen: tracker.highest_price_seen(),
                        threshold: tracker.threshold(),
                    })
                    .await;

                    debug!(
                        "{} price {:.12} (high {:.12}, stop {:.12}, tp {}, sl {})",
                        pool.token_mint,
                        price,
                        tracker.highest_price_seen(),
                        tracker.threshold(),
                        tracker.take_profit_count(),
                        tracker.stop_loss_count()
                    );

                    if let Some(trigger) = signal {
                        info!("{} exit signal {:?} at {:.12}", pool.token_mint, trigger, price);
                        return trigger.into();
                    }
                }
                Err(e) => warn!("Price check {} failed for {}: {}", iteration, pool.token_mint, e),
            }

            if iteration < self.budget && !self.pause(cancel).await {
                return MonitorResult::Cancelled;
            }
        }

        info!("{} exit monitor timed out", pool.token_mint);
        MonitorResult::Timeout
    }

    /// Poll until the entry signal, timeout or cancellation
    pub async fn watch_entry(
        &self,
        pool: &PoolKeys,
        tracker: &mut EntryTracker,
        cancel: &CancellationToken,
    ) -> MonitorResult {
        for iteration in 1..=self.budget {
            if cancel.is_cancelled() {
                return MonitorResult::Cancelled;
            }

            match self.source.price(pool).await {
                Ok(price) => {
                    if tracker.observe(price) {
                        info!("{} entry signal at {:.12}", pool.token_mint, price);
                        return MonitorResult::Entry;
                    }
                }
                Err(e) => warn!("Entry check {} failed for {}: {}", iteration, pool.token_mint, e),
            }

            if iteration < self.budget && !self.pause(cancel).await {
                return MonitorResult::Cancelled;
            }
        }

        MonitorResult::Timeout
    }
}
