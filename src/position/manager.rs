//! Position management
//!
//! One [`Position`] per mint, persisted on every change. Status moves only
//! along the lifecycle edges in [`PositionStatus::can_transition_to`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pool::{parse_pubkey, serde_pubkey, PoolKeys};
use crate::store::RecordStore;

/// Lifecycle state of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Discovered,
    Filtering,
    BuyPending,
    Bought,
    Monitoring,
    SellPending,
    Sold,
    Failed,
    Skipped,
}

impl PositionStatus {
    /// Sold, Failed and Skipped only leave through an explicit reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sold | Self::Failed | Self::Skipped)
    }

    /// Holding tokens (or possibly holding, while a sell is in flight)
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Bought | Self::Monitoring | Self::SellPending)
    }

    pub fn can_transition_to(&self, next: PositionStatus) -> bool {
        use PositionStatus::*;

        if *self == next {
            return !self.is_terminal();
        }

        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Discovered, Filtering | BuyPending | Skipped) => true,
            (Filtering, BuyPending | Skipped) => true,
            (BuyPending, Bought) => true,
            (Bought, Monitoring) => true,
            (Monitoring, SellPending) => true,
            (SellPending, Sold | Monitoring) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Filtering => "filtering",
            Self::BuyPending => "buy_pending",
            Self::Bought => "bought",
            Self::Monitoring => "monitoring",
            Self::SellPending => "sell_pending",
            Self::Sold => "sold",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// A single position in a token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Token mint address
    #[serde(with = "serde_pubkey")]
    pub mint: Pubkey,
    /// Pool the token was discovered in
    #[serde(with = "serde_pubkey")]
    pub pool_id: Pubkey,
    /// Resolved pool addresses (set once the buy flow resolves them)
    pub pool_keys: Option<PoolKeys>,
    pub status: PositionStatus,
    /// SOL per token at purchase
    pub purchase_price: Option<f64>,
    /// Raw token amount bought
    pub purchase_amount: Option<u64>,
    pub buy_signature: Option<String>,
    pub sell_signature: Option<String>,
    pub highest_price_seen: Option<f64>,
    pub trailing_stop_threshold: Option<f64>,
    /// Latest wallet balance reported by the account feed
    pub held_amount: Option<u64>,
    pub last_error: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(mint: Pubkey, pool_id: Pubkey) -> Self {
        let now = Utc::now();
        Self {
            mint,
            pool_id,
            pool_keys: None,
            status: PositionStatus::Discovered,
            purchase_price: None,
            purchase_amount: None,
            buy_signature: None,
            sell_signature: None,
            highest_price_seen: None,
            trailing_stop_threshold: None,
            held_amount: None,
            last_error: None,
            discovered_at: now,
            updated_at: now,
        }
    }

    /// Amount a sell should dispose of
    pub fn sell_amount(&self) -> Option<u64> {
        self.held_amount
            .filter(|amount| *amount > 0)
            .or(self.purchase_amount)
    }

    /// Unrealized P&L percentage at `price`
    pub fn unrealized_pnl_pct(&self, price: f64) -> Option<f64> {
        match self.purchase_price {
            Some(entry) if entry > 0.0 => Some((price - entry) / entry * 100.0),
            _ => None,
        }
    }
}

/// Position manager
///
/// Mutations are serialized by `writes` and hit the store before the
/// in-memory map, so readers never wait on file I/O.
pub struct PositionManager {
    positions: RwLock<HashMap<Pubkey, Position>>,
    writes: Mutex<()>,
    store: Arc<dyn RecordStore<Position>>,
}

impl PositionManager {
    /// Create a new position manager
    pub fn new(store: Arc<dyn RecordStore<Position>>) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            writes: Mutex::new(()),
            store,
        }
    }

    /// Load persisted positions, replacing what is in memory
    pub async fn load(&self) -> Result<usize> {
        let _writer = self.writes.lock().await;
        let records = self.store.load_all().await?;
        let mut positions = self.positions.write().await;
        positions.clear();

        for (key, position) in records {
            match parse_pubkey(&key) {
                Ok(mint) if mint == position.mint => {
                    positions.insert(mint, position);
                }
                _ => warn!("Ignoring persisted position under bad key {}", key),
            }
        }

        info!("Loaded {} positions", positions.len());
        Ok(positions.len())
    }

    /// Write one position through to the store
    async fn persist(&self, position: &Position) -> Result<()> {
        self.store
            .put(&position.mint.to_string(), position)
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))
    }

    /// Apply `f` to a copy of the position, persist it, then publish it
    async fn update<F>(&self, mint: &Pubkey, f: F) -> Result<Position>
    where
        F: FnOnce(&mut Position) -> Result<()>,
    {
        let _writer = self.writes.lock().await;
        let mut updated = self
            .get(mint)
            .await
            .ok_or_else(|| Error::PositionNotFound(mint.to_string()))?;

        f(&mut updated)?;
        updated.updated_at = Utc::now();

        self.persist(&updated).await?;
        self.positions.write().await.insert(*mint, updated.clone());
        Ok(updated)
    }

    /// Register a newly discovered mint.
    ///
    /// Returns `false` (and changes nothing) when the mint is already known,
    /// whatever its status.
    pub async fn discover(&self, mint: Pubkey, pool_id: Pubkey) -> Result<bool> {
        let _writer = self.writes.lock().await;
        if self.positions.read().await.contains_key(&mint) {
            debug!("Ignoring duplicate discovery of {}", mint);
            return Ok(false);
        }

        let position = Position::new(mint, pool_id);
        self.persist(&position).await?;
        self.positions.write().await.insert(mint, position);

        info!("Discovered {} in pool {}", mint, pool_id);
        Ok(true)
    }

    /// Move to `next`, returning the previous status
    pub async fn transition(&self, mint: &Pubkey, next: PositionStatus) -> Result<PositionStatus> {
        let mut previous = next;
        self.update(mint, |position| {
            previous = position.status;
            if !position.status.can_transition_to(next) {
                return Err(Error::InvalidTransition {
                    mint: mint.to_string(),
                    from: position.status.to_string(),
                    to: next.to_string(),
                });
            }
            position.status = next;
            Ok(())
        })
        .await?;

        if previous != next {
            debug!("{}: {} -> {}", mint, previous, next);
        }
        Ok(previous)
    }

    pub async fn set_pool_keys(&self, mint: &Pubkey, keys: PoolKeys) -> Result<()> {
        self.update(mint, |position| {
            position.pool_keys = Some(keys);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// Record the purchase and move BuyPending -> Bought. The purchase
    /// fields can only be written once.
    pub async fn mark_bought(
        &self,
        mint: &Pubkey,
        price: f64,
        amount: u64,
        signature: String,
    ) -> Result<Position> {
        self.update(mint, |position| {
            if position.buy_signature.is_some() || position.purchase_price.is_some() {
                return Err(Error::PurchaseAlreadyRecorded(mint.to_string()));
            }
            if !position.status.can_transition_to(PositionStatus::Bought)
                || position.status == PositionStatus::Bought
            {
                return Err(Error::InvalidTransition {
                    mint: mint.to_string(),
                    from: position.status.to_string(),
                    to: PositionStatus::Bought.to_string(),
                });
            }

            position.status = PositionStatus::Bought;
            position.purchase_price = Some(price);
            position.purchase_amount = Some(amount);
            position.buy_signature = Some(signature);
            position.last_error = None;
            Ok(())
        })
        .await
    }

    /// Keep the monitor's peak and stop level. Ignored unless Monitoring;
    /// unchanged levels are not written again.
    pub async fn update_trailing(&self, mint: &Pubkey, highest: f64, threshold: f64) -> Result<bool> {
        match self.get(mint).await {
            Some(position)
                if position.status == PositionStatus::Monitoring
                    && position.highest_price_seen == Some(highest)
                    && position.trailing_stop_threshold == Some(threshold) =>
            {
                return Ok(true);
            }
            Some(position) if position.status != PositionStatus::Monitoring => return Ok(false),
            _ => {}
        }

        let mut applied = false;
        self.update(mint, |position| {
            if position.status == PositionStatus::Monitoring {
                position.highest_price_seen = Some(highest);
                position.trailing_stop_threshold = Some(threshold);
                applied = true;
            }
            Ok(())
        })
        .await?;
        Ok(applied)
    }

    /// Latest wallet balance; `None` for unknown mints
    pub async fn set_held_amount(&self, mint: &Pubkey, amount: u64) -> Result<Option<Position>> {
        match self
            .update(mint, |position| {
                position.held_amount = Some(amount);
                Ok(())
            })
            .await
        {
            Ok(position) => Ok(Some(position)),
            Err(Error::PositionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// SellPending -> Sold
    pub async fn mark_sold(&self, mint: &Pubkey, signature: String) -> Result<Position> {
        self.update(mint, |position| {
            if position.status != PositionStatus::SellPending {
                return Err(Error::InvalidTransition {
                    mint: mint.to_string(),
                    from: position.status.to_string(),
                    to: PositionStatus::Sold.to_string(),
                });
            }
            position.status = PositionStatus::Sold;
            position.sell_signature = Some(signature);
            position.last_error = None;
            Ok(())
        })
        .await
    }

    /// Terminal failure with a reason. Already-terminal positions are left
    /// as they are.
    pub async fn mark_failed(&self, mint: &Pubkey, reason: impl Into<String>) -> Result<()> {
        self.finish(mint, PositionStatus::Failed, reason.into()).await
    }

    pub async fn mark_skipped(&self, mint: &Pubkey, reason: impl Into<String>) -> Result<()> {
        self.finish(mint, PositionStatus::Skipped, reason.into()).await
    }

    async fn finish(&self, mint: &Pubkey, status: PositionStatus, reason: String) -> Result<()> {
        self.update(mint, |position| {
            if position.status.is_terminal() {
                return Ok(());
            }
            if !position.status.can_transition_to(status) {
                return Err(Error::InvalidTransition {
                    mint: mint.to_string(),
                    from: position.status.to_string(),
                    to: status.to_string(),
                });
            }
            info!("{} -> {}: {}", mint, status, reason);
            position.status = status;
            position.last_error = Some(reason);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// Record a non-terminal error for status display
    pub async fn note_error(&self, mint: &Pubkey, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.update(mint, |position| {
            position.last_error = Some(reason);
            Ok(())
        })
        .await
        .map(|_| ())
    }

    /// Forget a finished position so the mint can be discovered again
    pub async fn reset(&self, mint: &Pubkey) -> Result<Position> {
        let _writer = self.writes.lock().await;
        let position = self
            .get(mint)
            .await
            .ok_or_else(|| Error::PositionNotFound(mint.to_string()))?;

        if !position.status.is_terminal() {
            return Err(Error::InvalidTransition {
                mint: mint.to_string(),
                from: position.status.to_string(),
                to: PositionStatus::Discovered.to_string(),
            });
        }

        self.store
            .delete(&mint.to_string())
            .await
            .map_err(|e| Error::PositionPersistence(e.to_string()))?;

        info!("Reset position {}", mint);
        self.positions
            .write()
            .await
            .remove(mint)
            .ok_or_else(|| Error::PositionNotFound(mint.to_string()))
    }

    /// Get a position by mint
    pub async fn get(&self, mint: &Pubkey) -> Option<Position> {
        self.positions.read().await.get(mint).cloned()
    }

    /// Get all positions
    pub async fn all(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    /// Positions currently holding tokens
    pub async fn held(&self) -> Vec<Position> {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.status.is_held())
            .cloned()
            .collect()
    }

    /// Get position count
    pub async fn position_count(&self) -> usize {
        self.positions.read().await.len()
    }
}
