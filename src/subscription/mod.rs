//! Subscription lifecycle
//!
//! Every held position has a live account-feed subscription on the wallet's
//! token account for that mint. [`SubscriptionRegistry`] keeps the live
//! handles, the in-memory records and the persisted records in step, and
//! restores the records after a restart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::pool::{parse_pubkey, serde_pubkey};
use crate::store::RecordStore;

pub mod pubsub;

pub use pubsub::PubsubAccountFeed;

/// Handle of one live feed subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Account-change feed
#[async_trait]
pub trait AccountFeed: Send + Sync {
    /// Start streaming balance changes of `account` (holding `mint`)
    async fn subscribe(&self, mint: Pubkey, account: Pubkey) -> Result<SubscriptionId>;

    /// Stop a subscription
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    #[serde(with = "serde_pubkey")]
    pub mint: Pubkey,
    /// Token account being watched
    #[serde(with = "serde_pubkey")]
    pub account: Pubkey,
    pub handle: SubscriptionId,
    /// Whether `handle` belongs to this process (false after a reload)
    #[serde(skip)]
    pub live: bool,
}

/// Registry of per-mint subscriptions.
///
/// Every operation holds the registry mutex across its feed and store work,
/// so operations never interleave and memory and store agree on return.
pub struct SubscriptionRegistry {
    feed: Arc<dyn AccountFeed>,
    store: Arc<dyn RecordStore<SubscriptionRecord>>,
    records: Mutex<HashMap<Pubkey, SubscriptionRecord>>,
}

impl SubscriptionRegistry {
    pub fn new(
        feed: Arc<dyn AccountFeed>,
        store: Arc<dyn RecordStore<SubscriptionRecord>>,
    ) -> Self {
        Self {
            feed,
            store,
            records: Mutex::new(HashMap::new()),
        }
    }

    async fn teardown(&self, record: &SubscriptionRecord) {
        if !record.live {
            return;
        }
        if let Err(e) = self.feed.unsubscribe(record.handle).await {
            warn!(
                "Failed to tear down subscription {} for {}: {}",
                record.handle, record.mint, e
            );
        }
    }

    /// Subscribe `account` for `mint`.
    ///
    /// A live record for the same account is kept as is. A stale or
    /// different one is torn down and replaced.
    pub async fn add(&self, mint: Pubkey, account: Pubkey) -> Result<SubscriptionRecord> {
        let mut records = self.records.lock().await;

        if let Some(existing) = records.get(&mint) {
            if existing.live && existing.account == account {
                debug!("Subscription for {} already live", mint);
                return Ok(existing.clone());
            }
            self.teardown(existing).await;
        }

        let handle = self.feed.subscribe(mint, account).await?;
        let record = SubscriptionRecord {
            mint,
            account,
            handle,
            live: true,
        };

        if let Err(e) = self.store.put(&mint.to_string(), &record).await {
            self.teardown(&record).await;
            // The old record (if any) is gone from the feed either way
            records.remove(&mint);
            let _ = self.store.delete(&mint.to_string()).await;
            return Err(e);
        }

        info!("Subscribed {} ({}) as {}", mint, account, handle);
        records.insert(mint, record.clone());
        Ok(record)
    }

    /// Tear down and forget the subscription for `mint`. Absent mints are
    /// a no-op.
    pub async fn remove(&self, mint: &Pubkey) -> Result<()> {
        let mut records = self.records.lock().await;

        let Some(record) = records.remove(mint) else {
            return Ok(());
        };

        self.teardown(&record).await;
        self.store.delete(&mint.to_string()).await?;

        debug!("Removed subscription for {}", mint);
        Ok(())
    }

    /// Tear down everything and empty the store
    pub async fn clear_all(&self) -> Result<()> {
        let mut records = self.records.lock().await;

        for record in records.values() {
            self.teardown(record).await;
        }
        records.clear();
        self.store.clear().await?;

        info!("Cleared all subscriptions");
        Ok(())
    }

    /// Restore persisted records (without live handles)
    pub async fn reload(&self) -> Result<usize> {
        let mut records = self.records.lock().await;
        let persisted = self.store.load_all().await?;

        for record in records.values() {
            self.teardown(record).await;
        }
        records.clear();

        for (key, mut record) in persisted {
            match parse_pubkey(&key) {
                Ok(mint) if mint == record.mint => {
                    record.live = false;
                    records.insert(mint, record);
                }
                _ => warn!("Ignoring persisted subscription under bad key {}", key),
            }
        }

        info!("Reloaded {} subscription record(s)", records.len());
        Ok(records.len())
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn contains(&self, mint: &Pubkey) -> bool {
        self.records.lock().await.contains_key(mint)
    }

    pub async fn get(&self, mint: &Pubkey) -> Option<SubscriptionRecord> {
        self.records.lock().await.get(mint).cloned()
    }

    pub async fn records(&self) -> Vec<SubscriptionRecord> {
        self.records.lock().await.values().cloned().collect()
    }
}
