//! Events consumed by the trade coordinator

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::pool::{serde_pubkey, PoolDescriptor};

/// Event from the discovery feed or the wallet account feed.
///
/// Delivery is at-least-once and unordered; consumers must tolerate
/// duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// A new pool was created
    PoolDiscovered {
        #[serde(with = "serde_pubkey")]
        pool_id: Pubkey,
        pool: PoolDescriptor,
    },
    /// One of our token accounts changed balance
    WalletBalanceChanged {
        #[serde(with = "serde_pubkey")]
        account_id: Pubkey,
        #[serde(with = "serde_pubkey")]
        mint: Pubkey,
        /// Raw token amount now held
        amount: u64,
    },
}

impl DiscoveryEvent {
    /// Token mint the event is about
    pub fn mint(&self) -> Pubkey {
        match self {
            DiscoveryEvent::PoolDiscovered { pool, .. } => pool.token_mint(),
            DiscoveryEvent::WalletBalanceChanged { mint, .. } => *mint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::descriptor;

    #[test]
    fn test_pool_discovered_json() {
        let mint = Pubkey::new_unique();
        let pool_id = Pubkey::new_unique();
        let pool = descriptor(mint);

        let json = serde_json::json!({
            "type": "pool_discovered",
            "pool_id": pool_id.to_string(),
            "pool": serde_json::to_value(&pool).unwrap(),
        });

        let event: DiscoveryEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.mint(), mint);
        assert_eq!(event, DiscoveryEvent::PoolDiscovered { pool_id, pool });
    }

    #[test]
    fn test_wallet_balance_changed_json() {
        let mint = Pubkey::new_unique();
        let account = Pubkey::new_unique();
        let text = format!(
            r#"{{"type":"wallet_balance_changed","account_id":"{}","mint":"{}","amount":42}}"#,
            account, mint
        );

        let event: DiscoveryEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(
            event,
            DiscoveryEvent::WalletBalanceChanged {
                account_id: account,
                mint,
                amount: 42
            }
        );
    }
}
