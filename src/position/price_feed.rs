//! Pool price feed
//!
//! Reads both vault balances of a pool and turns them into a SOL-per-token
//! price. This is what the entry and exit monitors poll.
//!
//! WARNING: exits are best-effort. Between two polls a fast rug can gap
//! straight through the stop-loss.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::accounts::{require, token_amount};
use crate::error::{Error, Result};
use crate::pool::PoolKeys;
use crate::trading::ledger::Ledger;

/// Price as SOL per token, both sides decimal adjusted.
///
/// `None` when the token side is empty.
pub fn compute_price(token_raw: u64, token_decimals: u8, sol_raw: u64, sol_decimals: u8) -> Option<f64> {
    if token_raw == 0 {
        return None;
    }

    let token = token_raw as f64 / 10f64.powi(token_decimals as i32);
    let sol = sol_raw as f64 / 10f64.powi(sol_decimals as i32);
    Some(sol / token)
}

/// Source of the current pool price
#[async_trait]
pub trait ReserveSource: Send + Sync {
    async fn price(&self, pool: &PoolKeys) -> Result<f64>;
}

/// [`ReserveSource`] reading the vault token accounts from the ledger
pub struct LedgerReserveSource {
    ledger: Arc<dyn Ledger>,
}

impl LedgerReserveSource {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ReserveSource for LedgerReserveSource {
    async fn price(&self, pool: &PoolKeys) -> Result<f64> {
        let mut accounts = self
            .ledger
            .multiple_accounts(&[pool.token_vault, pool.sol_vault])
            .await?
            .into_iter();

        let token_vault = require(accounts.next().flatten(), &pool.token_vault)?;
        let sol_vault = require(accounts.next().flatten(), &pool.sol_vault)?;

        let token_raw = token_amount(&token_vault)?;
        let sol_raw = token_amount(&sol_vault)?;

        let price = compute_price(token_raw, pool.token_decimals, sol_raw, pool.sol_decimals)
            .ok_or_else(|| Error::EmptyReserve(pool.id.to_string()))?;

        debug!(
            "Pool {} reserves: {} token / {} lamports -> {:.12} SOL",
            pool.id, token_raw, sol_raw, price
        );
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::tests::token_account;
    use crate::pool::tests::descriptor;
    use crate::pool::WSOL_MINT;
    use crate::trading::ledger::tests::FakeLedger;
    use solana_sdk::pubkey::Pubkey;

    #[test]
    fn test_compute_price_adjusts_decimals() {
        // 1,000,000 tokens (6 decimals) against 30 SOL
        let price = compute_price(1_000_000_000_000, 6, 30_000_000_000, 9).unwrap();
        assert!((price - 0.00003).abs() < 1e-12);

        assert_eq!(compute_price(0, 6, 30_000_000_000, 9), None);
    }

    #[tokio::test]
    async fn test_ledger_reserve_source() {
        let ledger = Arc::new(FakeLedger::new(1));
        let mint = Pubkey::new_unique();
        let pool = PoolKeys::resolve(Pubkey::new_unique(), &descriptor(mint)).unwrap();

        ledger.set_account(pool.token_vault, token_account(mint, 2_000_000_000));
        ledger.set_account(pool.sol_vault, token_account(*WSOL_MINT, 10_000_000_000));

        let source = LedgerReserveSource::new(ledger.clone());
        // 2000 tokens against 10 SOL
        let price = source.price(&pool).await.unwrap();
        assert!((price - 0.005).abs() < 1e-12);

        ledger.set_account(pool.token_vault, token_account(mint, 0));
        assert!(matches!(source.price(&pool).await, Err(Error::EmptyReserve(_))));
    }
}
