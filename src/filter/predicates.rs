//! Pool predicates, in the order the gate runs them

use async_trait::async_trait;
use solana_sdk::native_token::{lamports_to_sol, sol_to_lamports};
use std::sync::Arc;
use tracing::debug;

use crate::accounts::{decode_mint, require, token_amount};
use crate::config::FilterConfig;
use crate::error::Result;
use crate::filter::{FilterOutcome, PoolFilter};
use crate::pool::PoolKeys;
use crate::trading::ledger::Ledger;

/// SOL-side reserve bounds. Under the minimum can still change; over the
/// cap is a hard reject.
pub struct PoolSizeFilter {
    ledger: Arc<dyn Ledger>,
    min_lamports: u64,
    /// 0 = no cap
    max_lamports: u64,
}

impl PoolSizeFilter {
    pub fn new(ledger: Arc<dyn Ledger>, min_sol: f64, max_sol: f64) -> Self {
        Self {
            ledger,
            min_lamports: sol_to_lamports(min_sol),
            max_lamports: sol_to_lamports(max_sol),
        }
    }
}

#[async_trait]
impl PoolFilter for PoolSizeFilter {
    fn name(&self) -> &'static str {
        "pool_size"
    }

    async fn check(&self, pool: &PoolKeys) -> Result<FilterOutcome> {
        let account = self
            .ledger
            .multiple_accounts(&[pool.sol_vault])
            .await?
            .into_iter()
            .next()
            .flatten();
        let reserve = token_amount(&require(account, &pool.sol_vault)?)?;

        debug!("Pool {} holds {} SOL", pool.id, lamports_to_sol(reserve));

        if self.max_lamports > 0 && reserve > self.max_lamports {
            return Ok(FilterOutcome::reject(format!(
                "pool size {} SOL above cap {} SOL",
                lamports_to_sol(reserve),
                lamports_to_sol(self.max_lamports)
            )));
        }

        if reserve < self.min_lamports {
            return Ok(FilterOutcome::fail(format!(
                "pool size {} SOL below minimum {} SOL",
                lamports_to_sol(reserve),
                lamports_to_sol(self.min_lamports)
            )));
        }

        Ok(FilterOutcome::pass())
    }
}

/// LP tokens burned (LP mint supply is zero)
pub struct BurnFilter {
    ledger: Arc<dyn Ledger>,
}

impl BurnFilter {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl PoolFilter for BurnFilter {
    fn name(&self) -> &'static str {
        "burned"
    }

    async fn check(&self, pool: &PoolKeys) -> Result<FilterOutcome> {
        let account = self
            .ledger
            .multiple_accounts(&[pool.lp_mint])
            .await?
            .into_iter()
            .next()
            .flatten();
        let supply = decode_mint(&require(account, &pool.lp_mint)?)?.supply;

        if supply == 0 {
            Ok(FilterOutcome::pass())
        } else {
            Ok(FilterOutcome::fail(format!("LP not burned ({} outstanding)", supply)))
        }
    }
}

/// Mint authority renounced and/or no freeze authority on the token mint
pub struct RenouncedFreezeFilter {
    ledger: Arc<dyn Ledger>,
    check_renounced: bool,
    check_freezable: bool,
}

impl RenouncedFreezeFilter {
    pub fn new(ledger: Arc<dyn Ledger>, check_renounced: bool, check_freezable: bool) -> Self {
        Self {
            ledger,
            check_renounced,
            check_freezable,
        }
    }
}

#[async_trait]
impl PoolFilter for RenouncedFreezeFilter {
    fn name(&self) -> &'static str {
        "renounced_freeze"
    }

    async fn check(&self, pool: &PoolKeys) -> Result<FilterOutcome> {
        let account = self
            .ledger
            .multiple_accounts(&[pool.token_mint])
            .await?
            .into_iter()
            .next()
            .flatten();
        let mint = decode_mint(&require(account, &pool.token_mint)?)?;

        let mut problems = Vec::new();
        if self.check_renounced && mint.mint_authority.is_some() {
            problems.push("mint authority not renounced");
        }
        if self.check_freezable && mint.freeze_authority.is_some() {
            problems.push("token is freezable");
        }

        if problems.is_empty() {
            Ok(FilterOutcome::pass())
        } else {
            Ok(FilterOutcome::fail(problems.join(", ")))
        }
    }
}

/// The enabled predicates, in priority order
pub fn build_filters(config: &FilterConfig, ledger: Arc<dyn Ledger>) -> Vec<Box<dyn PoolFilter>> {
    let mut filters: Vec<Box<dyn PoolFilter>> = Vec::new();

    if config.min_pool_size_sol > 0.0 || config.max_pool_size_sol > 0.0 {
        filters.push(Box::new(PoolSizeFilter::new(
            ledger.clone(),
            config.min_pool_size_sol,
            config.max_pool_size_sol,
        )));
    }

    if config.check_burned {
        filters.push(Box::new(BurnFilter::new(ledger.clone())));
    }

    if config.check_renounced || config.check_freezable {
        filters.push(Box::new(RenouncedFreezeFilter::new(
            ledger,
            config.check_renounced,
            config.check_freezable,
        )));
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::tests::{mint_account, token_account};
    use crate::pool::tests::descriptor;
    use crate::pool::WSOL_MINT;
    use crate::trading::ledger::tests::FakeLedger;
    use solana_sdk::pubkey::Pubkey;

    fn keys() -> PoolKeys {
        PoolKeys::resolve(Pubkey::new_unique(), &descriptor(Pubkey::new_unique())).unwrap()
    }

    #[tokio::test]
    async fn test_pool_size_bounds() {
        let ledger = Arc::new(FakeLedger::new(1));
        let pool = keys();
        let filter = PoolSizeFilter::new(ledger.clone(), 5.0, 50.0);

        ledger.set_account(pool.sol_vault, token_account(*WSOL_MINT, sol_to_lamports(2.0)));
        let outcome = filter.check(&pool).await.unwrap();
        assert!(!outcome.ok);
        assert!(!outcome.hard_reject);

        ledger.set_account(pool.sol_vault, token_account(*WSOL_MINT, sol_to_lamports(10.0)));
        assert!(filter.check(&pool).await.unwrap().ok);

        ledger.set_account(pool.sol_vault, token_account(*WSOL_MINT, sol_to_lamports(80.0)));
        let outcome = filter.check(&pool).await.unwrap();
        assert!(!outcome.ok);
        assert!(outcome.hard_reject);
    }

    #[tokio::test]
    async fn test_missing_vault_is_error() {
        let ledger = Arc::new(FakeLedger::new(1));
        let filter = PoolSizeFilter::new(ledger, 1.0, 0.0);
        assert!(filter.check(&keys()).await.is_err());
    }

    #[tokio::test]
    async fn test_burn_filter() {
        let ledger = Arc::new(FakeLedger::new(1));
        let pool = keys();
        let filter = BurnFilter::new(ledger.clone());

        ledger.set_account(pool.lp_mint, mint_account(1_000, None, None));
        assert!(!filter.check(&pool).await.unwrap().ok);

        ledger.set_account(pool.lp_mint, mint_account(0, None, None));
        assert!(filter.check(&pool).await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_renounced_and_freeze() {
        let ledger = Arc::new(FakeLedger::new(1));
        let pool = keys();
        let authority = Pubkey::new_unique();

        ledger.set_account(pool.token_mint, mint_account(1, Some(authority), None));
        let strict = RenouncedFreezeFilter::new(ledger.clone(), true, true);
        let outcome = strict.check(&pool).await.unwrap();
        assert!(!outcome.ok);
        assert!(outcome.reason.contains("mint authority"));

        // Only the freeze check enabled: mint authority is ignored
        let freeze_only = RenouncedFreezeFilter::new(ledger.clone(), false, true);
        assert!(freeze_only.check(&pool).await.unwrap().ok);

        ledger.set_account(pool.token_mint, mint_account(1, None, Some(authority)));
        assert!(!freeze_only.check(&pool).await.unwrap().ok);
    }

    #[test]
    fn test_build_filters_order() {
        let ledger: Arc<dyn Ledger> = Arc::new(FakeLedger::new(1));
        let mut config = FilterConfig {
            check_interval_ms: 2000,
            check_duration_ms: 10000,
            min_pool_size_sol: 1.0,
            max_pool_size_sol: 0.0,
            check_burned: true,
            check_renounced: true,
            check_freezable: false,
        };

        let names: Vec<_> = build_filters(&config, ledger.clone())
            .iter()
            .map(|f| f.name())
            .collect();
        assert_eq!(names, vec!["pool_size", "burned", "renounced_freeze"]);

        config.min_pool_size_sol = 0.0;
        config.check_burned = false;
        config.check_renounced = false;
        assert!(build_filters(&config, ledger).is_empty());
    }
}
