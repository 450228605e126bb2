//! Pool filtering
//!
//! Each [`PoolFilter`] answers one yes/no question about a pool. The
//! [`FilterGate`] runs them in priority order with bounded polling.

use async_trait::async_trait;

use crate::error::Result;
use crate::pool::PoolKeys;

pub mod gate;
pub mod predicates;

pub use gate::{FilterGate, GateVerdict};
pub use predicates::{build_filters, BurnFilter, PoolSizeFilter, RenouncedFreezeFilter};

/// Result of one predicate on one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub ok: bool,
    pub reason: String,
    /// Failing this can never turn into a pass; stop polling
    pub hard_reject: bool,
}

impl FilterOutcome {
    pub fn pass() -> Self {
        Self {
            ok: true,
            reason: String::new(),
            hard_reject: false,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            hard_reject: false,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            hard_reject: true,
        }
    }
}

/// A single pool predicate
#[async_trait]
pub trait PoolFilter: Send + Sync {
    /// Name for logging
    fn name(&self) -> &'static str;

    /// Evaluate the pool once. An `Err` counts as a failed poll.
    async fn check(&self, pool: &PoolKeys) -> Result<FilterOutcome>;
}
