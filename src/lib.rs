//! Pool Sniper Library
//!
//! Snipes newly created liquidity pools: bounded filter gating, single-flight
//! buys with retry, and take-profit / trailing stop-loss exits.

pub mod accounts;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod pool;
pub mod position;
pub mod store;
pub mod stream;
pub mod subscription;
pub mod trading;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{BuyOutcome, SellOutcome, TradeCoordinator};
pub use error::{Error, Result};
