//! Pool descriptors and resolved pool keys
//!
//! Discovery hands us an already-decoded [`PoolDescriptor`]. Resolving it
//! into [`PoolKeys`] orients the pool so that the traded token is always the
//! "token" side and wrapped SOL is always the "sol" side, regardless of how
//! the AMM stored them.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Raydium AMM v4 authority (same PDA for every v4 pool)
pub const RAYDIUM_AMM_V4_AUTHORITY_STR: &str = "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1";

/// Decimals of the wrapped native mint
pub const SOL_DECIMALS: u8 = 9;

lazy_static::lazy_static! {
    /// Canonical wrapped SOL mint
    pub static ref WSOL_MINT: Pubkey = spl_token::native_mint::id();

    pub static ref RAYDIUM_AMM_V4_AUTHORITY: Pubkey =
        Pubkey::from_str(RAYDIUM_AMM_V4_AUTHORITY_STR).expect("Invalid AMM authority");
}

/// Parse a base58 pubkey, mapping the failure into our error type
pub fn parse_pubkey(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).map_err(|e| Error::InvalidPubkey {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Pubkeys as base58 strings in JSON (the sdk's default is a byte array)
pub mod serde_pubkey {
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Pubkey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Pubkey::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

fn default_authority() -> Pubkey {
    *RAYDIUM_AMM_V4_AUTHORITY
}

/// Pool state as emitted by the discovery feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDescriptor {
    #[serde(with = "serde_pubkey")]
    pub base_mint: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub quote_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    #[serde(with = "serde_pubkey")]
    pub base_vault: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub quote_vault: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub lp_mint: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub market_id: Pubkey,
    #[serde(with = "serde_pubkey", default = "default_authority")]
    pub authority: Pubkey,
    /// Unix timestamp the pool opens for trading
    #[serde(default)]
    pub open_time: u64,
}

impl PoolDescriptor {
    /// The non-SOL side of the pool (base mint when neither or both are SOL)
    pub fn token_mint(&self) -> Pubkey {
        if self.base_mint == *WSOL_MINT && self.quote_mint != *WSOL_MINT {
            self.quote_mint
        } else {
            self.base_mint
        }
    }
}

/// Pool addresses oriented around the traded token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolKeys {
    #[serde(with = "serde_pubkey")]
    pub id: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub token_mint: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub token_vault: Pubkey,
    pub token_decimals: u8,
    #[serde(with = "serde_pubkey")]
    pub sol_vault: Pubkey,
    pub sol_decimals: u8,
    #[serde(with = "serde_pubkey")]
    pub lp_mint: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub market_id: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub authority: Pubkey,
}

impl PoolKeys {
    /// Resolve a descriptor into oriented keys.
    ///
    /// Fails for pools where neither side is wrapped SOL, and for pools
    /// where both are.
    pub fn resolve(pool_id: Pubkey, pool: &PoolDescriptor) -> Result<Self> {
        let base_is_sol = pool.base_mint == *WSOL_MINT;
        let quote_is_sol = pool.quote_mint == *WSOL_MINT;

        let (token_mint, token_vault, token_decimals, sol_vault, sol_decimals) =
            match (base_is_sol, quote_is_sol) {
                (false, true) => (
                    pool.base_mint,
                    pool.base_vault,
                    pool.base_decimals,
                    pool.quote_vault,
                    pool.quote_decimals,
                ),
                (true, false) => (
                    pool.quote_mint,
                    pool.quote_vault,
                    pool.quote_decimals,
                    pool.base_vault,
                    pool.base_decimals,
                ),
                _ => {
                    return Err(Error::UnsupportedPool {
                        pool: pool_id.to_string(),
                        base: pool.base_mint.to_string(),
                        quote: pool.quote_mint.to_string(),
                    })
                }
            };

        Ok(Self {
            id: pool_id,
            token_mint,
            token_vault,
            token_decimals,
            sol_vault,
            sol_decimals,
            lp_mint: pool.lp_mint,
            market_id: pool.market_id,
            authority: pool.authority,
        })
    }
}
