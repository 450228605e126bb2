//! Single-endpoint relay submission
//!
//! The relay accepts already-signed transactions and propagates them itself.
//! It may charge a fee, paid by a transfer placed in front of the swap.

use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::pool::parse_pubkey;
use crate::trading::http::JsonTransport;
use crate::trading::ledger::BlockhashWindow;
use crate::trading::transaction::encode_base58;

pub struct RelayClient {
    url: String,
    fee: Option<(Pubkey, u64)>,
    transport: Arc<dyn JsonTransport>,
}

impl RelayClient {
    pub fn new(config: &RelayConfig, transport: Arc<dyn JsonTransport>) -> Result<Self> {
        if config.url.is_empty() {
            return Err(Error::Config("relay.url is not set".to_string()));
        }

        let fee = if config.fee_lamports > 0 {
            Some((parse_pubkey(&config.fee_wallet)?, config.fee_lamports))
        } else {
            None
        };

        Ok(Self {
            url: config.url.clone(),
            fee,
            transport,
        })
    }

    /// Fee recipient and amount, when the relay charges one
    pub fn fee(&self) -> Option<(Pubkey, u64)> {
        self.fee
    }

    /// Hand the transactions to the relay. The relay answering with an
    /// error is a [`Error::RelaySubmission`].
    pub async fn send(
        &self,
        transactions: &[VersionedTransaction],
        window: &BlockhashWindow,
    ) -> Result<()> {
        let encoded = transactions
            .iter()
            .map(encode_base58)
            .collect::<Result<Vec<_>>>()?;

        let body = json!({
            "transactions": encoded,
            "latestBlockhash": window.blockhash.to_string(),
            "lastValidBlockHeight": window.last_valid_block_height,
        });

        let response = self.transport.post_json(&self.url, &body).await?;

        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            warn!("Relay rejected transactions: {}", message);
            return Err(Error::RelaySubmission(message));
        }

        if let Some(signature) = response.get("signature").and_then(Value::as_str) {
            debug!("Relay accepted transaction {}", signature);
        }

        Ok(())
    }
}
