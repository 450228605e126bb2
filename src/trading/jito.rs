//! Jito bundle submission client
//!
//! Bundles are sent identically to every configured regional block engine
//! at once. The first engine to accept wins; the rest are ignored.

use futures::future::{select_ok, BoxFuture};
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::JitoConfig;
use crate::error::{Error, Result};
use crate::trading::http::JsonTransport;
use crate::trading::transaction::encode_base58;

/// Jito tip accounts - use one of these for bundle tips
/// Do NOT use Address Lookup Tables for tip accounts
pub const JITO_TIP_ACCOUNTS: [&str; 8] = [
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
    "DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh",
    "ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt",
    "DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL",
    "3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT",
];

/// Maximum transactions the block engine accepts per bundle
pub const MAX_BUNDLE_SIZE: usize = 5;

/// A bundle accepted by one block engine
#[derive(Debug, Clone, PartialEq)]
pub struct BundleAccepted {
    /// Bundle ID returned by the block engine
    pub bundle_id: String,
    /// Block engine that accepted first
    pub endpoint: String,
}

/// Jito client for bundle submission
pub struct JitoClient {
    config: JitoConfig,
    tip_accounts: Vec<Pubkey>,
    transport: Arc<dyn JsonTransport>,
}

impl JitoClient {
    /// Create a new Jito client
    pub fn new(config: JitoConfig, transport: Arc<dyn JsonTransport>) -> Result<Self> {
        let tip_accounts = JITO_TIP_ACCOUNTS
            .iter()
            .map(|s| Pubkey::from_str(s))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("Invalid tip account: {}", e)))?;

        info!(
            "Jito client initialized for {} block engine(s)",
            config.block_engine_urls.len()
        );

        Ok(Self {
            config,
            tip_accounts,
            transport,
        })
    }

    /// Get a random tip account; a fresh pick per call spreads contention
    pub fn get_tip_account(&self) -> Pubkey {
        use rand::Rng;
        let idx = rand::thread_rng().gen_range(0..self.tip_accounts.len());
        self.tip_accounts[idx]
    }

    /// Clamp tip to configured bounds
    pub fn clamp_tip(&self, tip: u64) -> u64 {
        tip.clamp(self.config.min_tip_lamports, self.config.max_tip_lamports)
    }

    /// Configured tip, clamped
    pub fn tip_lamports(&self) -> u64 {
        self.clamp_tip(self.config.tip_lamports)
    }

    /// Submit the bundle to every block engine in parallel.
    ///
    /// Resolves with the first acceptance. Fails only when every engine
    /// failed, carrying the last failure.
    pub async fn send_bundle(&self, transactions: &[VersionedTransaction]) -> Result<BundleAccepted> {
        if transactions.is_empty() {
            return Err(Error::JitoBundleSubmission("Empty bundle".to_string()));
        }

        if transactions.len() > MAX_BUNDLE_SIZE {
            return Err(Error::JitoBundleSubmission(format!(
                "Bundle cannot contain more than {} transactions",
                MAX_BUNDLE_SIZE
            )));
        }

        if self.config.block_engine_urls.is_empty() {
            return Err(Error::Config("No block engine urls configured".to_string()));
        }

        let encoded = transactions
            .iter()
            .map(encode_base58)
            .collect::<Result<Vec<_>>>()?;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [encoded],
        });

        info!(
            "Submitting bundle with {} transactions to {} block engine(s)",
            transactions.len(),
            self.config.block_engine_urls.len()
        );

        let attempts: Vec<BoxFuture<'_, Result<BundleAccepted>>> = self
            .config
            .block_engine_urls
            .iter()
            .map(|url| Box::pin(self.send_to(url, &body)) as BoxFuture<'_, Result<BundleAccepted>>)
            .collect();

        let result = select_ok(attempts).await;
        match result {
            Ok((accepted, _pending)) => {
                debug!(
                    "Bundle {} accepted by {}",
                    accepted.bundle_id, accepted.endpoint
                );
                Ok(accepted)
            }
            Err(e) => Err(Error::JitoBundleSubmission(format!(
                "all block engines failed, last error: {}",
                e
            ))),
        }
    }

    /// Single block engine attempt
    async fn send_to(&self, base_url: &str, body: &Value) -> Result<BundleAccepted> {
        let endpoint = format!("{}/api/v1/bundles", base_url.trim_end_matches('/'));

        let response = self.transport.post_json(&endpoint, body).await.map_err(|e| {
            warn!("Block engine {} failed: {}", base_url, e);
            e
        })?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            warn!("Block engine {} rejected bundle: {}", base_url, message);
            return Err(Error::JitoBundleRejected(message));
        }

        let bundle_id = response
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::JitoBundleRejected("Missing bundle id".to_string()))?;

        Ok(BundleAccepted {
            bundle_id: bundle_id.to_string(),
            endpoint: base_url.to_string(),
        })
    }
}

/// Builder for creating bundles with proper tip placement
pub struct BundleBuilder {
    tip: VersionedTransaction,
    transactions: Vec<VersionedTransaction>,
}

impl BundleBuilder {
    /// The tip transaction always leads the bundle
    pub fn new(tip: VersionedTransaction) -> Self {
        Self {
            tip,
            transactions: Vec::new(),
        }
    }

    /// Add a transaction to the bundle
    pub fn add_transaction(mut self, tx: VersionedTransaction) -> Self {
        self.transactions.push(tx);
        self
    }

    pub fn add_transactions(mut self, txs: impl IntoIterator<Item = VersionedTransaction>) -> Self {
        self.transactions.extend(txs);
        self
    }

    /// Build the ordered bundle `[tip, ...]`
    pub fn build(self) -> Result<Vec<VersionedTransaction>> {
        if self.transactions.is_empty() {
            return Err(Error::JitoBundleSubmission(
                "No transactions besides the tip".to_string(),
            ));
        }

        if self.transactions.len() + 1 > MAX_BUNDLE_SIZE {
            return Err(Error::JitoBundleSubmission(format!(
                "Bundle cannot exceed {} transactions",
                MAX_BUNDLE_SIZE
            )));
        }

        let mut bundle = Vec::with_capacity(self.transactions.len() + 1);
        bundle.push(self.tip);
        bundle.extend(self.transactions);
        Ok(bundle)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::trading::transaction::build_transfer;
    use async_trait::async_trait;
    use solana_sdk::hash::Hash;
    use solana_sdk::signature::Keypair;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Transport answering per URL, recording every call
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub responses: Mutex<HashMap<String, Result<Value>>>,
        pub calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn respond(&self, url: &str, response: Result<Value>) {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), response);
        }
    }

    #[async_trait]
    impl JsonTransport for ScriptedTransport {
        async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone()));
            match self.responses.lock().unwrap().get(url) {
                Some(Ok(v)) => Ok(v.clone()),
                Some(Err(e)) => Err(Error::Http(e.to_string())),
                None => Err(Error::Http(format!("connection refused: {}", url))),
            }
        }

        async fn get_json(&self, url: &str, _query: &[(&str, String)]) -> Result<Value> {
            self.post_json(url, &Value::Null).await
        }
    }

    pub(crate) fn test_config(urls: &[&str]) -> JitoConfig {
        JitoConfig {
            block_engine_urls: urls.iter().map(|u| u.to_string()).collect(),
            tip_lamports: 50000,
            min_tip_lamports: 10000,
            max_tip_lamports: 1000000,
            retry_base_delay_ms: 50,
            request_timeout_ms: 1000,
        }
    }

    fn transfer() -> VersionedTransaction {
        build_transfer(&Keypair::new(), &Pubkey::new_unique(), 1, Hash::new_unique())
    }

    #[test]
    fn test_jito_client_creation() {
        let client =
            JitoClient::new(test_config(&["https://ny"]), Arc::new(ScriptedTransport::default()))
                .unwrap();
        assert_eq!(client.tip_accounts.len(), 8);
        assert!(client.tip_accounts.contains(&client.get_tip_account()));
    }

    #[test]
    fn test_tip_clamping() {
        let client =
            JitoClient::new(test_config(&["https://ny"]), Arc::new(ScriptedTransport::default()))
                .unwrap();

        assert_eq!(client.clamp_tip(5000), 10000); // Below min
        assert_eq!(client.clamp_tip(50000), 50000); // In range
        assert_eq!(client.clamp_tip(2000000), 1000000); // Above max
    }

    #[tokio::test]
    async fn test_first_success_wins_when_other_regions_fail() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond(
            "https://tokyo/api/v1/bundles",
            Ok(json!({"jsonrpc": "2.0", "id": 1, "result": "bundle-123"})),
        );
        transport.respond(
            "https://ny/api/v1/bundles",
            Ok(json!({"error": {"code": -32000, "message": "rate limited"}})),
        );
        // amsterdam has no scripted response -> connection refused

        let client = JitoClient::new(
            test_config(&["https://ny", "https://amsterdam", "https://tokyo/"]),
            transport.clone(),
        )
        .unwrap();

        let accepted = client.send_bundle(&[transfer(), transfer()]).await.unwrap();
        assert_eq!(accepted.bundle_id, "bundle-123");
        assert_eq!(accepted.endpoint, "https://tokyo/");

        // The identical payload went to every region
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, body)| body == &calls[0].1));
        assert_eq!(calls[0].1["method"], "sendBundle");
        assert_eq!(calls[0].1["params"][0].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_all_regions_failing_is_an_error() {
        let client = JitoClient::new(
            test_config(&["https://ny", "https://amsterdam"]),
            Arc::new(ScriptedTransport::default()),
        )
        .unwrap();

        let result = client.send_bundle(&[transfer()]).await;
        assert!(matches!(result, Err(Error::JitoBundleSubmission(_))));
    }

    #[tokio::test]
    async fn test_oversized_bundle_rejected() {
        let client =
            JitoClient::new(test_config(&["https://ny"]), Arc::new(ScriptedTransport::default()))
                .unwrap();
        let txs: Vec<_> = (0..6).map(|_| transfer()).collect();
        assert!(client.send_bundle(&txs).await.is_err());
    }

    #[test]
    fn test_bundle_builder_puts_tip_first() {
        let tip = transfer();
        let swap = transfer();
        let bundle = BundleBuilder::new(tip.clone())
            .add_transaction(swap.clone())
            .build()
            .unwrap();

        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle[0].signatures, tip.signatures);
        assert_eq!(bundle[1].signatures, swap.signatures);

        // Tip alone is not a bundle
        assert!(BundleBuilder::new(transfer()).build().is_err());
    }
}
