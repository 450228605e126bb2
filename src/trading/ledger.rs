//! Ledger RPC access
//!
//! Everything the engine needs from the RPC node goes through [`Ledger`] so
//! the submitters, filters and price feed can run against a fake ledger in
//! tests.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{TransactionError, VersionedTransaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Blockhash a transaction was built against, and the last block height at
/// which it can still land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockhashWindow {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Status of a sent signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Not seen (yet) at the requested commitment
    Pending,
    /// Landed successfully
    Confirmed,
    /// Landed, but the transaction itself failed
    Failed(TransactionError),
}

/// Remote ledger operations used by the engine
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn block_height(&self) -> Result<u64>;

    async fn send_transaction(&self, transaction: &VersionedTransaction) -> Result<Signature>;

    async fn signature_status(&self, signature: &Signature) -> Result<SignatureStatus>;

    /// Fetch several accounts in one round trip; missing accounts are `None`
    async fn multiple_accounts(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>>;
}

/// [`Ledger`] backed by the nonblocking Solana RPC client
pub struct RpcLedger {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl RpcLedger {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let commitment = CommitmentConfig::confirmed();
        Self {
            client: Arc::new(RpcClient::new_with_timeout_and_commitment(
                endpoint, timeout, commitment,
            )),
            commitment,
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn block_height(&self) -> Result<u64> {
        Ok(self.client.get_block_height().await?)
    }

    async fn send_transaction(&self, transaction: &VersionedTransaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: Some(self.commitment.commitment),
            max_retries: Some(0),
            ..Default::default()
        };

        self.client
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(|e| Error::TransactionSend(e.to_string()))
    }

    async fn signature_status(&self, signature: &Signature) -> Result<SignatureStatus> {
        let status = self
            .client
            .get_signature_status_with_commitment(signature, self.commitment)
            .await?;

        debug!("Signature {} status: {:?}", signature, status);

        Ok(match status {
            None => SignatureStatus::Pending,
            Some(Ok(())) => SignatureStatus::Confirmed,
            Some(Err(e)) => SignatureStatus::Failed(e),
        })
    }

    async fn multiple_accounts(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        Ok(self.client.get_multiple_accounts(keys).await?)
    }
}
