//! Transaction submission strategies
//!
//! A [`TransactionSubmitter`] is picked once from configuration and used for
//! every buy and sell. All three variants share the same confirmation rule:
//! poll the signature until it lands, the ledger reports it failed, or the
//! block height passes the blockhash window.

use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, SubmissionMethod};
use crate::error::{Error, Result};
use crate::trading::http::HttpTransport;
use crate::trading::jito::{BundleBuilder, JitoClient};
use crate::trading::ledger::{BlockhashWindow, Ledger, SignatureStatus};
use crate::trading::relay::RelayClient;
use crate::trading::transaction::{build_transfer, first_signature};

/// Consecutive RPC failures tolerated while confirming
const MAX_CONFIRM_RPC_ERRORS: u32 = 10;

/// Submission strategy a request is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Standard,
    PriorityBundle,
    Relay,
}

impl From<SubmissionMethod> for SubmissionKind {
    fn from(method: SubmissionMethod) -> Self {
        match method {
            SubmissionMethod::Standard => Self::Standard,
            SubmissionMethod::PriorityBundle => Self::PriorityBundle,
            SubmissionMethod::Relay => Self::Relay,
        }
    }
}

/// A signed swap plus everything needed to land it
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    transaction: VersionedTransaction,
    prerequisites: Vec<VersionedTransaction>,
    kind: SubmissionKind,
    window: BlockhashWindow,
}

impl SubmissionRequest {
    pub fn new(
        transaction: VersionedTransaction,
        prerequisites: Vec<VersionedTransaction>,
        kind: SubmissionKind,
        window: BlockhashWindow,
    ) -> Self {
        Self {
            transaction,
            prerequisites,
            kind,
            window,
        }
    }

    pub fn transaction(&self) -> &VersionedTransaction {
        &self.transaction
    }

    /// Co-transactions that must land before (or with) the swap
    pub fn prerequisites(&self) -> &[VersionedTransaction] {
        &self.prerequisites
    }

    pub fn kind(&self) -> SubmissionKind {
        self.kind
    }

    pub fn window(&self) -> &BlockhashWindow {
        &self.window
    }
}

/// Why a submission did not confirm
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("network error: {0}")]
    Network(String),

    #[error("blockhash window expired before confirmation")]
    Expired,

    #[error("rejected by ledger: {0}")]
    Rejected(String),

    #[error("request built for {requested:?} sent to {actual:?} submitter")]
    KindMismatch {
        requested: SubmissionKind,
        actual: SubmissionKind,
    },
}

/// Result of one submission attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub confirmed: bool,
    pub signature: Option<Signature>,
    pub error: Option<SubmitError>,
}

impl SubmitOutcome {
    fn confirmed(signature: Signature) -> Self {
        Self {
            confirmed: true,
            signature: Some(signature),
            error: None,
        }
    }

    fn failed(signature: Option<Signature>, error: SubmitError) -> Self {
        Self {
            confirmed: false,
            signature,
            error: Some(error),
        }
    }
}

/// Polls a signature until it resolves inside its blockhash window
#[derive(Clone)]
pub struct Confirmer {
    ledger: Arc<dyn Ledger>,
    poll_interval: Duration,
}

impl Confirmer {
    pub fn new(ledger: Arc<dyn Ledger>, poll_interval: Duration) -> Self {
        Self {
            ledger,
            poll_interval,
        }
    }

    pub async fn confirm(
        &self,
        signature: &Signature,
        window: &BlockhashWindow,
    ) -> std::result::Result<(), SubmitError> {
        let mut rpc_errors = 0u32;

        loop {
            match self.ledger.signature_status(signature).await {
                Ok(SignatureStatus::Confirmed) => {
                    debug!("Signature {} confirmed", signature);
                    return Ok(());
                }
                Ok(SignatureStatus::Failed(e)) => {
                    return Err(SubmitError::Rejected(e.to_string()));
                }
                Ok(SignatureStatus::Pending) => rpc_errors = 0,
                Err(e) => {
                    rpc_errors += 1;
                    warn!("Status check for {} failed: {}", signature, e);
                }
            }

            match self.ledger.block_height().await {
                Ok(height) if height > window.last_valid_block_height => {
                    debug!(
                        "Signature {} expired at height {} (last valid {})",
                        signature, height, window.last_valid_block_height
                    );
                    return Err(SubmitError::Expired);
                }
                Ok(_) => {}
                Err(e) => {
                    rpc_errors += 1;
                    warn!("Block height check failed: {}", e);
                }
            }

            if rpc_errors >= MAX_CONFIRM_RPC_ERRORS {
                return Err(SubmitError::Network(format!(
                    "{} consecutive RPC failures while confirming {}",
                    rpc_errors, signature
                )));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Sends directly to the RPC endpoint
pub struct StandardSubmitter {
    ledger: Arc<dyn Ledger>,
    confirmer: Confirmer,
}

impl StandardSubmitter {
    pub fn new(ledger: Arc<dyn Ledger>, confirmer: Confirmer) -> Self {
        Self { ledger, confirmer }
    }

    async fn submit(&self, request: &SubmissionRequest) -> SubmitOutcome {
        let signature = first_signature(request.transaction()).ok();

        for prerequisite in request.prerequisites() {
            if let Err(e) = self.ledger.send_transaction(prerequisite).await {
                return SubmitOutcome::failed(signature, SubmitError::Network(e.to_string()));
            }
        }

        let signature = match self.ledger.send_transaction(request.transaction()).await {
            Ok(signature) => signature,
            Err(e) => return SubmitOutcome::failed(signature, SubmitError::Network(e.to_string())),
        };

        info!("Transaction sent: {}", signature);

        match self.confirmer.confirm(&signature, request.window()).await {
            Ok(()) => SubmitOutcome::confirmed(signature),
            Err(e) => SubmitOutcome::failed(Some(signature), e),
        }
    }
}

/// Tip-bundled submission to every block engine
pub struct PriorityBundleSubmitter {
    jito: JitoClient,
    confirmer: Confirmer,
}

impl PriorityBundleSubmitter {
    pub fn new(jito: JitoClient, confirmer: Confirmer) -> Self {
        Self { jito, confirmer }
    }

    async fn submit(&self, request: &SubmissionRequest, payer: &Keypair) -> SubmitOutcome {
        let signature = match first_signature(request.transaction()) {
            Ok(signature) => signature,
            Err(e) => return SubmitOutcome::failed(None, SubmitError::Rejected(e.to_string())),
        };

        let tip_account = self.jito.get_tip_account();
        let tip = build_transfer(
            payer,
            &tip_account,
            self.jito.tip_lamports(),
            request.window().blockhash,
        );
        let tip_signature = match first_signature(&tip) {
            Ok(signature) => signature,
            Err(e) => return SubmitOutcome::failed(Some(signature), SubmitError::Rejected(e.to_string())),
        };

        let bundle = match BundleBuilder::new(tip)
            .add_transactions(request.prerequisites().iter().cloned())
            .add_transaction(request.transaction().clone())
            .build()
        {
            Ok(bundle) => bundle,
            Err(e) => return SubmitOutcome::failed(Some(signature), SubmitError::Rejected(e.to_string())),
        };

        match self.jito.send_bundle(&bundle).await {
            Ok(accepted) => info!(
                "Bundle {} accepted by {} (tip to {})",
                accepted.bundle_id, accepted.endpoint, tip_account
            ),
            Err(e) => return SubmitOutcome::failed(Some(signature), SubmitError::Network(e.to_string())),
        }

        // The bundle lands atomically: a confirmed tip means the swap landed
        match self.confirmer.confirm(&tip_signature, request.window()).await {
            Ok(()) => SubmitOutcome::confirmed(signature),
            Err(e) => SubmitOutcome::failed(Some(signature), e),
        }
    }
}

/// Submission through a single relay service
pub struct RelaySubmitter {
    relay: RelayClient,
    confirmer: Confirmer,
}

impl RelaySubmitter {
    pub fn new(relay: RelayClient, confirmer: Confirmer) -> Self {
        Self { relay, confirmer }
    }

    async fn submit(&self, request: &SubmissionRequest, payer: &Keypair) -> SubmitOutcome {
        let signature = match first_signature(request.transaction()) {
            Ok(signature) => signature,
            Err(e) => return SubmitOutcome::failed(None, SubmitError::Rejected(e.to_string())),
        };

        let mut transactions = Vec::with_capacity(request.prerequisites().len() + 2);
        if let Some((fee_wallet, lamports)) = self.relay.fee() {
            transactions.push(build_transfer(
                payer,
                &fee_wallet,
                lamports,
                request.window().blockhash,
            ));
        }
        transactions.extend(request.prerequisites().iter().cloned());
        transactions.push(request.transaction().clone());

        if let Err(e) = self.relay.send(&transactions, request.window()).await {
            let error = match e {
                Error::RelaySubmission(message) => SubmitError::Rejected(message),
                other => SubmitError::Network(other.to_string()),
            };
            return SubmitOutcome::failed(Some(signature), error);
        }

        match self.confirmer.confirm(&signature, request.window()).await {
            Ok(()) => SubmitOutcome::confirmed(signature),
            Err(e) => SubmitOutcome::failed(Some(signature), e),
        }
    }
}

/// The configured submission strategy
pub enum TransactionSubmitter {
    Standard(StandardSubmitter),
    PriorityBundle(PriorityBundleSubmitter),
    Relay(RelaySubmitter),
}

impl TransactionSubmitter {
    /// Build the strategy selected by `trading.submission`
    pub fn from_config(config: &Config, ledger: Arc<dyn Ledger>) -> Result<Self> {
        let confirmer = Confirmer::new(
            ledger.clone(),
            Duration::from_millis(config.rpc.confirm_poll_interval_ms),
        );

        let submitter = match config.trading.submission {
            SubmissionMethod::Standard => Self::Standard(StandardSubmitter::new(ledger, confirmer)),
            SubmissionMethod::PriorityBundle => {
                let transport = HttpTransport::new(
                    Duration::from_millis(config.jito.request_timeout_ms),
                    Duration::from_millis(config.jito.retry_base_delay_ms),
                )?;
                let jito = JitoClient::new(config.jito.clone(), Arc::new(transport))?;
                Self::PriorityBundle(PriorityBundleSubmitter::new(jito, confirmer))
            }
            SubmissionMethod::Relay => {
                let transport = HttpTransport::new(
                    Duration::from_millis(config.relay.request_timeout_ms),
                    Duration::from_millis(config.relay.retry_base_delay_ms),
                )?;
                let relay = RelayClient::new(&config.relay, Arc::new(transport))?;
                Self::Relay(RelaySubmitter::new(relay, confirmer))
            }
        };

        info!("Transaction submitter: {:?}", submitter.kind());
        Ok(submitter)
    }

    pub fn kind(&self) -> SubmissionKind {
        match self {
            Self::Standard(_) => SubmissionKind::Standard,
            Self::PriorityBundle(_) => SubmissionKind::PriorityBundle,
            Self::Relay(_) => SubmissionKind::Relay,
        }
    }

    /// Submit and wait for confirmation. Never errors: every failure is
    /// reported through the outcome.
    pub async fn submit(&self, request: &SubmissionRequest, payer: &Keypair) -> SubmitOutcome {
        if request.kind() != self.kind() {
            warn!(
                "Refusing {:?} request on {:?} submitter",
                request.kind(),
                self.kind()
            );
            return SubmitOutcome::failed(
                first_signature(request.transaction()).ok(),
                SubmitError::KindMismatch {
                    requested: request.kind(),
                    actual: self.kind(),
                },
            );
        }

        let outcome = match self {
            Self::Standard(s) => s.submit(request).await,
            Self::PriorityBundle(s) => s.submit(request, payer).await,
            Self::Relay(s) => s.submit(request, payer).await,
        };

        if let Some(error) = &outcome.error {
            warn!("Submission via {:?} did not confirm: {}", self.kind(), error);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JitoConfig;
    use crate::trading::jito::tests::{test_config, ScriptedTransport};
    use crate::trading::ledger::tests::FakeLedger;
    use serde_json::json;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::transaction::TransactionError;
    use std::sync::atomic::Ordering;

    fn window(last_valid_block_height: u64) -> BlockhashWindow {
        BlockhashWindow {
            blockhash: solana_sdk::hash::Hash::new_unique(),
            last_valid_block_height,
        }
    }

    fn swap(payer: &Keypair, window: &BlockhashWindow) -> VersionedTransaction {
        build_transfer(payer, &Pubkey::new_unique(), 42, window.blockhash)
    }

    fn standard(ledger: Arc<FakeLedger>) -> TransactionSubmitter {
        let confirmer = Confirmer::new(ledger.clone(), Duration::from_millis(500));
        TransactionSubmitter::Standard(StandardSubmitter::new(ledger, confirmer))
    }

    #[tokio::test(start_paused = true)]
    async fn test_standard_confirms_after_pending_polls() {
        let ledger = Arc::new(FakeLedger::new(1));
        ledger.push_status(SignatureStatus::Pending);
        ledger.push_status(SignatureStatus::Pending);
        ledger.push_status(SignatureStatus::Confirmed);

        let payer = Keypair::new();
        let window = window(1_000);
        let tx = swap(&payer, &window);
        let request = SubmissionRequest::new(tx.clone(), vec![], SubmissionKind::Standard, window);

        let outcome = standard(ledger.clone()).submit(&request, &payer).await;
        assert!(outcome.confirmed);
        assert_eq!(outcome.signature, Some(tx.signatures[0]));
        assert_eq!(ledger.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_standard_expires_past_window() {
        // Height starts at 100 and climbs 50 per read, window ends at 200
        let ledger = Arc::new(FakeLedger::new(50));
        let payer = Keypair::new();
        let window = window(200);
        let request =
            SubmissionRequest::new(swap(&payer, &window), vec![], SubmissionKind::Standard, window);

        let outcome = standard(ledger).submit(&request, &payer).await;
        assert!(!outcome.confirmed);
        assert_eq!(outcome.error, Some(SubmitError::Expired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_standard_ledger_rejection() {
        let ledger = Arc::new(FakeLedger::new(1));
        ledger.push_status(SignatureStatus::Failed(TransactionError::InsufficientFundsForFee));

        let payer = Keypair::new();
        let window = window(1_000);
        let request =
            SubmissionRequest::new(swap(&payer, &window), vec![], SubmissionKind::Standard, window);

        let outcome = standard(ledger).submit(&request, &payer).await;
        assert!(!outcome.confirmed);
        assert!(matches!(outcome.error, Some(SubmitError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_standard_send_failure_is_network_error() {
        let ledger = Arc::new(FakeLedger::new(1));
        ledger.fail_send.store(true, Ordering::SeqCst);

        let payer = Keypair::new();
        let window = window(1_000);
        let request =
            SubmissionRequest::new(swap(&payer, &window), vec![], SubmissionKind::Standard, window);

        let outcome = standard(ledger).submit(&request, &payer).await;
        assert!(!outcome.confirmed);
        assert!(matches!(outcome.error, Some(SubmitError::Network(_))));
    }

    #[tokio::test]
    async fn test_kind_mismatch_not_confirmed() {
        let ledger = Arc::new(FakeLedger::new(1));
        let payer = Keypair::new();
        let window = window(1_000);
        let request =
            SubmissionRequest::new(swap(&payer, &window), vec![], SubmissionKind::Relay, window);

        let outcome = standard(ledger.clone()).submit(&request, &payer).await;
        assert!(!outcome.confirmed);
        assert!(matches!(outcome.error, Some(SubmitError::KindMismatch { .. })));
        assert_eq!(ledger.sent_count(), 0);
    }

    fn bundle_submitter(
        ledger: Arc<FakeLedger>,
        transport: Arc<ScriptedTransport>,
        config: JitoConfig,
    ) -> TransactionSubmitter {
        let confirmer = Confirmer::new(ledger, Duration::from_millis(500));
        let jito = JitoClient::new(config, transport).unwrap();
        TransactionSubmitter::PriorityBundle(PriorityBundleSubmitter::new(jito, confirmer))
    }

    #[tokio::test(start_paused = true)]
    async fn test_bundle_confirms_when_one_region_accepts() {
        let ledger = Arc::new(FakeLedger::new(1));
        ledger.push_status(SignatureStatus::Confirmed);
        let transport = Arc::new(ScriptedTransport::default());
        transport.respond("https://ny/api/v1/bundles", Ok(json!({"result": "b-1"})));

        let submitter = bundle_submitter(
            ledger,
            transport.clone(),
            test_config(&["https://ny", "https://tokyo"]),
        );

        let payer = Keypair::new();
        let window = window(1_000);
        let tx = swap(&payer, &window);
        let request =
            SubmissionRequest::new(tx.clone(), vec![], SubmissionKind::PriorityBundle, window);

        let outcome = submitter.submit(&request, &payer).await;
        assert!(outcome.confirmed);
        assert_eq!(outcome.signature, Some(tx.signatures[0]));

        // [tip, swap]
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].1["params"][0].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bundle_all_regions_down_not_confirmed() {
        let ledger = Arc::new(FakeLedger::new(1));
        let submitter = bundle_submitter(
            ledger,
            Arc::new(ScriptedTransport::default()),
            test_config(&["https://ny", "https://tokyo"]),
        );

        let payer = Keypair::new();
        let window = window(1_000);
        let request = SubmissionRequest::new(
            swap(&payer, &window),
            vec![],
            SubmissionKind::PriorityBundle,
            window,
        );

        let outcome = submitter.submit(&request, &payer).await;
        assert!(!outcome.confirmed);
        assert!(matches!(outcome.error, Some(SubmitError::Network(_))));
    }

    #[test]
    fn test_request_accessors() {
        let payer = Keypair::new();
        let window = window(77);
        let tx = swap(&payer, &window);
        let request = SubmissionRequest::new(
            tx.clone(),
            vec![tx.clone()],
            SubmissionKind::Standard,
            window,
        );

        assert_eq!(request.kind(), SubmissionKind::Standard);
        assert_eq!(request.window().last_valid_block_height, 77);
        assert_eq!(request.prerequisites().len(), 1);
        assert_eq!(request.transaction().signatures, tx.signatures);
    }
}
