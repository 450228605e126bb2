//! Trading module - quoting, signing and landing transactions
//!
//! Supports multiple execution methods:
//! - Standard (direct RPC send)
//! - Jito bundles (tip-bundled, fanned out to every region)
//! - Relay (single propagation service)

pub mod http;
pub mod jito;
pub mod ledger;
pub mod quote;
pub mod relay;
pub mod submitter;
pub mod transaction;

pub use http::{HttpTransport, JsonTransport};
pub use jito::JitoClient;
pub use ledger::{BlockhashWindow, Ledger, RpcLedger, SignatureStatus};
pub use quote::{JupiterQuoteProvider, QuoteProvider, QuoteRequest, QuotedSwap};
pub use relay::RelayClient;
pub use submitter::{
    SubmissionKind, SubmissionRequest, SubmitError, SubmitOutcome, TransactionSubmitter,
};
