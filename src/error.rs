//! Error types for the sniper bot

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sniper bot
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid pubkey {value}: {reason}")]
    InvalidPubkey { value: String, reason: String },

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account decode failed: {0}")]
    AccountDecode(String),

    // HTTP collaborators (quote provider, relays)
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Quote provider error: {0}")]
    Quote(String),

    // Feed errors
    #[error("Feed connection failed: {0}")]
    FeedConnection(String),

    #[error("Subscription {0} not found")]
    SubscriptionNotFound(u64),

    // Pool errors
    #[error("Pool {pool} has no wrapped SOL side ({base} / {quote})")]
    UnsupportedPool {
        pool: String,
        base: String,
        quote: String,
    },

    #[error("Empty reserve in pool {0}")]
    EmptyReserve(String),

    // Trading errors
    #[error("Transaction build failed: {0}")]
    TransactionBuild(String),

    #[error("Transaction send failed: {0}")]
    TransactionSend(String),

    // Jito errors
    #[error("Jito bundle submission failed: {0}")]
    JitoBundleSubmission(String),

    #[error("Jito bundle rejected: {0}")]
    JitoBundleRejected(String),

    #[error("Relay submission failed: {0}")]
    RelaySubmission(String),

    // Position management errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position {mint} cannot move from {from} to {to}")]
    InvalidTransition {
        mint: String,
        from: String,
        to: String,
    },

    #[error("Purchase already recorded for {0}")]
    PurchaseAlreadyRecorded(String),

    #[error("Position persistence failed: {0}")]
    PositionPersistence(String),

    // Filter errors
    #[error("Pool rejected: {reason}")]
    GateRejected { reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_)
                | Error::Http(_)
                | Error::FeedConnection(_)
                | Error::TransactionSend(_)
                | Error::JitoBundleSubmission(_)
                | Error::RelaySubmission(_)
        )
    }
}

// Conversion from solana_client errors
impl From<solana_client::client_error::ClientError> for Error {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        Error::Rpc(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Http(format!("request timed out: {}", e))
        } else {
            Error::Http(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::Rpc("connection reset".into()).is_retryable());
        assert!(Error::Http("503".into()).is_retryable());
        assert!(Error::JitoBundleSubmission("all regions down".into()).is_retryable());
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        assert!(!Error::GateRejected {
            reason: "pool too large".into()
        }
        .is_retryable());
        assert!(!Error::PurchaseAlreadyRecorded("mint".into()).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }
}
