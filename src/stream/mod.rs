//! Stream module - event ingestion
//!
//! - Discovery WebSocket (new pools, decoded upstream)
//! - Wallet balance changes, pushed by the account feed

pub mod discovery;
pub mod events;

pub use discovery::DiscoveryClient;
pub use events::DiscoveryEvent;
