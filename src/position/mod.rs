//! Position management module

pub mod auto_sell;
pub mod entry;
pub mod manager;
pub mod monitor;
pub mod price_feed;

pub use auto_sell::{ExitRules, ExitTracker, TriggerType};
pub use entry::EntryTracker;
pub use manager::{Position, PositionManager, PositionStatus};
pub use monitor::{MonitorResult, MonitorTick, PriceMonitor};
pub use price_feed::{LedgerReserveSource, ReserveSource};
