//! Momentum entry detection
//!
//! Waits for a run of consecutive price increases before buying. Moves
//! smaller than the volatility buffer are noise and leave the run intact.

use crate::config::EntryConfig;

#[derive(Debug, Clone)]
pub struct EntryTracker {
    required: u32,
    buffer: f64,
    last_price: Option<f64>,
    consecutive_increases: u32,
}

impl EntryTracker {
    pub fn new(required: u32, volatility_buffer_pct: f64) -> Self {
        Self {
            required: required.max(1),
            buffer: volatility_buffer_pct / 100.0,
            last_price: None,
            consecutive_increases: 0,
        }
    }

    pub fn from_config(config: &EntryConfig) -> Self {
        Self::new(
            config.required_consecutive_increases,
            config.volatility_buffer_pct,
        )
    }

    /// Feed one price; `true` once enough qualifying increases are seen
    pub fn observe(&mut self, price: f64) -> bool {
        if let Some(last) = self.last_price {
            if last > 0.0 {
                let change = (price - last) / last;
                if change > self.buffer {
                    self.consecutive_increases += 1;
                } else if change < -self.buffer {
                    self.consecutive_increases = 0;
                }
            }
        }
        self.last_price = Some(price);

        self.consecutive_increases >= self.required
    }

    pub fn consecutive_increases(&self) -> u32 {
        self.consecutive_increases
    }
}
