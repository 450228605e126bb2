//! Exit rules: take-profit, stop-loss and trailing stop
//!
//! WARNING: TP/SL is best-effort, not guaranteed. Between two polls a fast
//! rug can gap through the stop-loss before it is detected.
//!
//! [`ExitTracker`] holds no I/O; the monitor feeds it one price per poll.

use serde::{Deserialize, Serialize};

use crate::config::AutoSellConfig;

/// Exit trigger type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    TakeProfit,
    StopLoss,
}

/// Exit thresholds as fractions of the purchase price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitRules {
    pub take_profit: f64,
    pub initial_stop_loss: f64,
    pub trailing_activation: f64,
    pub trailing_distance: f64,
    pub take_profit_confirmations: u32,
    pub stop_loss_confirmations: u32,
}

impl From<&AutoSellConfig> for ExitRules {
    fn from(config: &AutoSellConfig) -> Self {
        Self {
            take_profit: config.take_profit_pct / 100.0,
            initial_stop_loss: config.stop_loss_pct / 100.0,
            trailing_activation: config.trailing_stop_activation_pct / 100.0,
            trailing_distance: config.trailing_stop_distance_pct / 100.0,
            take_profit_confirmations: config.take_profit_confirmations.max(1),
            stop_loss_confirmations: config.stop_loss_confirmations.max(1),
        }
    }
}

/// Per-position exit state
#[derive(Debug, Clone)]
pub struct ExitTracker {
    rules: ExitRules,
    purchase_price: f64,
    highest_price_seen: f64,
    threshold: f64,
    trailing_active: bool,
    take_profit_count: u32,
    stop_loss_count: u32,
}

impl ExitTracker {
    pub fn new(rules: ExitRules, purchase_price: f64) -> Self {
        Self {
            rules,
            purchase_price,
            highest_price_seen: purchase_price,
            threshold: purchase_price * (1.0 - rules.initial_stop_loss),
            trailing_active: false,
            take_profit_count: 0,
            stop_loss_count: 0,
        }
    }

    /// Continue from a persisted peak and stop level
    pub fn resume(
        rules: ExitRules,
        purchase_price: f64,
        highest_price_seen: Option<f64>,
        threshold: Option<f64>,
    ) -> Self {
        let mut tracker = Self::new(rules, purchase_price);
        if let Some(high) = highest_price_seen {
            tracker.highest_price_seen = tracker.highest_price_seen.max(high);
        }
        if let Some(threshold) = threshold {
            tracker.threshold = tracker.threshold.max(threshold);
        }
        tracker.trailing_active = tracker.highest_price_seen >= tracker.activation_price();
        tracker
    }

    pub fn take_profit_price(&self) -> f64 {
        self.purchase_price * (1.0 + self.rules.take_profit)
    }

    fn activation_price(&self) -> f64 {
        self.purchase_price * (1.0 + self.rules.trailing_activation)
    }

    /// Feed one price; returns the signal once its confirmations are in
    pub fn observe(&mut self, price: f64) -> Option<TriggerType> {
        if price > self.highest_price_seen {
            self.highest_price_seen = price;
            if !self.trailing_active && price >= self.activation_price() {
                self.trailing_active = true;
            }
            if self.trailing_active {
                let trailed = self.highest_price_seen * (1.0 - self.rules.trailing_distance);
                self.threshold = self.threshold.max(trailed);
            }
        }

        // Reset whenever the price falls back below the line
        if price >= self.take_profit_price() {
            self.take_profit_count += 1;
        } else {
            self.take_profit_count = 0;
        }

        if price <= self.threshold {
            self.stop_loss_count += 1;
        } else {
            self.stop_loss_count = 0;
        }

        if self.take_profit_count >= self.rules.take_profit_confirmations {
            return Some(TriggerType::TakeProfit);
        }
        if self.stop_loss_count >= self.rules.stop_loss_confirmations {
            return Some(TriggerType::StopLoss);
        }
        None
    }

    pub fn highest_price_seen(&self) -> f64 {
        self.highest_price_seen
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn trailing_active(&self) -> bool {
        self.trailing_active
    }

    pub fn take_profit_count(&self) -> u32 {
        self.take_profit_count
    }

    pub fn stop_loss_count(&self) -> u32 {
        self.stop_loss_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(take_profit: f64) -> ExitRules {
        ExitRules {
            take_profit,
            initial_stop_loss: 0.35,
            trailing_activation: 0.10,
            trailing_distance: 0.17,
            take_profit_confirmations: 2,
            stop_loss_confirmations: 2,
        }
    }

    #[test]
    fn test_rules_from_config() {
        let config = AutoSellConfig {
            price_check_interval_ms: 2000,
            price_check_duration_ms: 600000,
            take_profit_pct: 40.0,
            stop_loss_pct: 35.0,
            trailing_stop_activation_pct: 10.0,
            trailing_stop_distance_pct: 17.0,
            take_profit_confirmations: 2,
            stop_loss_confirmations: 3,
            sell_on_timeout: true,
        };
        let rules = ExitRules::from(&config);
        assert!((rules.take_profit - 0.40).abs() < 1e-12);
        assert!((rules.trailing_distance - 0.17).abs() < 1e-12);
        assert_eq!(rules.stop_loss_confirmations, 3);
    }

    #[test]
    fn test_take_profit_counter_resets_below_line() {
        let mut tracker = ExitTracker::new(rules(0.10), 1.0);

        let mut counts = Vec::new();
        let mut signals = Vec::new();
        for price in [1.11, 1.09, 1.12, 1.13] {
            signals.push(tracker.observe(price));
            counts.push(tracker.take_profit_count());
        }

        assert_eq!(counts, vec![1, 0, 1, 2]);
        assert_eq!(signals, vec![None, None, None, Some(TriggerType::TakeProfit)]);
    }

    #[test]
    fn test_trailing_stop_activation_path() {
        let mut tracker = ExitTracker::new(rules(1.0), 1.0);
        assert!((tracker.threshold() - 0.65).abs() < 1e-9);

        assert_eq!(tracker.observe(1.0), None);
        assert_eq!(tracker.observe(1.05), None);
        assert!(!tracker.trailing_active());

        assert_eq!(tracker.observe(1.12), None);
        assert!(tracker.trailing_active());

        assert_eq!(tracker.observe(1.30), None);
        assert!((tracker.threshold() - 1.079).abs() < 1e-9);

        // Above the trailed stop
        assert_eq!(tracker.observe(1.10), None);
        assert_eq!(tracker.stop_loss_count(), 0);

        // One dip is not enough
        assert_eq!(tracker.observe(1.07), None);
        assert_eq!(tracker.observe(1.07), Some(TriggerType::StopLoss));
        assert!((tracker.highest_price_seen() - 1.30).abs() < 1e-12);
    }

    #[test]
    fn test_recovery_resets_stop_loss_confirmation() {
        let mut tracker = ExitTracker::new(rules(1.0), 1.0);

        assert_eq!(tracker.observe(0.60), None);
        assert_eq!(tracker.stop_loss_count(), 1);
        assert_eq!(tracker.observe(0.70), None);
        assert_eq!(tracker.stop_loss_count(), 0);
        assert_eq!(tracker.observe(0.60), None);
        assert_eq!(tracker.observe(0.50), Some(TriggerType::StopLoss));
    }

    #[test]
    fn test_threshold_never_lowers() {
        let mut tracker = ExitTracker::new(rules(1.0), 1.0);
        tracker.observe(1.50);
        let high_threshold = tracker.threshold();

        for price in [1.40, 1.45, 1.30] {
            tracker.observe(price);
            assert_eq!(tracker.threshold(), high_threshold);
            assert!((tracker.highest_price_seen() - 1.50).abs() < 1e-12);
        }
    }

    #[test]
    fn test_no_trailing_before_activation() {
        let mut tracker = ExitTracker::new(rules(1.0), 1.0);
        tracker.observe(1.08);
        assert!(!tracker.trailing_active());
        assert!((tracker.threshold() - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_resume_from_persisted_state() {
        let tracker = ExitTracker::resume(rules(1.0), 1.0, Some(1.30), Some(1.079));
        assert!(tracker.trailing_active());
        assert!((tracker.threshold() - 1.079).abs() < 1e-9);

        let fresh = ExitTracker::resume(rules(1.0), 1.0, None, None);
        assert!(!fresh.trailing_active());
        assert!((fresh.threshold() - 0.65).abs() < 1e-9);
    }
}
