//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub jito: JitoConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub quote: QuoteConfig,
    pub filters: FilterConfig,
    pub auto_sell: AutoSellConfig,
    #[serde(default)]
    pub entry: EntryConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ws_endpoint")]
    pub ws_endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// How often a pending signature is polled while its blockhash is valid
    #[serde(default = "default_confirm_poll_interval_ms")]
    pub confirm_poll_interval_ms: u64,
}

/// Websocket source of `DiscoveryEvent` JSON messages
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// 0 = reconnect forever
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ws_url: default_discovery_ws_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
            ping_interval_secs: default_ping_interval_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// How signed transactions reach the network
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMethod {
    /// Plain `sendTransaction` against the RPC endpoint
    Standard,
    /// Tip-bundled submission fanned out to every Jito region
    PriorityBundle,
    /// Single relay service that propagates on our behalf
    Relay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// SOL spent per buy
    #[serde(default = "default_quote_amount_sol")]
    pub quote_amount_sol: f64,
    #[serde(default = "default_buy_slippage_bps")]
    pub buy_slippage_bps: u16,
    #[serde(default = "default_sell_slippage_bps")]
    pub sell_slippage_bps: u16,
    #[serde(default = "default_max_retries")]
    pub max_buy_retries: u32,
    #[serde(default = "default_max_retries")]
    pub max_sell_retries: u32,
    /// Reject new buys while another buy or any sell is in flight
    #[serde(default = "default_true")]
    pub one_token_at_a_time: bool,
    /// Buy without running the filter gate
    #[serde(default)]
    pub skip_filters: bool,
    #[serde(default = "default_submission")]
    pub submission: SubmissionMethod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JitoConfig {
    #[serde(default = "default_jito_urls")]
    pub block_engine_urls: Vec<String>,
    #[serde(default = "default_tip")]
    pub tip_lamports: u64,
    #[serde(default = "default_min_tip")]
    pub min_tip_lamports: u64,
    #[serde(default = "default_max_tip")]
    pub max_tip_lamports: u64,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for JitoConfig {
    fn default() -> Self {
        Self {
            block_engine_urls: default_jito_urls(),
            tip_lamports: default_tip(),
            min_tip_lamports: default_min_tip(),
            max_tip_lamports: default_max_tip(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_ms: default_http_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub url: String,
    /// Fee transfer attached in front of the swap (0 = none)
    #[serde(default)]
    pub fee_lamports: u64,
    #[serde(default)]
    pub fee_wallet: String,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            fee_lamports: 0,
            fee_wallet: String::new(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_ms: default_http_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteConfig {
    #[serde(default = "default_quote_api_url")]
    pub api_url: String,
    #[serde(default = "default_priority_fee")]
    pub priority_fee_lamports: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            api_url: default_quote_api_url(),
            priority_fee_lamports: default_priority_fee(),
            request_timeout_ms: default_http_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_filter_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_filter_duration_ms")]
    pub check_duration_ms: u64,
    /// Minimum SOL in the pool (0 = no minimum)
    #[serde(default)]
    pub min_pool_size_sol: f64,
    /// Hard cap on SOL in the pool (0 = no cap)
    #[serde(default)]
    pub max_pool_size_sol: f64,
    #[serde(default = "default_true")]
    pub check_burned: bool,
    #[serde(default = "default_true")]
    pub check_renounced: bool,
    #[serde(default = "default_true")]
    pub check_freezable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoSellConfig {
    #[serde(default = "default_price_interval_ms")]
    pub price_check_interval_ms: u64,
    #[serde(default = "default_price_duration_ms")]
    pub price_check_duration_ms: u64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    /// Initial stop-loss distance below the purchase price
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    /// Profit % that switches the stop from fixed to trailing
    #[serde(default = "default_trailing_activation")]
    pub trailing_stop_activation_pct: f64,
    /// Distance from the peak once trailing
    #[serde(default = "default_trailing_distance")]
    pub trailing_stop_distance_pct: f64,
    #[serde(default = "default_confirmations")]
    pub take_profit_confirmations: u32,
    #[serde(default = "default_confirmations")]
    pub stop_loss_confirmations: u32,
    /// Sell when the monitor runs out of budget without a signal
    #[serde(default = "default_true")]
    pub sell_on_timeout: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_required_increases")]
    pub required_consecutive_increases: u32,
    /// Price changes smaller than this are ignored
    #[serde(default = "default_volatility_buffer")]
    pub volatility_buffer_pct: f64,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            required_consecutive_increases: default_required_increases(),
            volatility_buffer_pct: default_volatility_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl PersistenceConfig {
    pub fn positions_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("positions.json")
    }

    pub fn subscriptions_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("subscriptions.json")
    }
}

/// Number of polls a (duration, interval) pair allows
pub fn poll_budget(duration_ms: u64, interval_ms: u64) -> u32 {
    if interval_ms == 0 {
        return 1;
    }
    (duration_ms / interval_ms).clamp(1, u32::MAX as u64) as u32
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_ws_endpoint() -> String {
    std::env::var("RPC_WS_ENDPOINT").unwrap_or_else(|_| "wss://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_confirm_poll_interval_ms() -> u64 {
    500
}

fn default_discovery_ws_url() -> String {
    std::env::var("DISCOVERY_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8900/pools".into())
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    10000
}

fn default_quote_amount_sol() -> f64 {
    0.01
}

fn default_buy_slippage_bps() -> u16 {
    2000
}

fn default_sell_slippage_bps() -> u16 {
    2000
}

fn default_max_retries() -> u32 {
    10
}

fn default_submission() -> SubmissionMethod {
    SubmissionMethod::Standard
}

fn default_jito_urls() -> Vec<String> {
    vec![
        "https://mainnet.block-engine.jito.wtf".into(),
        "https://amsterdam.mainnet.block-engine.jito.wtf".into(),
        "https://frankfurt.mainnet.block-engine.jito.wtf".into(),
        "https://ny.mainnet.block-engine.jito.wtf".into(),
        "https://tokyo.mainnet.block-engine.jito.wtf".into(),
    ]
}

fn default_tip() -> u64 {
    100000
}

fn default_min_tip() -> u64 {
    10000
}

fn default_max_tip() -> u64 {
    1000000
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

fn default_http_timeout_ms() -> u64 {
    5000
}

fn default_quote_api_url() -> String {
    "https://quote-api.jup.ag/v6".into()
}

fn default_priority_fee() -> u64 {
    100000
}

fn default_filter_interval_ms() -> u64 {
    2000
}

fn default_filter_duration_ms() -> u64 {
    60000
}

fn default_price_interval_ms() -> u64 {
    2000
}

fn default_price_duration_ms() -> u64 {
    600000
}

fn default_take_profit_pct() -> f64 {
    40.0
}

fn default_stop_loss_pct() -> f64 {
    35.0
}

fn default_trailing_activation() -> f64 {
    10.0
}

fn default_trailing_distance() -> f64 {
    17.0
}

fn default_confirmations() -> u32 {
    2
}

fn default_required_increases() -> u32 {
    3
}

fn default_volatility_buffer() -> f64 {
    1.0
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.ws_endpoint", default_ws_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("trading.submission", "standard")?
            .set_default("filters.check_interval_ms", default_filter_interval_ms() as i64)?
            .set_default("auto_sell.price_check_interval_ms", default_price_interval_ms() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SNIPER_)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.rpc.confirm_poll_interval_ms == 0 {
            anyhow::bail!("confirm_poll_interval_ms must be positive");
        }

        // Trading
        if self.trading.quote_amount_sol <= 0.0 {
            anyhow::bail!("quote_amount_sol must be positive");
        }

        if self.trading.buy_slippage_bps > 10000 || self.trading.sell_slippage_bps > 10000 {
            anyhow::bail!("slippage cannot exceed 10000 bps (100%)");
        }

        if self.trading.max_buy_retries == 0 || self.trading.max_sell_retries == 0 {
            anyhow::bail!("max_buy_retries and max_sell_retries must be at least 1");
        }

        match self.trading.submission {
            SubmissionMethod::PriorityBundle => {
                if self.jito.block_engine_urls.is_empty() {
                    anyhow::bail!("priority_bundle submission needs at least one block engine url");
                }
                if self.jito.min_tip_lamports > self.jito.max_tip_lamports {
                    anyhow::bail!("min_tip_lamports cannot exceed max_tip_lamports");
                }
            }
            SubmissionMethod::Relay => {
                if self.relay.url.is_empty() {
                    anyhow::bail!("relay submission needs relay.url");
                }
                if self.relay.fee_lamports > 0 && self.relay.fee_wallet.is_empty() {
                    anyhow::bail!("relay.fee_lamports is set but relay.fee_wallet is empty");
                }
            }
            SubmissionMethod::Standard => {}
        }

        // Polling budgets
        check_poll_pair(
            "filters",
            self.filters.check_duration_ms,
            self.filters.check_interval_ms,
        )?;
        check_poll_pair(
            "auto_sell",
            self.auto_sell.price_check_duration_ms,
            self.auto_sell.price_check_interval_ms,
        )?;

        if self.filters.max_pool_size_sol > 0.0
            && self.filters.max_pool_size_sol < self.filters.min_pool_size_sol
        {
            anyhow::bail!("max_pool_size_sol must be at least min_pool_size_sol");
        }

        // Exit rules
        let sell = &self.auto_sell;
        if sell.take_profit_pct <= 0.0 {
            anyhow::bail!("take_profit_pct must be positive");
        }
        if sell.stop_loss_pct <= 0.0 || sell.stop_loss_pct >= 100.0 {
            anyhow::bail!("stop_loss_pct must be between 0 and 100");
        }
        if sell.trailing_stop_distance_pct <= 0.0 || sell.trailing_stop_distance_pct >= 100.0 {
            anyhow::bail!("trailing_stop_distance_pct must be between 0 and 100");
        }
        if sell.trailing_stop_activation_pct < 0.0 {
            anyhow::bail!("trailing_stop_activation_pct cannot be negative");
        }
        if sell.take_profit_confirmations == 0 || sell.stop_loss_confirmations == 0 {
            anyhow::bail!("confirmation counts must be at least 1");
        }

        if self.entry.enabled && self.entry.required_consecutive_increases == 0 {
            anyhow::bail!("required_consecutive_increases must be at least 1");
        }

        if self.trading.skip_filters {
            tracing::warn!("skip_filters is set - every discovered pool will be bought unfiltered");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    ws_endpoint: {}
    timeout: {}ms
  Discovery:
    ws_url: {}
  Trading:
    quote_amount: {} SOL
    buy_slippage: {}bps
    sell_slippage: {}bps
    max_buy_retries: {}
    max_sell_retries: {}
    one_token_at_a_time: {}
    skip_filters: {}
    submission: {:?}
  Jito:
    block_engines: {}
    tip: {} lamports
  Relay:
    url: {}
  Quote:
    api_url: {}
  Filters:
    check: every {}ms for {}ms
    pool_size: {} - {} SOL
    burned/renounced/freezable: {}/{}/{}
  Auto-Sell:
    check: every {}ms for {}ms
    take_profit: {}%
    stop_loss: {}%
    trailing: activate at {}%, distance {}%
  Entry:
    enabled: {}
  Persistence:
    data_dir: {}
"#,
            mask_url(&self.rpc.endpoint),
            mask_url(&self.rpc.ws_endpoint),
            self.rpc.timeout_ms,
            mask_url(&self.discovery.ws_url),
            self.trading.quote_amount_sol,
            self.trading.buy_slippage_bps,
            self.trading.sell_slippage_bps,
            self.trading.max_buy_retries,
            self.trading.max_sell_retries,
            self.trading.one_token_at_a_time,
            self.trading.skip_filters,
            self.trading.submission,
            self.jito.block_engine_urls.len(),
            self.jito.tip_lamports,
            if self.relay.url.is_empty() {
                "(not set)".to_string()
            } else {
                mask_url(&self.relay.url)
            },
            mask_url(&self.quote.api_url),
            self.filters.check_interval_ms,
            self.filters.check_duration_ms,
            self.filters.min_pool_size_sol,
            self.filters.max_pool_size_sol,
            self.filters.check_burned,
            self.filters.check_renounced,
            self.filters.check_freezable,
            self.auto_sell.price_check_interval_ms,
            self.auto_sell.price_check_duration_ms,
            self.auto_sell.take_profit_pct,
            self.auto_sell.stop_loss_pct,
            self.auto_sell.trailing_stop_activation_pct,
            self.auto_sell.trailing_stop_distance_pct,
            self.entry.enabled,
            self.persistence.data_dir,
        )
    }
}

fn check_poll_pair(section: &str, duration_ms: u64, interval_ms: u64) -> Result<()> {
    if interval_ms == 0 {
        anyhow::bail!("{}: check interval must be positive", section);
    }
    if duration_ms < interval_ms {
        anyhow::bail!(
            "{}: check duration {}ms is shorter than the interval {}ms",
            section,
            duration_ms,
            interval_ms
        );
    }
    Ok(())
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig {
                endpoint: default_rpc_endpoint(),
                ws_endpoint: default_ws_endpoint(),
                timeout_ms: default_timeout_ms(),
                confirm_poll_interval_ms: default_confirm_poll_interval_ms(),
            },
            discovery: DiscoveryConfig::default(),
            trading: TradingConfig {
                quote_amount_sol: default_quote_amount_sol(),
                buy_slippage_bps: default_buy_slippage_bps(),
                sell_slippage_bps: default_sell_slippage_bps(),
                max_buy_retries: default_max_retries(),
                max_sell_retries: default_max_retries(),
                one_token_at_a_time: true,
                skip_filters: false,
                submission: default_submission(),
            },
            jito: JitoConfig::default(),
            relay: RelayConfig::default(),
            quote: QuoteConfig::default(),
            filters: FilterConfig {
                check_interval_ms: default_filter_interval_ms(),
                check_duration_ms: default_filter_duration_ms(),
                min_pool_size_sol: 0.0,
                max_pool_size_sol: 0.0,
                check_burned: true,
                check_renounced: true,
                check_freezable: true,
            },
            auto_sell: AutoSellConfig {
                price_check_interval_ms: default_price_interval_ms(),
                price_check_duration_ms: default_price_duration_ms(),
                take_profit_pct: default_take_profit_pct(),
                stop_loss_pct: default_stop_loss_pct(),
                trailing_stop_activation_pct: default_trailing_activation(),
                trailing_stop_distance_pct: default_trailing_distance(),
                take_profit_confirmations: default_confirmations(),
                stop_loss_confirmations: default_confirmations(),
                sell_on_timeout: true,
            },
            entry: EntryConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.trading.one_token_at_a_time);
        assert_eq!(config.trading.submission, SubmissionMethod::Standard);
    }

    #[test]
    fn test_poll_budget() {
        assert_eq!(poll_budget(10000, 2000), 5);
        assert_eq!(poll_budget(10999, 2000), 5);
        assert_eq!(poll_budget(500, 2000), 1);
        assert_eq!(poll_budget(1000, 0), 1);
    }

    #[test]
    fn test_submission_method_deserialize() {
        let method: SubmissionMethod = serde_json::from_str(r#""priority_bundle""#).unwrap();
        assert_eq!(method, SubmissionMethod::PriorityBundle);
    }

    #[test]
    fn test_relay_requires_url() {
        let mut config = Config::default();
        config.trading.submission = SubmissionMethod::Relay;
        assert!(config.validate().is_err());

        config.relay.url = "https://relay.example.com/execute".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_shorter_than_interval_rejected() {
        let mut config = Config::default();
        config.filters.check_duration_ms = 1000;
        config.filters.check_interval_ms = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_budget_rejected() {
        let mut config = Config::default();
        config.trading.max_buy_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://rpc.example.com?api-key=secret"),
            "https://rpc.example.com?***"
        );
        assert_eq!(mask_url("https://rpc.example.com"), "https://rpc.example.com");
    }
}
