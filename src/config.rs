//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Wrapped SOL mint address
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
/// USDC mint address
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub breakers: BreakerConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Base URL of the swap aggregator API
    #[serde(default = "default_aggregator_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            base_url: default_aggregator_url(),
            http_timeout_secs: default_http_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Simulate fills instead of hitting the aggregator
    #[serde(default)]
    pub paper_trading_enabled: bool,
    /// Default slippage tolerance in basis points
    #[serde(default = "default_slippage_bps")]
    pub default_slippage_bps: u32,
    /// Maximum tolerated slippage as a percentage (quote request bound)
    #[serde(default = "default_max_slippage_pct")]
    pub max_slippage_pct: f64,
    /// Explicit compute unit price; 0 disables the override
    #[serde(default)]
    pub compute_unit_price_micro_lamports: u64,
    #[serde(default = "default_compute_unit_limit")]
    pub compute_unit_limit: u32,
    /// Per-trade sizing hint in USD, converted via current price
    #[serde(default = "default_trade_amount_usd")]
    pub trade_amount_usd: f64,
    /// Delay between dispatched trades to avoid aggregator throttling
    #[serde(default = "default_inter_trade_delay_secs")]
    pub inter_trade_delay_secs: f64,
    /// Mints treated as quote assets when classifying BUY vs SELL
    #[serde(default = "default_quote_mints")]
    pub quote_mints: Vec<String>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            paper_trading_enabled: false,
            default_slippage_bps: default_slippage_bps(),
            max_slippage_pct: default_max_slippage_pct(),
            compute_unit_price_micro_lamports: 0,
            compute_unit_limit: default_compute_unit_limit(),
            trade_amount_usd: default_trade_amount_usd(),
            inter_trade_delay_secs: default_inter_trade_delay_secs(),
            quote_mints: default_quote_mints(),
        }
    }
}

impl TradingConfig {
    /// Effective slippage in basis points, honoring the percentage cap
    pub fn slippage_bps(&self) -> u32 {
        let cap = (self.max_slippage_pct * 100.0) as u32;
        self.default_slippage_bps.min(cap.max(1))
    }

    pub fn is_quote_mint(&self, mint: &str) -> bool {
        self.quote_mints.iter().any(|m| m == mint)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Max confirmation poll attempts per signature
    #[serde(default = "default_tx_confirm_max_retries")]
    pub tx_confirm_max_retries: u32,
    /// Base delay between polls in seconds
    #[serde(default = "default_tx_confirm_delay_secs")]
    pub tx_confirm_delay_secs: f64,
    /// Interval of the tracker poll cycle in seconds
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tx_confirm_max_retries: default_tx_confirm_max_retries(),
            tx_confirm_delay_secs: default_tx_confirm_delay_secs(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before a component breaker trips
    #[serde(default = "default_component_max_failures")]
    pub component_max_failures: u32,
    /// Auto-reset window for component breakers, minutes
    #[serde(default = "default_component_reset_minutes")]
    pub component_reset_minutes: f64,
    /// Consecutive failures before strategy/token breakers trip
    #[serde(default = "default_scoped_max_failures")]
    pub scoped_max_failures: u32,
    /// Auto-reset window for strategy/token breakers, minutes
    #[serde(default = "default_scoped_reset_minutes")]
    pub scoped_reset_minutes: f64,
    /// Directory for persisted breaker state; empty disables persistence
    #[serde(default)]
    pub persistence_dir: String,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            component_max_failures: default_component_max_failures(),
            component_reset_minutes: default_component_reset_minutes(),
            scoped_max_failures: default_scoped_max_failures(),
            scoped_reset_minutes: default_scoped_reset_minutes(),
            persistence_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Bounded per-mint price history length
    #[serde(default = "default_max_price_history_len")]
    pub max_price_history_len: usize,
    /// Periodic evaluation interval in seconds
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
    /// Default stop-loss as a fraction of entry (0.05 = -5%)
    #[serde(default = "default_stop_loss_pct")]
    pub default_stop_loss_pct: f64,
    /// Default take-profit as a fraction of entry (0.10 = +10%)
    #[serde(default = "default_take_profit_pct")]
    pub default_take_profit_pct: f64,
    /// Trailing stop distance below the session high (0.05 = 5%)
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,
    /// 24h volume must exceed this multiple of the trailing average
    #[serde(default = "default_volume_surge_multiple")]
    pub volume_surge_multiple: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_price_history_len: default_max_price_history_len(),
            evaluation_interval_secs: default_evaluation_interval_secs(),
            default_stop_loss_pct: default_stop_loss_pct(),
            default_take_profit_pct: default_take_profit_pct(),
            trailing_stop_pct: default_trailing_stop_pct(),
            volume_surge_multiple: default_volume_surge_multiple(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Minimum pool liquidity in USD to accept a trade
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: f64,
    /// Maximum pool liquidity in USD (0 disables the ceiling)
    #[serde(default)]
    pub max_liquidity: f64,
    #[serde(default = "default_min_holders")]
    pub min_holders: u64,
    /// Maximum tolerated spread percentage
    #[serde(default = "default_max_spread")]
    pub max_spread: f64,
    /// SOL to keep untouched for fees
    #[serde(default = "default_min_sol_reserve")]
    pub min_sol_reserve: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_liquidity: default_min_liquidity(),
            max_liquidity: 0.0,
            min_holders: default_min_holders(),
            max_spread: default_max_spread(),
            min_sol_reserve: default_min_sol_reserve(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Path to the trading keypair file
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database URL
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_aggregator_url() -> String {
    std::env::var("AGGREGATOR_API_ENDPOINT")
        .unwrap_or_else(|_| "https://quote-api.jup.ag/v6".into())
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_slippage_bps() -> u32 {
    50
}

fn default_max_slippage_pct() -> f64 {
    5.0
}

fn default_compute_unit_limit() -> u32 {
    200_000
}

fn default_trade_amount_usd() -> f64 {
    25.0
}

fn default_inter_trade_delay_secs() -> f64 {
    1.0
}

fn default_quote_mints() -> Vec<String> {
    vec![WSOL_MINT.to_string(), USDC_MINT.to_string()]
}

fn default_tx_confirm_max_retries() -> u32 {
    10
}

fn default_tx_confirm_delay_secs() -> f64 {
    1.0
}

fn default_tick_interval_secs() -> u64 {
    5
}

fn default_component_max_failures() -> u32 {
    20
}

fn default_component_reset_minutes() -> f64 {
    2.0
}

fn default_scoped_max_failures() -> u32 {
    10
}

fn default_scoped_reset_minutes() -> f64 {
    5.0
}

fn default_max_price_history_len() -> usize {
    100
}

fn default_evaluation_interval_secs() -> u64 {
    30
}

fn default_stop_loss_pct() -> f64 {
    0.05
}

fn default_take_profit_pct() -> f64 {
    0.10
}

fn default_trailing_stop_pct() -> f64 {
    0.05
}

fn default_volume_surge_multiple() -> f64 {
    1.5
}

fn default_min_liquidity() -> f64 {
    50_000.0
}

fn default_min_holders() -> u64 {
    50
}

fn default_max_spread() -> f64 {
    3.0
}

fn default_min_sol_reserve() -> f64 {
    0.05
}

fn default_keypair_path() -> String {
    std::env::var("WALLET_KEYPAIR_PATH").unwrap_or_else(|_| "wallet.json".into())
}

fn default_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://supertrade.db".into())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            aggregator: AggregatorConfig::default(),
            trading: TradingConfig::default(),
            tracker: TrackerConfig::default(),
            breakers: BreakerConfig::default(),
            strategy: StrategyConfig::default(),
            validation: ValidationConfig::default(),
            wallet: WalletConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SUPERTRADE_)
            .add_source(
                config::Environment::with_prefix("SUPERTRADE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.trading.default_slippage_bps > 10000 {
            anyhow::bail!("default_slippage_bps cannot exceed 10000 (100%)");
        }

        if self.trading.max_slippage_pct <= 0.0 || self.trading.max_slippage_pct > 100.0 {
            anyhow::bail!("max_slippage_pct must be in (0, 100]");
        }

        if self.trading.trade_amount_usd <= 0.0 {
            anyhow::bail!("trade_amount_usd must be positive");
        }

        if self.trading.quote_mints.is_empty() {
            anyhow::bail!("quote_mints must not be empty");
        }

        if self.tracker.tx_confirm_max_retries == 0 {
            anyhow::bail!("tx_confirm_max_retries must be at least 1");
        }

        if self.breakers.component_max_failures == 0 || self.breakers.scoped_max_failures == 0 {
            anyhow::bail!("breaker failure thresholds must be at least 1");
        }

        if self.strategy.max_price_history_len < 2 {
            anyhow::bail!("max_price_history_len must be at least 2");
        }

        if self.strategy.default_stop_loss_pct <= 0.0 || self.strategy.default_stop_loss_pct >= 1.0
        {
            anyhow::bail!("default_stop_loss_pct must be between 0 and 1");
        }

        if self.strategy.default_take_profit_pct <= 0.0 {
            anyhow::bail!("default_take_profit_pct must be positive");
        }

        if self.validation.max_liquidity > 0.0
            && self.validation.max_liquidity < self.validation.min_liquidity
        {
            anyhow::bail!("max_liquidity cannot be below min_liquidity");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide endpoints with keys)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
  Aggregator:
    base_url: {}
    retries: {}
  Trading:
    paper_trading: {}
    slippage: {}bps
    trade_amount: ${}
    quote_mints: {}
  Tracker:
    max_retries: {}
    base_delay: {}s
  Breakers:
    component: {} failures / {} min
    scoped: {} failures / {} min
  Strategy:
    history_len: {}
    stop_loss: {}%
    take_profit: {}%
    trailing_stop: {}%
  Validation:
    min_liquidity: ${}
    min_holders: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            mask_url(&self.aggregator.base_url),
            self.aggregator.retry_attempts,
            self.trading.paper_trading_enabled,
            self.trading.slippage_bps(),
            self.trading.trade_amount_usd,
            self.trading.quote_mints.len(),
            self.tracker.tx_confirm_max_retries,
            self.tracker.tx_confirm_delay_secs,
            self.breakers.component_max_failures,
            self.breakers.component_reset_minutes,
            self.breakers.scoped_max_failures,
            self.breakers.scoped_reset_minutes,
            self.strategy.max_price_history_len,
            self.strategy.default_stop_loss_pct * 100.0,
            self.strategy.default_take_profit_pct * 100.0,
            self.strategy.trailing_stop_pct * 100.0,
            self.validation.min_liquidity,
            self.validation.min_holders,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}
