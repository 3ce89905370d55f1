//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (or the file named by `SENTINEL_CONFIG`) and
//! deserializes it into strongly-typed structs. API credentials are not
//! stored in the file: it names the environment variables that hold them,
//! and they are resolved at startup into `secrecy` wrappers.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Default config path when `SENTINEL_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Binance caps leverage at 125x on its deepest books.
const MAX_LEVERAGE: u32 = 125;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_name")]
    pub name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    /// USD-M perpetual futures.
    Future,
    Spot,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default = "default_market_type")]
    pub market_type: MarketType,
    pub api_key_env: String,
    pub api_secret_env: String,
    /// Overrides the production REST endpoint (testnet, local mocks).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enable_rate_limit: bool,
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradingConfig {
    /// Unified (`BTC/USDT`, `BTC/USDT:USDT`) or native (`BTCUSDT`) symbol.
    pub symbol: String,
    pub trade_size: Decimal,
    /// Hard cap on the absolute position, in base units.
    pub max_position: Decimal,
    pub leverage: u32,
    pub latency_tolerance_ms: u64,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_session_name() -> String {
    "Sentinel-01".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_market_type() -> MarketType {
    MarketType::Future
}

fn default_recv_window_ms() -> u64 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_min_request_interval_ms() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

/// API key pair resolved from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: SecretString,
    pub api_secret: SecretString,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            api_secret: SecretString::new(api_secret.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.expose_secret().is_empty() || self.api_secret.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Path to load from: `SENTINEL_CONFIG` if set, else `config.toml`.
    pub fn path_from_env() -> String {
        std::env::var("SENTINEL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Reject configurations the session could never run with.
    pub fn validate(&self) -> Result<()> {
        if self.session.name.trim().is_empty() {
            anyhow::bail!("session.name must not be empty");
        }
        if self.session.poll_interval_ms == 0 {
            anyhow::bail!("session.poll_interval_ms must be greater than zero");
        }
        if !self.exchange.name.eq_ignore_ascii_case("binance") {
            anyhow::bail!("Unsupported exchange: {}", self.exchange.name);
        }
        if self.trading.symbol.trim().is_empty() {
            anyhow::bail!("trading.symbol must not be empty");
        }
        if self.trading.trade_size <= Decimal::ZERO {
            anyhow::bail!("trading.trade_size must be positive");
        }
        if self.trading.max_position < self.trading.trade_size {
            anyhow::bail!(
                "trading.max_position ({}) is below trading.trade_size ({})",
                self.trading.max_position,
                self.trading.trade_size
            );
        }
        if self.trading.leverage == 0 || self.trading.leverage > MAX_LEVERAGE {
            anyhow::bail!("trading.leverage must be within 1..={MAX_LEVERAGE}");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms)
    }

    pub fn latency_tolerance(&self) -> Duration {
        Duration::from_millis(self.trading.latency_tolerance_ms)
    }

    /// Resolve the API key pair named in `[exchange]`.
    pub fn credentials(&self) -> Result<Credentials> {
        let api_key = Self::resolve_env(&self.exchange.api_key_env)?;
        let api_secret = Self::resolve_env(&self.exchange.api_secret_env)?;
        Ok(Credentials::new(api_key, api_secret))
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
