//! Exchange integrations.
//!
//! Defines the `Exchange` trait the session and executor are written
//! against, and provides a Binance implementation (USD-M futures or spot).

pub mod binance;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{ExchangeError, MarketInfo, OrderReceipt, OrderRequest, Ticker};

/// Abstraction over a centralised exchange's REST surface.
///
/// Symbols passed in may be unified (`BTC/USDT`) or native (`BTCUSDT`);
/// implementations normalise them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Load the exchange's market list. Doubles as the connection health check.
    async fn load_markets(&self) -> Result<Vec<MarketInfo>, ExchangeError>;

    /// Fetch the latest ticker for a symbol.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;

    /// Submit an order.
    async fn create_order(&self, order: &OrderRequest) -> Result<OrderReceipt, ExchangeError>;

    /// Set leverage for a symbol. A no-op where leverage does not apply.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    /// Release the session.
    async fn close(&self) -> Result<(), ExchangeError>;

    /// Exchange name for logging.
    fn name(&self) -> &'static str;
}

/// Exchange-native symbol: `BTC/USDT`, `BTC/USDT:USDT` and `btc-usdt` all
/// become `BTCUSDT`.
pub fn normalize_symbol(symbol: &str) -> String {
    let pair = symbol.split(':').next().unwrap_or(symbol);
    pair.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Decimal amounts rendered without trailing zeros, as exchanges expect.
pub(crate) fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}
