//! Shared types for the SENTINEL harness.
//!
//! The exchange client, the signal source, the executor and the polling
//! session all speak in these types, so they live in one place with no
//! dependencies on the rest of the crate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Side / Signal
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells. Used to turn fills into position deltas.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Parse an order side. Only `buy` and `sell` (any case) are accepted.
impl FromStr for Side {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            _ => Err(ParseSideError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid side parameter: {0:?}")]
pub struct ParseSideError(pub String);

/// Output of a signal source for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Hold,
    Buy,
    Sell,
}

impl Signal {
    /// The order side this signal asks for, or `None` for HOLD.
    pub fn side(&self) -> Option<Side> {
        match self {
            Signal::Hold => None,
            Signal::Buy => Some(Side::Buy),
            Signal::Sell => Some(Side::Sell),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Hold => write!(f, "HOLD"),
            Signal::Buy => write!(f, "BUY"),
            Signal::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Signal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HOLD" => Ok(Signal::Hold),
            "BUY" => Ok(Signal::Buy),
            "SELL" => Ok(Signal::Sell),
            _ => anyhow::bail!("Unknown signal: {s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Latest traded price / quote snapshot for a trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// Exchange-native symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    pub last: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    /// Rolling 24h volume in base units.
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// Mid of bid/ask when both sides are quoted.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn sample(last: Decimal) -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            last,
            bid: None,
            ask: None,
            volume: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} last={:.2}", self.symbol, self.last)?;
        if let (Some(b), Some(a)) = (self.bid, self.ask) {
            write!(f, " bid={b:.2} ask={a:.2}")?;
        }
        Ok(())
    }
}

/// One listed market as reported by the exchange's info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub trading: bool,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
        }
    }
}

/// A validated order ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: Decimal,
}

impl OrderRequest {
    /// Build a market order. Rejects empty symbols and non-positive amounts.
    pub fn market(symbol: &str, side: Side, amount: Decimal) -> Result<Self, ExchangeError> {
        if symbol.trim().is_empty() {
            return Err(ExchangeError::InvalidOrder("empty symbol".to_string()));
        }
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder(format!(
                "amount must be positive, got {amount}"
            )));
        }
        Ok(Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            amount,
        })
    }
}

/// What the exchange reported back for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub amount: Decimal,
    pub filled: Decimal,
    /// Average fill price, if the exchange reported one.
    pub average: Option<Decimal>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl OrderReceipt {
    pub fn is_filled(&self) -> bool {
        self.filled > Decimal::ZERO
    }

    /// Price text for logs: the average, or "Market" when unknown.
    pub fn price_label(&self) -> String {
        match self.average {
            Some(p) if !p.is_zero() => format!("{p:.2}"),
            _ => "Market".to_string(),
        }
    }
}

impl fmt::Display for OrderReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} filled={} @ {} [{}] id={}",
            self.side,
            self.amount,
            self.symbol,
            self.filled,
            self.price_label(),
            self.status,
            self.order_id,
        )
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// State of one trading session. Owned by the polling loop, which is the
/// only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub last_update_time: DateTime<Utc>,
    pub current_book: Option<Ticker>,
    /// Signed position in base units; positive is long.
    pub position: Decimal,
    pub active_order_id: Option<String>,
    pub ticks_processed: u64,
    pub orders_placed: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            last_update_time: Utc::now(),
            current_book: None,
            position: Decimal::ZERO,
            active_order_id: None,
            ticks_processed: 0,
            orders_placed: 0,
        }
    }

    /// Store the latest snapshot and stamp the update time.
    pub fn update_book(&mut self, ticker: Ticker) {
        self.current_book = Some(ticker);
        self.last_update_time = Utc::now();
        self.ticks_processed += 1;
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.current_book.as_ref().map(|t| t.last)
    }

    /// Position after a hypothetical fill of `amount` on `side`.
    pub fn projected_position(&self, side: Side, amount: Decimal) -> Decimal {
        self.position + side.sign() * amount
    }

    /// Fold an order result into the position. Unfilled orders are tracked
    /// as the active order until a later fill replaces them.
    pub fn apply_fill(&mut self, receipt: &OrderReceipt) {
        self.orders_placed += 1;
        if receipt.is_filled() {
            self.position += receipt.side.sign() * receipt.filled;
            self.active_order_id = None;
        } else {
            self.active_order_id = Some(receipt.order_id.clone());
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self
            .last_price()
            .map(|p| format!("{p:.2}"))
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "position={} | last={} | ticks={} | orders={} | active_order={}",
            self.position,
            last,
            self.ticks_processed,
            self.orders_placed,
            self.active_order_id.as_deref().unwrap_or("none"),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure categories used when logging and when deciding how a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Network,
    Exchange,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Authentication => write!(f, "authentication"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Exchange => write!(f, "exchange"),
            ErrorCategory::Other => write!(f, "other"),
        }
    }
}

/// Errors returned by exchange clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Exchange rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid exchange response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExchangeError::Authentication(_) => ErrorCategory::Authentication,
            ExchangeError::Network(_) | ExchangeError::RateLimited(_) => ErrorCategory::Network,
            ExchangeError::InsufficientFunds(_) | ExchangeError::Rejected { .. } => {
                ErrorCategory::Exchange
            }
            ExchangeError::InvalidOrder(_) | ExchangeError::InvalidResponse(_) => {
                ErrorCategory::Other
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
