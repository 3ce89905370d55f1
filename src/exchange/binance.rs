//! Binance REST integration.
//!
//! Supports USD-M perpetual futures (default) and spot.
//!
//! API docs: https://developers.binance.com/docs/derivatives/usds-margined-futures
//! Futures base URL: https://fapi.binance.com (paths under `/fapi/v1`)
//! Spot base URL: https://api.binance.com (paths under `/api/v3`)
//!
//! Auth: signed endpoints take `timestamp` and `recvWindow` in the query
//! string, an HMAC-SHA256 hex `signature` of that query keyed by the API
//! secret, and the API key in the `X-MBX-APIKEY` header.
//!
//! Errors come back as `{"code": -2015, "msg": "..."}` alongside a 4xx/5xx
//! status. 418/429 mean the IP is being rate limited or banned.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{format_amount, normalize_symbol, Exchange};
use crate::config::{Credentials, ExchangeConfig, MarketType};
use crate::types::{ExchangeError, MarketInfo, OrderReceipt, OrderRequest, Ticker};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const SPOT_BASE_URL: &str = "https://api.binance.com";
const EXCHANGE_NAME: &str = "binance";

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// API response types (Binance JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    base_asset: String,
    #[serde(default)]
    quote_asset: String,
}

/// `/ticker/24hr` for a single symbol. Futures omits bid/ask.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    #[serde(default)]
    bid_price: Option<String>,
    #[serde(default)]
    ask_price: Option<String>,
    #[serde(default)]
    volume: Option<String>,
    #[serde(default)]
    close_time: Option<i64>,
}

/// Order response with `newOrderRespType=RESULT`.
///
/// Futures reports `avgPrice` and `updateTime`; spot reports
/// `cummulativeQuoteQty` (sic) and `transactTime`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    avg_price: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
    #[serde(default)]
    update_time: Option<i64>,
    #[serde(default)]
    transact_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LeverageResponse {
    leverage: u32,
    symbol: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Binance REST client.
pub struct BinanceClient {
    http: Client,
    credentials: Credentials,
    market_type: MarketType,
    base_url: String,
    recv_window_ms: u64,
    /// Minimum spacing between requests; `None` disables throttling.
    min_request_interval: Option<Duration>,
    last_request: Mutex<Option<Instant>>,
}

impl BinanceClient {
    /// Create a client from the `[exchange]` config section.
    pub fn new(credentials: Credentials, config: &ExchangeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent("SENTINEL/0.1.0 (execution-harness)")
            .build()
            .context("Failed to build HTTP client for Binance")?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| Self::default_base_url(config.market_type).to_string())
            .trim_end_matches('/')
            .to_string();

        let min_request_interval = config
            .enable_rate_limit
            .then(|| Duration::from_millis(config.min_request_interval_ms));

        Ok(Self {
            http,
            credentials,
            market_type: config.market_type,
            base_url,
            recv_window_ms: config.recv_window_ms,
            min_request_interval,
            last_request: Mutex::new(None),
        })
    }

    pub fn default_base_url(market_type: MarketType) -> &'static str {
        match market_type {
            MarketType::Future => FUTURES_BASE_URL,
            MarketType::Spot => SPOT_BASE_URL,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -- Internal helpers ------------------------------------------------

    fn path(&self, endpoint: &str) -> String {
        let prefix = match self.market_type {
            MarketType::Future => "/fapi/v1",
            MarketType::Spot => "/api/v3",
        };
        format!("{}{prefix}/{endpoint}", self.base_url)
    }

    fn encode_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Hex HMAC-SHA256 of `query` keyed by `secret`.
    fn sign(secret: &str, query: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::Authentication(format!("Unusable API secret: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Append `recvWindow`, `timestamp` and `signature` to the parameters.
    fn signed_query(&self, params: &[(&str, String)]) -> Result<String, ExchangeError> {
        let mut all: Vec<(&str, String)> = params.to_vec();
        all.push(("recvWindow", self.recv_window_ms.to_string()));
        all.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = Self::encode_query(&all);
        let signature = Self::sign(self.credentials.api_secret.expose_secret(), &query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    /// Space requests out when rate limiting is enabled.
    async fn throttle(&self) {
        let Some(min_interval) = self.min_request_interval else {
            return;
        };
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.throttle().await;

        let mut url = self.path(endpoint);
        if !params.is_empty() {
            url = format!("{url}?{}", Self::encode_query(params));
        }
        debug!(url = %url, "Binance public request");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::handle_response(resp).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.throttle().await;

        let query = self.signed_query(params)?;
        let url = format!("{}?{query}", self.path(endpoint));
        debug!(endpoint, method = %method, "Binance signed request");

        let resp = self
            .http
            .request(method, &url)
            .header(API_KEY_HEADER, self.credentials.api_key.expose_secret())
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = resp.status();
        let body = resp.text().await.map_err(Self::transport_error)?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ExchangeError::InvalidResponse(format!("Failed to parse Binance response: {e}"))
        })
    }

    fn transport_error(e: reqwest::Error) -> ExchangeError {
        if e.is_decode() {
            ExchangeError::InvalidResponse(e.to_string())
        } else {
            ExchangeError::Network(e.to_string())
        }
    }

    /// Map a non-2xx response onto an error category.
    fn classify_error(status: StatusCode, body: &str) -> ExchangeError {
        let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
        let code = parsed.as_ref().map(|b| b.code);
        let message = match parsed {
            Some(b) if !b.msg.is_empty() => b.msg,
            _ if !body.trim().is_empty() => body.trim().to_string(),
            _ => status.to_string(),
        };

        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::IM_A_TEAPOT
            || code == Some(-1003)
        {
            return ExchangeError::RateLimited(message);
        }

        if status == StatusCode::UNAUTHORIZED || matches!(code, Some(-1022 | -2014 | -2015)) {
            return ExchangeError::Authentication(message);
        }

        if matches!(code, Some(-2018 | -2019)) || message.to_lowercase().contains("insufficient") {
            return ExchangeError::InsufficientFunds(message);
        }

        if status.is_server_error() {
            return ExchangeError::Network(format!("HTTP {status}: {message}"));
        }

        ExchangeError::Rejected {
            code: code.unwrap_or_else(|| i64::from(status.as_u16())),
            message,
        }
    }

    fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, ExchangeError> {
        Decimal::from_str(raw).map_err(|e| {
            ExchangeError::InvalidResponse(format!("Bad decimal in {field}: {raw:?} ({e})"))
        })
    }

    fn parse_optional(field: &str, raw: Option<&str>) -> Result<Option<Decimal>, ExchangeError> {
        raw.filter(|s| !s.is_empty())
            .map(|s| Self::parse_decimal(field, s))
            .transpose()
    }

    /// Convert a Binance timestamp (ms since epoch) to `DateTime<Utc>`.
    fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    fn to_ticker(raw: Ticker24h) -> Result<Ticker, ExchangeError> {
        Ok(Ticker {
            last: Self::parse_decimal("lastPrice", &raw.last_price)?,
            bid: Self::parse_optional("bidPrice", raw.bid_price.as_deref())?,
            ask: Self::parse_optional("askPrice", raw.ask_price.as_deref())?,
            volume: Self::parse_optional("volume", raw.volume.as_deref())?
                .unwrap_or(Decimal::ZERO),
            timestamp: raw
                .close_time
                .map(Self::ms_to_datetime)
                .unwrap_or_else(Utc::now),
            symbol: raw.symbol,
        })
    }

    fn to_receipt(raw: OrderResponse, request: &OrderRequest) -> Result<OrderReceipt, ExchangeError> {
        let filled = Self::parse_optional("executedQty", raw.executed_qty.as_deref())?
            .unwrap_or(Decimal::ZERO);

        let avg_price = Self::parse_optional("avgPrice", raw.avg_price.as_deref())?
            .filter(|p| !p.is_zero());
        let quote_qty = Self::parse_optional("cummulativeQuoteQty", raw.cummulative_quote_qty.as_deref())?;

        let average = match (avg_price, quote_qty) {
            (Some(p), _) => Some(p),
            (None, Some(q)) if !filled.is_zero() => Some(q / filled),
            _ => None,
        };

        Ok(OrderReceipt {
            order_id: raw.order_id.to_string(),
            symbol: normalize_symbol(&request.symbol),
            side: request.side,
            amount: request.amount,
            filled,
            average,
            status: raw.status.unwrap_or_else(|| "UNKNOWN".to_string()),
            timestamp: raw
                .update_time
                .or(raw.transact_time)
                .map(Self::ms_to_datetime)
                .unwrap_or_else(Utc::now),
        })
    }
}

// ---------------------------------------------------------------------------
// Exchange trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Exchange for BinanceClient {
    async fn load_markets(&self) -> Result<Vec<MarketInfo>, ExchangeError> {
        let info: ExchangeInfoResponse = self.public_get("exchangeInfo", &[]).await?;

        let markets: Vec<MarketInfo> = info
            .symbols
            .into_iter()
            .map(|s| MarketInfo {
                trading: s.status == "TRADING",
                symbol: s.symbol,
                base_asset: s.base_asset,
                quote_asset: s.quote_asset,
            })
            .collect();

        debug!(count = markets.len(), market_type = ?self.market_type, "Binance markets loaded");
        Ok(markets)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let native = normalize_symbol(symbol);
        let raw: Ticker24h = self
            .public_get("ticker/24hr", &[("symbol", native)])
            .await?;
        Self::to_ticker(raw)
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderReceipt, ExchangeError> {
        if self.credentials.is_empty() {
            return Err(ExchangeError::Authentication(
                "API key and secret are required to place orders".to_string(),
            ));
        }

        let params = [
            ("symbol", normalize_symbol(&order.symbol)),
            ("side", order.side.to_string()),
            ("type", order.order_type.to_string()),
            ("quantity", format_amount(order.amount)),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        let raw: OrderResponse = self.signed_request(Method::POST, "order", &params).await?;
        let receipt = Self::to_receipt(raw, order)?;

        info!(
            order_id = %receipt.order_id,
            symbol = %receipt.symbol,
            side = %receipt.side,
            filled = %receipt.filled,
            status = %receipt.status,
            "Binance order accepted"
        );

        Ok(receipt)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        if self.market_type == MarketType::Spot {
            debug!("Leverage does not apply to spot, skipping");
            return Ok(());
        }

        let params = [
            ("symbol", normalize_symbol(symbol)),
            ("leverage", leverage.to_string()),
        ];
        let resp: LeverageResponse = self.signed_request(Method::POST, "leverage", &params).await?;

        info!(symbol = %resp.symbol, leverage = resp.leverage, "Binance leverage set");
        Ok(())
    }

    async fn close(&self) -> Result<(), ExchangeError> {
        // reqwest pools connections per client; nothing to tear down remotely.
        debug!("Binance session released");
        Ok(())
    }

    fn name(&self) -> &'static str {
        EXCHANGE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
