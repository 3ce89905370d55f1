//! `BinanceClient` against a local fake of the Binance REST API.
//!
//! The fake verifies the API key header and the HMAC signature the same
//! way Binance does, and answers with Binance-shaped bodies and errors.

use axum::extract::{Query, RawQuery};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use sentinel::config::{AppConfig, Credentials, ExchangeConfig, MarketType};
use sentinel::engine::session::{Session, SessionExit};
use sentinel::exchange::binance::BinanceClient;
use sentinel::exchange::Exchange;
use sentinel::signal::NeutralSignal;
use sentinel::types::{ExchangeError, OrderRequest, Side};

const API_KEY: &str = "fake-api-key";
const API_SECRET: &str = "fake-api-secret";

// ---------------------------------------------------------------------------
// Fake server
// ---------------------------------------------------------------------------

fn binance_error(status: StatusCode, code: i64, msg: &str) -> Response {
    (status, Json(json!({ "code": code, "msg": msg }))).into_response()
}

/// Check the key header and signature; return the signed parameters.
fn authorize(headers: &HeaderMap, raw: Option<String>) -> Result<HashMap<String, String>, Response> {
    let key = headers.get("X-MBX-APIKEY").and_then(|v| v.to_str().ok());
    if key != Some(API_KEY) {
        return Err(binance_error(
            StatusCode::UNAUTHORIZED,
            -2015,
            "Invalid API-key, IP, or permissions for action.",
        ));
    }

    let raw = raw.unwrap_or_default();
    let Some((unsigned, signature)) = raw.rsplit_once("&signature=") else {
        return Err(binance_error(StatusCode::BAD_REQUEST, -1102, "Mandatory parameter 'signature' was not sent."));
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(API_SECRET.as_bytes()).unwrap();
    mac.update(unsigned.as_bytes());
    if hex::encode(mac.finalize().into_bytes()) != signature {
        return Err(binance_error(StatusCode::BAD_REQUEST, -1022, "Signature for this request is not valid."));
    }

    let params: HashMap<String, String> = unsigned
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    if !params.contains_key("timestamp") || !params.contains_key("recvWindow") {
        return Err(binance_error(StatusCode::BAD_REQUEST, -1102, "Mandatory parameter 'timestamp' was not sent."));
    }
    Ok(params)
}

async fn exchange_info() -> Json<Value> {
    Json(json!({
        "timezone": "UTC",
        "symbols": [
            { "symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT" },
            { "symbol": "ETHUSDT", "status": "BREAK", "baseAsset": "ETH", "quoteAsset": "USDT" }
        ]
    }))
}

async fn futures_ticker(Query(params): Query<HashMap<String, String>>) -> Response {
    match params.get("symbol").map(String::as_str) {
        Some("BTCUSDT") => Json(json!({
            "symbol": "BTCUSDT",
            "priceChange": "-94.99",
            "lastPrice": "64123.40",
            "volume": "182340.117",
            "closeTime": 1700000000000i64
        }))
        .into_response(),
        Some("RATEUSDT") => binance_error(
            StatusCode::TOO_MANY_REQUESTS,
            -1003,
            "Too many requests; current limit is 2400 requests per minute.",
        ),
        Some("DOWNUSDT") => (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response(),
        _ => binance_error(StatusCode::BAD_REQUEST, -1121, "Invalid symbol."),
    }
}

async fn futures_order(headers: HeaderMap, RawQuery(raw): RawQuery) -> Response {
    let params = match authorize(&headers, raw) {
        Ok(p) => p,
        Err(r) => return r,
    };

    let quantity: f64 = params.get("quantity").and_then(|q| q.parse().ok()).unwrap_or(0.0);
    if quantity > 1.0 {
        return binance_error(StatusCode::BAD_REQUEST, -2019, "Margin is insufficient.");
    }

    Json(json!({
        "orderId": 8389765,
        "symbol": params["symbol"],
        "status": "FILLED",
        "side": params["side"],
        "type": params["type"],
        "origQty": params["quantity"],
        "executedQty": params["quantity"],
        "avgPrice": "64120.10",
        "updateTime": 1700000000123i64
    }))
    .into_response()
}

async fn futures_leverage(headers: HeaderMap, RawQuery(raw): RawQuery) -> Response {
    let params = match authorize(&headers, raw) {
        Ok(p) => p,
        Err(r) => return r,
    };
    let leverage: u32 = params.get("leverage").and_then(|l| l.parse().ok()).unwrap_or(0);
    if leverage > 125 {
        return binance_error(StatusCode::BAD_REQUEST, -4028, "Leverage is not valid");
    }
    Json(json!({
        "leverage": leverage,
        "maxNotionalValue": "1000000",
        "symbol": params["symbol"]
    }))
    .into_response()
}

async fn spot_ticker() -> Json<Value> {
    Json(json!({
        "symbol": "BTCUSDT",
        "lastPrice": "64100.00",
        "bidPrice": "64099.50",
        "askPrice": "64100.50",
        "volume": "25000.5",
        "closeTime": 1700000000000i64
    }))
}

async fn spot_order(headers: HeaderMap, RawQuery(raw): RawQuery) -> Response {
    let params = match authorize(&headers, raw) {
        Ok(p) => p,
        Err(r) => return r,
    };
    Json(json!({
        "symbol": params["symbol"],
        "orderId": 28,
        "transactTime": 1700000000456i64,
        "executedQty": "0.5",
        "cummulativeQuoteQty": "32050.00",
        "status": "FILLED",
        "side": params["side"]
    }))
    .into_response()
}

async fn spawn_fake_binance() -> SocketAddr {
    let app = Router::new()
        .route("/fapi/v1/exchangeInfo", get(exchange_info))
        .route("/fapi/v1/ticker/24hr", get(futures_ticker))
        .route("/fapi/v1/order", post(futures_order))
        .route("/fapi/v1/leverage", post(futures_leverage))
        .route("/api/v3/exchangeInfo", get(exchange_info))
        .route("/api/v3/ticker/24hr", get(spot_ticker))
        .route("/api/v3/order", post(spot_order));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn exchange_config(addr: SocketAddr, market_type: MarketType) -> ExchangeConfig {
    ExchangeConfig {
        name: "binance".to_string(),
        market_type,
        api_key_env: "UNUSED".to_string(),
        api_secret_env: "UNUSED".to_string(),
        base_url: Some(format!("http://{addr}")),
        recv_window_ms: 5000,
        request_timeout_secs: 5,
        enable_rate_limit: false,
        min_request_interval_ms: 0,
    }
}

async fn client(market_type: MarketType) -> BinanceClient {
    client_with(Credentials::new(API_KEY, API_SECRET), market_type).await
}

async fn client_with(credentials: Credentials, market_type: MarketType) -> BinanceClient {
    let addr = spawn_fake_binance().await;
    BinanceClient::new(credentials, &exchange_config(addr, market_type)).unwrap()
}

fn buy(amount: rust_decimal::Decimal) -> OrderRequest {
    OrderRequest::market("BTC/USDT:USDT", Side::Buy, amount).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_load_markets() {
    let client = client(MarketType::Future).await;
    let markets = tokio_test::assert_ok!(client.load_markets().await);

    assert_eq!(markets.len(), 2);
    assert_eq!(markets[0].symbol, "BTCUSDT");
    assert!(markets[0].trading);
    assert!(!markets[1].trading);
}

#[tokio::test]
async fn test_fetch_futures_ticker() {
    let client = client(MarketType::Future).await;
    let ticker = tokio_test::assert_ok!(client.fetch_ticker("BTC/USDT:USDT").await);

    assert_eq!(ticker.symbol, "BTCUSDT");
    assert_eq!(ticker.last, dec!(64123.40));
    assert_eq!(ticker.volume, dec!(182340.117));
    assert_eq!(ticker.bid, None);
    assert_eq!(ticker.timestamp.timestamp_millis(), 1700000000000);
}

#[tokio::test]
async fn test_fetch_spot_ticker_has_quotes() {
    let client = client(MarketType::Spot).await;
    let ticker = tokio_test::assert_ok!(client.fetch_ticker("BTC/USDT").await);

    assert_eq!(ticker.bid, Some(dec!(64099.50)));
    assert_eq!(ticker.ask, Some(dec!(64100.50)));
    assert_eq!(ticker.mid(), Some(dec!(64100.00)));
}

#[tokio::test]
async fn test_ticker_errors_are_classified() {
    let client = client(MarketType::Future).await;

    let err = tokio_test::assert_err!(client.fetch_ticker("NOPE/USDT").await);
    assert_eq!(err, ExchangeError::Rejected { code: -1121, message: "Invalid symbol.".into() });

    let err = tokio_test::assert_err!(client.fetch_ticker("RATE/USDT").await);
    assert!(matches!(err, ExchangeError::RateLimited(_)));

    let err = tokio_test::assert_err!(client.fetch_ticker("DOWN/USDT").await);
    assert!(matches!(err, ExchangeError::Network(_)));
}

#[tokio::test]
async fn test_unreachable_host_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = BinanceClient::new(
        Credentials::new(API_KEY, API_SECRET),
        &exchange_config(addr, MarketType::Future),
    )
    .unwrap();

    let err = tokio_test::assert_err!(client.load_markets().await);
    assert!(matches!(err, ExchangeError::Network(_)));
}

#[tokio::test]
async fn test_create_futures_order() {
    let client = client(MarketType::Future).await;
    let receipt = tokio_test::assert_ok!(client.create_order(&buy(dec!(0.005))).await);

    assert_eq!(receipt.order_id, "8389765");
    assert_eq!(receipt.symbol, "BTCUSDT");
    assert_eq!(receipt.side, Side::Buy);
    assert_eq!(receipt.filled, dec!(0.005));
    assert_eq!(receipt.average, Some(dec!(64120.10)));
    assert!(receipt.is_filled());
    assert_eq!(receipt.price_label(), "64120.10");
}

#[tokio::test]
async fn test_create_spot_order_derives_average() {
    let client = client(MarketType::Spot).await;
    let receipt = tokio_test::assert_ok!(client.create_order(&buy(dec!(0.5))).await);

    assert_eq!(receipt.order_id, "28");
    assert_eq!(receipt.average, Some(dec!(64100)));
}

#[tokio::test]
async fn test_order_with_wrong_key_is_auth_error() {
    let client = client_with(Credentials::new("other-key", API_SECRET), MarketType::Future).await;
    let err = tokio_test::assert_err!(client.create_order(&buy(dec!(0.005))).await);
    assert!(matches!(err, ExchangeError::Authentication(_)));
}

#[tokio::test]
async fn test_order_with_wrong_secret_is_auth_error() {
    let client = client_with(Credentials::new(API_KEY, "other-secret"), MarketType::Future).await;
    let err = tokio_test::assert_err!(client.create_order(&buy(dec!(0.005))).await);
    assert_eq!(
        err,
        ExchangeError::Authentication("Signature for this request is not valid.".into())
    );
}

#[tokio::test]
async fn test_oversized_order_is_insufficient_funds() {
    let client = client(MarketType::Future).await;
    let err = tokio_test::assert_err!(client.create_order(&buy(dec!(2))).await);
    assert!(matches!(err, ExchangeError::InsufficientFunds(_)));
}

#[tokio::test]
async fn test_set_leverage() {
    let client = client(MarketType::Future).await;
    tokio_test::assert_ok!(client.set_leverage("BTC/USDT:USDT", 5).await);

    let err = tokio_test::assert_err!(client.set_leverage("BTC/USDT:USDT", 200).await);
    assert!(matches!(err, ExchangeError::Rejected { code: -4028, .. }));
}

#[tokio::test]
async fn test_leverage_without_credentials_is_auth_error() {
    let client = client_with(Credentials::new("", ""), MarketType::Future).await;
    let err = tokio_test::assert_err!(client.set_leverage("BTCUSDT", 5).await);
    assert!(matches!(err, ExchangeError::Authentication(_)));
}

#[tokio::test]
async fn test_session_over_http() {
    let addr = spawn_fake_binance().await;
    let mut cfg = AppConfig::from_toml(
        r#"
[session]
name = "http"
poll_interval_ms = 10

[exchange]
name = "binance"
api_key_env = "UNUSED"
api_secret_env = "UNUSED"

[trading]
symbol = "BTC/USDT:USDT"
trade_size = 0.005
max_position = 0.02
leverage = 5
latency_tolerance_ms = 1000
"#,
    )
    .unwrap();
    cfg.exchange = exchange_config(addr, MarketType::Future);

    let exchange = BinanceClient::new(Credentials::new(API_KEY, API_SECRET), &cfg.exchange).unwrap();
    let session = Session::new(Box::new(exchange), Box::new(NeutralSignal::new()), &cfg);
    let report = session.run(tokio::time::sleep(Duration::from_millis(150))).await;

    assert_eq!(report.exit, SessionExit::Interrupted);
    assert!(report.ticks() >= 1);
    assert_eq!(report.orders_placed(), 0);
    assert_eq!(report.state.last_price(), Some(dec!(64123.40)));
}
