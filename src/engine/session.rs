//! Trading session: connection bootstrap and the polling loop.
//!
//! One sequential control flow. `run` connects (market load doubles as the
//! health check), then on every poll interval fetches the ticker, updates
//! the session state, asks the signal source for a decision and hands any
//! non-HOLD signal to the executor. The first error that escapes a tick
//! ends the session. Whatever ends it, the exchange is closed exactly once.

use rust_decimal::Decimal;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::executor::Executor;
use crate::config::AppConfig;
use crate::exchange::{normalize_symbol, Exchange};
use crate::signal::SignalSource;
use crate::types::{ErrorCategory, ExchangeError, MarketInfo, SessionState};

// ---------------------------------------------------------------------------
// Session outcome
// ---------------------------------------------------------------------------

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// The shutdown future completed (Ctrl+C in the binary).
    Interrupted,
    AuthenticationFailed(String),
    NetworkFailure(String),
    ExchangeFailure(String),
    Fatal(String),
}

impl SessionExit {
    pub fn from_error(e: &ExchangeError) -> Self {
        let reason = e.to_string();
        match e.category() {
            ErrorCategory::Authentication => SessionExit::AuthenticationFailed(reason),
            ErrorCategory::Network => SessionExit::NetworkFailure(reason),
            ErrorCategory::Exchange => SessionExit::ExchangeFailure(reason),
            ErrorCategory::Other => SessionExit::Fatal(reason),
        }
    }

    /// Stopped on request rather than by a failure.
    pub fn is_clean(&self) -> bool {
        *self == SessionExit::Interrupted
    }
}

impl fmt::Display for SessionExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionExit::Interrupted => write!(f, "interrupted"),
            SessionExit::AuthenticationFailed(r) => write!(f, "authentication failed: {r}"),
            SessionExit::NetworkFailure(r) => write!(f, "network failure: {r}"),
            SessionExit::ExchangeFailure(r) => write!(f, "exchange failure: {r}"),
            SessionExit::Fatal(r) => write!(f, "fatal: {r}"),
        }
    }
}

/// Summary handed back when a session ends.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub exit: SessionExit,
    pub state: SessionState,
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn ticks(&self) -> u64 {
        self.state.ticks_processed
    }

    pub fn orders_placed(&self) -> u64 {
        self.state.orders_placed
    }

    pub fn final_position(&self) -> Decimal {
        self.state.position
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exit={} | {} | elapsed={:.1}s",
            self.exit,
            self.state,
            self.elapsed.as_secs_f64()
        )
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    name: String,
    exchange: Box<dyn Exchange>,
    signal: Box<dyn SignalSource>,
    executor: Executor,
    state: SessionState,
    symbol: String,
    trade_size: Decimal,
    leverage: u32,
    poll_interval: Duration,
    latency_tolerance: Duration,
}

impl Session {
    pub fn new(exchange: Box<dyn Exchange>, signal: Box<dyn SignalSource>, cfg: &AppConfig) -> Self {
        Self {
            name: cfg.session.name.clone(),
            exchange,
            signal,
            executor: Executor::from_config(&cfg.trading),
            state: SessionState::new(),
            symbol: cfg.trading.symbol.clone(),
            trade_size: cfg.trading.trade_size,
            leverage: cfg.trading.leverage,
            poll_interval: cfg.poll_interval(),
            latency_tolerance: cfg.latency_tolerance(),
        }
    }

    /// Connect, poll until failure or `shutdown` completes, then close.
    pub async fn run<F>(mut self, shutdown: F) -> SessionReport
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        tokio::pin!(shutdown);

        let exit = tokio::select! {
            exit = self.connect_and_poll() => exit,
            _ = &mut shutdown => SessionExit::Interrupted,
        };

        Self::log_exit(&exit);

        if let Err(e) = self.exchange.close().await {
            warn!(exchange = self.exchange.name(), error = %e, "Exchange close failed");
        }
        info!(session = %self.name, "Session closed. Execution terminated.");

        SessionReport {
            exit,
            state: self.state,
            elapsed: started.elapsed(),
        }
    }

    async fn connect_and_poll(&mut self) -> SessionExit {
        if let Err(e) = self.connect().await {
            return SessionExit::from_error(&e);
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                return SessionExit::from_error(&e);
            }
        }
    }

    /// Health-check the exchange and apply leverage.
    pub async fn connect(&mut self) -> Result<usize, ExchangeError> {
        info!(
            session = %self.name,
            exchange = self.exchange.name(),
            "Initializing connection..."
        );
        info!(symbol = %self.symbol, "Targeting: {}", self.symbol);

        let markets = self.exchange.load_markets().await?;
        info!(markets = markets.len(), "Handshake successful. Markets loaded: {}", markets.len());

        if !symbol_listed(&markets, &self.symbol) {
            warn!(symbol = %self.symbol, "Symbol not listed in exchange markets");
        }

        match self.exchange.set_leverage(&self.symbol, self.leverage).await {
            Ok(()) => debug!(leverage = self.leverage, "Leverage applied"),
            Err(e @ ExchangeError::Authentication(_)) => return Err(e),
            Err(e) => warn!(leverage = self.leverage, error = %e, "Could not set leverage, continuing"),
        }

        if self.executor.is_dry_run() {
            warn!("DRY RUN: orders will be simulated, not submitted.");
        }
        if !self.signal.is_live() {
            warn!("Entering STAGING MODE loop.");
            warn!(signal = self.signal.name(), "Live signal engine is OFFLINE.");
        }

        Ok(markets.len())
    }

    /// One poll: fetch, record, decide, maybe execute.
    async fn tick(&mut self) -> Result<(), ExchangeError> {
        let started = Instant::now();
        let ticker = self.exchange.fetch_ticker(&self.symbol).await?;
        let latency = started.elapsed();

        if exceeds_tolerance(latency, self.latency_tolerance) {
            warn!(
                latency_ms = latency.as_millis() as u64,
                tolerance_ms = self.latency_tolerance.as_millis() as u64,
                "Ticker round trip above latency tolerance"
            );
        }

        info!(
            symbol = %ticker.symbol,
            latency_ms = latency.as_millis() as u64,
            "Tick received. Price: {:.2}",
            ticker.last
        );

        self.state.update_book(ticker.clone());
        let signal = self.signal.evaluate(&ticker, &self.state);

        match signal.side() {
            Some(side) => {
                let outcome = self
                    .executor
                    .execute_trade(self.exchange.as_ref(), &mut self.state, side, self.trade_size)
                    .await;
                debug!(signal = %signal, outcome = ?outcome, "Signal handled");
            }
            None => debug!("Logic signal: NEUTRAL/HOLD"),
        }

        Ok(())
    }

    fn log_exit(exit: &SessionExit) {
        match exit {
            SessionExit::Interrupted => info!("Process interrupted by user."),
            SessionExit::AuthenticationFailed(reason) => {
                warn!("--- SECURITY PROTOCOL ---");
                warn!("API authorization failed. The exchange rejected your credentials.");
                warn!(reason = %reason, "Reason: {reason}");
                warn!("Action: verify the API key/secret environment variables and key permissions.");
                info!("Session switching to DISCONNECTED state.");
            }
            SessionExit::NetworkFailure(reason) => error!(reason = %reason, "Network latency error"),
            SessionExit::ExchangeFailure(reason) => error!(reason = %reason, "Exchange error"),
            SessionExit::Fatal(reason) => error!(reason = %reason, "Fatal runtime failure"),
        }
    }
}

/// A zero tolerance disables the latency check.
fn exceeds_tolerance(latency: Duration, tolerance: Duration) -> bool {
    !tolerance.is_zero() && latency > tolerance
}

/// An empty market list says nothing, so it counts as listed.
fn symbol_listed(markets: &[MarketInfo], symbol: &str) -> bool {
    let native = normalize_symbol(symbol);
    markets.is_empty() || markets.iter().any(|m| m.symbol == native)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
