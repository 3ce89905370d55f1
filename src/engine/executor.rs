//! Order executor.
//!
//! Validates a market order, enforces the position cap, and routes it to
//! the exchange. Every failure is mapped to one log line and an outcome;
//! nothing here retries or returns an error to the polling loop.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::TradingConfig;
use crate::exchange::Exchange;
use crate::types::{
    ErrorCategory, ExchangeError, OrderReceipt, OrderRequest, SessionState, Side,
};

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// What happened to one execution request.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The exchange accepted the order.
    Executed(OrderReceipt),
    /// Dry-run mode: logged and simulated at the last price.
    DryRun(OrderReceipt),
    /// Rejected locally before submission (bad amount or symbol).
    Invalid { reason: String },
    /// The fill would breach the position cap.
    Blocked { projected: Decimal, cap: Decimal },
    /// Submitted, but the exchange call failed.
    Failed { category: ErrorCategory, reason: String },
}

impl ExecutionOutcome {
    pub fn receipt(&self) -> Option<&OrderReceipt> {
        match self {
            ExecutionOutcome::Executed(r) | ExecutionOutcome::DryRun(r) => Some(r),
            _ => None,
        }
    }

    /// Whether the exchange was actually called.
    pub fn reached_exchange(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed(_) | ExecutionOutcome::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    symbol: String,
    max_position: Decimal,
    dry_run: bool,
}

impl Executor {
    pub fn new(symbol: &str, max_position: Decimal, dry_run: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            max_position,
            dry_run,
        }
    }

    pub fn from_config(trading: &TradingConfig) -> Self {
        Self::new(&trading.symbol, trading.max_position, trading.dry_run)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Place a market order for `amount` on `side` and fold the result
    /// into `state`.
    pub async fn execute_trade(
        &self,
        exchange: &dyn Exchange,
        state: &mut SessionState,
        side: Side,
        amount: Decimal,
    ) -> ExecutionOutcome {
        let request = match OrderRequest::market(&self.symbol, side, amount) {
            Ok(r) => r,
            Err(e) => {
                error!(side = %side, amount = %amount, error = %e, "Invalid order parameters");
                return ExecutionOutcome::Invalid { reason: e.to_string() };
            }
        };

        let projected = state.projected_position(side, amount);
        if projected.abs() > self.max_position {
            warn!(
                side = %side,
                amount = %amount,
                position = %state.position,
                projected = %projected,
                cap = %self.max_position,
                "Position cap reached, order blocked"
            );
            return ExecutionOutcome::Blocked {
                projected,
                cap: self.max_position,
            };
        }

        info!("Preparing execution: {side} >> {amount} units.");

        if self.dry_run {
            let price = state.last_price().unwrap_or(Decimal::ZERO);
            let receipt = OrderReceipt::dry_run(&request, price);
            info!(
                order_id = %receipt.order_id,
                symbol = %request.symbol,
                side = %side,
                amount = %amount,
                price = %receipt.price_label(),
                "[DRY RUN] Would place market order"
            );
            state.apply_fill(&receipt);
            return ExecutionOutcome::DryRun(receipt);
        }

        match exchange.create_order(&request).await {
            Ok(receipt) => {
                info!(
                    "EXECUTED: {} | ID: {} | PRICE: {}",
                    receipt.side,
                    receipt.order_id,
                    receipt.price_label()
                );
                state.apply_fill(&receipt);
                ExecutionOutcome::Executed(receipt)
            }
            Err(e) => {
                Self::log_failure(exchange.name(), &e);
                ExecutionOutcome::Failed {
                    category: e.category(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// `critical` for margin shortfalls, `error` for everything else.
    fn severity(e: &ExchangeError) -> &'static str {
        match e {
            ExchangeError::InsufficientFunds(_) => "critical",
            _ => "error",
        }
    }

    fn log_failure(exchange: &str, e: &ExchangeError) {
        let severity = Self::severity(e);
        match e {
            ExchangeError::InsufficientFunds(_) => {
                error!(exchange, severity, error = %e, "INSUFFICIENT MARGIN. Execution aborted.");
            }
            ExchangeError::Network(_) | ExchangeError::RateLimited(_) => {
                error!(exchange, severity, error = %e, "Network latency error during order routing");
            }
            ExchangeError::Authentication(_) => {
                error!(exchange, severity, error = %e, "Order routing refused: credentials rejected");
            }
            ExchangeError::Rejected { .. } => {
                error!(exchange, severity, error = %e, "Exchange rejected order");
            }
            ExchangeError::InvalidOrder(_) | ExchangeError::InvalidResponse(_) => {
                error!(exchange, severity, error = %e, "Unknown runtime failure during execution");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OrderReceipt helpers
// ---------------------------------------------------------------------------

impl OrderReceipt {
    /// Create a dry-run receipt (no real execution), filled at `price`.
    pub fn dry_run(request: &OrderRequest, price: Decimal) -> Self {
        Self {
            order_id: format!("dry-run-{}", uuid::Uuid::new_v4()),
            symbol: request.symbol.clone(),
            side: request.side,
            amount: request.amount,
            filled: request.amount,
            average: (!price.is_zero()).then_some(price),
            status: "SIMULATED".to_string(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
