//! Signal sources.
//!
//! A `SignalSource` turns the latest ticker and session state into a
//! HOLD / BUY / SELL decision. The only source shipped here is
//! `NeutralSignal`, which never trades: the order-flow-imbalance engine
//! that would plug in at this seam is not part of this crate.

use tracing::debug;

use crate::types::{SessionState, Signal, Ticker};

/// Produces one signal per polling tick.
pub trait SignalSource: Send {
    /// Evaluate the latest snapshot.
    fn evaluate(&mut self, ticker: &Ticker, state: &SessionState) -> Signal;

    /// Source name for logging.
    fn name(&self) -> &str;

    /// False for placeholder sources that can never emit a trade.
    fn is_live(&self) -> bool {
        true
    }
}

/// Always returns HOLD.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeutralSignal;

impl NeutralSignal {
    pub fn new() -> Self {
        Self
    }
}

impl SignalSource for NeutralSignal {
    fn evaluate(&mut self, ticker: &Ticker, _state: &SessionState) -> Signal {
        debug!(symbol = %ticker.symbol, "Signal engine offline, holding");
        Signal::Hold
    }

    fn name(&self) -> &str {
        "neutral"
    }

    fn is_live(&self) -> bool {
        false
    }
}
