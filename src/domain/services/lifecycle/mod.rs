use thiserror::Error;

use crate::domain::models::instrument::LifecycleState;

pub mod state_machine;

pub use self::state_machine::{
    can_buy, can_cash_out, can_sell, transition, trading_availability, TradingAvailability,
};

/// Errors raised by the instrument lifecycle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested edge is not in the transition table.
    #[error("Invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}
