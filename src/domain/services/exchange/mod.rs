use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::instrument::LifecycleState;
use crate::domain::models::types::TypeError;
use crate::domain::services::ledger::LedgerError;
use crate::domain::services::lifecycle::LifecycleError;
use crate::domain::services::matching_engine::MatchingError;
use crate::domain::services::orderbook::OrderbookError;

pub mod exchange_service;
pub mod market;

pub use self::exchange_service::Exchange;
pub use self::market::{
    CancelOutcome, CashOutOutcome, InstantTradeOutcome, Market, MarketContext, MarketSummary,
    PlaceOrderOutcome,
};

/// Coarse classification of `ExchangeError` for callers that map errors to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    NotTradeable,
    DuplicatePosition,
    InsufficientBalance,
    NotFound,
    InvalidTransition,
    Internal,
}

/// Errors returned by every exchange operation. None of them leaves an instrument half-mutated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Malformed side, quantity or price
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The lifecycle state forbids the action
    #[error("Instrument {instrument_id} is not tradeable: {reason}")]
    NotTradeable {
        instrument_id: Uuid,
        reason: String,
    },

    /// The user already has an open order or a position on the instrument
    #[error("User {user_id} already has an open order or position on instrument {instrument_id}")]
    DuplicatePosition { user_id: Uuid, instrument_id: Uuid },

    #[error("Insufficient balance for user {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        user_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// Book bookkeeping disagreed with itself, or the account seam refused a credit
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotTradeable { .. } => ErrorKind::NotTradeable,
            Self::DuplicatePosition { .. } => ErrorKind::DuplicatePosition,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_tradeable(instrument_id: Uuid, reason: impl Into<String>) -> Self {
        Self::NotTradeable {
            instrument_id,
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with ExchangeError
pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl From<LifecycleError> for ExchangeError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
        }
    }
}

impl From<LedgerError> for ExchangeError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                user_id,
                required,
                available,
            } => Self::InsufficientBalance {
                user_id,
                required,
                available,
            },
            LedgerError::PositionLimit {
                user_id,
                instrument_id,
            } => Self::DuplicatePosition {
                user_id,
                instrument_id,
            },
            LedgerError::PositionNotFound { .. } => Self::NotFound(err.to_string()),
            LedgerError::InvalidAmount(_) => Self::Validation(err.to_string()),
            LedgerError::CreditFailed { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<MatchingError> for ExchangeError {
    fn from(err: MatchingError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<OrderbookError> for ExchangeError {
    fn from(err: OrderbookError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<TypeError> for ExchangeError {
    fn from(err: TypeError) -> Self {
        Self::Validation(err.to_string())
    }
}
