use thiserror::Error;
use uuid::Uuid;

pub mod matching_engine;

/// Re-export key types for convenience
pub use self::matching_engine::{Fill, FillDecision, MatchResult, MatchingEngine};

/// Errors that can occur during matching engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchingError {
    /// Order not found in the book
    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    /// Orderbook error occurred
    #[error("Orderbook error: {0}")]
    OrderbookError(#[from] crate::domain::services::orderbook::OrderbookError),
}

/// Type alias for Result with MatchingError
pub type MatchingResult<T> = Result<T, MatchingError>;
