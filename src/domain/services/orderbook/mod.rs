use thiserror::Error;
use uuid::Uuid;

pub mod depth;
pub mod orderbook;

/// Errors that can occur within the orderbook service.
///
/// These are internal consistency failures; the exchange validates user input before it
/// reaches the book.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderbookError {
    /// Order not found in the orderbook
    #[error("Order {0} not found in the orderbook")]
    OrderNotFound(Uuid),

    /// Order is for a different instrument than this orderbook
    #[error("Order is for wrong instrument (expected {expected}, got {got})")]
    WrongInstrument { expected: Uuid, got: Uuid },

    /// Order already resting in the book
    #[error("Order {0} is already in the orderbook")]
    DuplicateOrder(Uuid),

    /// Only orders with open quantity may rest
    #[error("Invalid order quantity: {0}")]
    InvalidQuantity(u32),
}
