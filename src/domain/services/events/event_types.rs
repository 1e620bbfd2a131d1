//--------------------------------------------------------------------------------------------------
// STRUCTS & ENUMS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                          | Key Methods       |
// |-----------------|------------------------------------------------------|-------------------|
// | ExchangeEvent   | Committed mutations, published in commit order       | event_type        |
// |                 |                                                      | instrument_id     |
// | EventError      | Error types for event processing                     |                   |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::instrument::LifecycleState;
use crate::domain::models::types::{Order, Position, Settlement, Trade};

/// Errors that can occur in the event system
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to publish an event (e.g., channel closed)
    #[error("Failed to publish event: {0}")]
    PublishError(String),

    /// A handler failed to process an event
    #[error("Failed to process event: {0}")]
    ProcessingError(String),
}

/// Type alias for Result with EventError
pub type EventResult<T> = Result<T, EventError>;

/// Events observed by collaborators outside the trading core (persistence, push updates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExchangeEvent {
    /// An order passed validation and entered the book
    OrderAccepted {
        order: Order,
        timestamp: DateTime<Utc>,
    },

    /// An order was canceled by its owner or dropped for lack of funds
    OrderCancelled {
        order: Order,
        timestamp: DateTime<Utc>,
    },

    /// Orders removed by a lifecycle transition or end-of-life expiry
    OrdersExpired {
        instrument_id: Uuid,
        orders: Vec<Order>,
        timestamp: DateTime<Utc>,
    },

    TradeExecuted {
        trade: Trade,
        timestamp: DateTime<Utc>,
    },

    /// Quote after a mutation that moved the book or the learned probability
    PriceUpdated {
        instrument_id: Uuid,
        current_price: Decimal,
        probability: Decimal,
        timestamp: DateTime<Utc>,
    },

    LifecycleChanged {
        instrument_id: Uuid,
        from: LifecycleState,
        to: LifecycleState,
        timestamp: DateTime<Utc>,
    },

    PositionSettled {
        position: Position,
        settlement: Settlement,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    },
}

impl ExchangeEvent {
    /// Routing key used by the dispatcher.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrderAccepted { .. } => "OrderAccepted",
            Self::OrderCancelled { .. } => "OrderCancelled",
            Self::OrdersExpired { .. } => "OrdersExpired",
            Self::TradeExecuted { .. } => "TradeExecuted",
            Self::PriceUpdated { .. } => "PriceUpdated",
            Self::LifecycleChanged { .. } => "LifecycleChanged",
            Self::PositionSettled { .. } => "PositionSettled",
        }
    }

    pub fn instrument_id(&self) -> Uuid {
        match self {
            Self::OrderAccepted { order, .. } | Self::OrderCancelled { order, .. } => {
                order.instrument_id
            }
            Self::TradeExecuted { trade, .. } => trade.instrument_id,
            Self::PositionSettled { position, .. } => position.instrument_id,
            Self::OrdersExpired { instrument_id, .. }
            | Self::PriceUpdated { instrument_id, .. }
            | Self::LifecycleChanged { instrument_id, .. } => *instrument_id,
        }
    }

    /// Every routing key, in declaration order.
    pub const ALL_TYPES: [&'static str; 7] = [
        "OrderAccepted",
        "OrderCancelled",
        "OrdersExpired",
        "TradeExecuted",
        "PriceUpdated",
        "LifecycleChanged",
        "PositionSettled",
    ];
}
