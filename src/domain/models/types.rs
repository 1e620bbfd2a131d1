//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module defines the core data types used throughout the trading core,
// including orders, trades, positions and the status/side enums they carry.
//
// | Section            | Description                                                      |
// |--------------------|------------------------------------------------------------------|
// | ENUMS              | Side, OrderStatus, OrderSource, Settlement.                      |
// | STRUCTS            | Order, Trade, Position.                                          |
// | Potential Errors   | Errors raised while parsing wire values into these types.        |
// | TESTS              | Unit tests for the defined types.                                |
//--------------------------------------------------------------------------------------------------

//--------------------------------------------------------------------------------------------------
//  ENUMS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                         |
// |---------------|-----------------------------------------------------|
// | Side          | Side of an order (Bid/Ask).                         |
// | OrderStatus   | Lifecycle status of an order.                       |
// | OrderSource   | Which user flow created the order.                  |
// | Settlement    | Outcome of an instrument used when cashing out.     |
//--------------------------------------------------------------------------------------------------
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::instrument::Direction;

/// Account used as counterparty when the house issues or redeems a contract.
pub const HOUSE_ACCOUNT: Uuid = Uuid::nil();

/// Represents the side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy interest.
    Bid,
    /// Sell interest.
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Bid => Self::Ask,
            Self::Ask => Self::Bid,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

impl FromStr for Side {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bid" | "buy" => Ok(Self::Bid),
            "ask" | "sell" => Ok(Self::Ask),
            other => Err(TypeError::InvalidSide(other.to_string())),
        }
    }
}

/// Represents the lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted and resting with its full quantity.
    Open,
    /// Some quantity has traded, the rest is still resting.
    PartiallyFilled,
    /// No quantity remains.
    Filled,
    /// Withdrawn by its owner (or rejected while resting).
    Canceled,
    /// Removed by a lifecycle transition.
    Expired,
}

impl OrderStatus {
    /// Terminal orders never return to the book.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Expired)
    }
}

/// Indicates which user flow created the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    /// Placed explicitly through the limit order flow.
    LimitOrder,
    /// Synthesized by the instant buy/sell flow.
    InstantTrade,
}

/// Result of the underlying statistic, supplied by the caller at cash-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Settlement {
    /// The statistic cleared the line in the contract's direction.
    Won,
    /// The statistic did not clear the line.
    Lost,
    /// The statistic landed exactly on the line; the entry price is refunded.
    Push,
}

impl Settlement {
    /// Derives the settlement from the final value of the statistic.
    pub fn determine(direction: Direction, line: Decimal, actual: Decimal) -> Self {
        if actual == line {
            return Self::Push;
        }
        let cleared = match direction {
            Direction::Over => actual > line,
            Direction::Under => actual < line,
        };
        if cleared {
            Self::Won
        } else {
            Self::Lost
        }
    }
}

//--------------------------------------------------------------------------------------------------
//  STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                       |
// |---------------|---------------------------------------------------|
// | Order         | A limit order resting on, or crossing, the book.  |
// | Trade         | An immutable execution record.                    |
// | Position      | The single contract a user holds on an instrument.|
//--------------------------------------------------------------------------------------------------

/// Represents a limit order on one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique identifier for the order.
    pub id: Uuid,
    /// Instrument the order trades.
    pub instrument_id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    pub side: Side,
    /// Limit price, bounded by `[0, payout]`.
    pub limit_price: Decimal,
    /// Original quantity.
    pub quantity: u32,
    /// Quantity still open.
    pub remaining: u32,
    pub status: OrderStatus,
    pub source: OrderSource,
    /// Ask that creates fresh contracts rather than re-selling an owned one.
    pub issuance: bool,
    /// Sequence number assigned on acceptance, used for time priority.
    pub sequence_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates an open order that has not been sequenced yet.
    pub fn new(
        instrument_id: Uuid,
        user_id: Uuid,
        side: Side,
        limit_price: Decimal,
        quantity: u32,
        source: OrderSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            instrument_id,
            user_id,
            side,
            limit_price,
            quantity,
            remaining: quantity,
            status: OrderStatus::Open,
            source,
            issuance: false,
            sequence_id: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn filled_quantity(&self) -> u32 {
        self.quantity - self.remaining
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Applies an execution of `qty` and moves the status accordingly.
    pub fn fill(&mut self, qty: u32) {
        self.remaining = self.remaining.saturating_sub(qty);
        self.status = if self.remaining == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = Utc::now();
    }

    /// Moves an active order to a terminal, non-filled status.
    pub fn close(&mut self, status: OrderStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Represents a completed execution between a buyer and a seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub instrument_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    /// Bid that bought; `None` when the house issued directly.
    pub buy_order_id: Option<Uuid>,
    /// Ask that sold; `None` when the house redeemed directly.
    pub sell_order_id: Option<Uuid>,
    pub price: Decimal,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// Cash that moved from buyer to seller.
    #[inline]
    pub fn notional(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// The contract a user holds on one instrument. Quantity is always 0 or 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub user_id: Uuid,
    pub instrument_id: Uuid,
    pub quantity: u32,
    pub average_entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Cost the holder paid for the contracts currently held.
    #[inline]
    pub fn cost_basis(&self) -> Decimal {
        self.average_entry_price * Decimal::from(self.quantity)
    }
}

//--------------------------------------------------------------------------------------------------
//  Potential Errors
//--------------------------------------------------------------------------------------------------
/// Errors raised while parsing external values into these types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid side specified: {0}")]
    InvalidSide(String),
}

//--------------------------------------------------------------------------------------------------
//  TESTS
//--------------------------------------------------------------------------------------------------
// | Name                          | Description                                      |
// |-------------------------------|--------------------------------------------------|
// | test_side_parsing             | Accepts bid/ask aliases, rejects garbage.        |
// | test_order_fill_transitions   | Status follows remaining quantity.               |
// | test_settlement_determination | OVER/UNDER/PUSH rule.                            |
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parsing() {
        assert_eq!("bid".parse::<Side>(), Ok(Side::Bid));
        assert_eq!(" BUY ".parse::<Side>(), Ok(Side::Bid));
        assert_eq!("ask".parse::<Side>(), Ok(Side::Ask));
        assert_eq!("Sell".parse::<Side>(), Ok(Side::Ask));
        assert_eq!(
            "short".parse::<Side>(),
            Err(TypeError::InvalidSide("short".to_string()))
        );
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::Ask.to_string(), "ask");
    }

    #[test]
    fn test_order_fill_transitions() {
        let mut order = Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Side::Ask,
            dec!(50),
            3,
            OrderSource::LimitOrder,
        );
        assert_eq!(order.status, OrderStatus::Open);

        order.fill(1);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining, 2);
        assert_eq!(order.filled_quantity(), 1);
        assert!(order.is_active());

        order.fill(2);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.remaining, 0);
        assert!(!order.is_active());
    }

    #[test]
    fn test_settlement_determination() {
        assert_eq!(
            Settlement::determine(Direction::Over, dec!(1.5), dec!(2)),
            Settlement::Won
        );
        assert_eq!(
            Settlement::determine(Direction::Over, dec!(1.5), dec!(1)),
            Settlement::Lost
        );
        assert_eq!(
            Settlement::determine(Direction::Under, dec!(1.5), dec!(1)),
            Settlement::Won
        );
        assert_eq!(
            Settlement::determine(Direction::Under, dec!(2), dec!(2)),
            Settlement::Push
        );
    }

    #[test]
    fn test_trade_notional() {
        let trade = Trade {
            id: Uuid::new_v4(),
            instrument_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: HOUSE_ACCOUNT,
            buy_order_id: None,
            sell_order_id: None,
            price: dec!(55),
            quantity: 2,
            created_at: Utc::now(),
        };
        assert_eq!(trade.notional(), dec!(110));
    }
}
