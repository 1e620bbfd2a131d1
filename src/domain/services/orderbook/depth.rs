//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Aggregated, read-only views of an order book.
//
// | Component       | Description                                                |
// |-----------------|------------------------------------------------------------|
// | DepthLevel      | Aggregated volume information at a specific price          |
// | DepthSnapshot   | Immutable point-in-time view of order book depth           |
//
// Snapshots are built by `OrderBook::depth` from its own price levels.
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents an aggregated price level in the depth view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Decimal,
    /// Total remaining quantity at this price level
    pub volume: u64,
    pub order_count: u32,
}

impl DepthLevel {
    #[inline]
    pub fn new(price: Decimal, volume: u64, order_count: u32) -> Self {
        Self {
            price,
            volume,
            order_count,
        }
    }
}

/// An immutable snapshot of order book depth at a specific point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// Bid price levels ordered by price descending (best bids first)
    pub bids: Vec<DepthLevel>,
    /// Ask price levels ordered by price ascending (best asks first)
    pub asks: Vec<DepthLevel>,
    pub timestamp: DateTime<Utc>,
    pub instrument_id: Uuid,
}

impl DepthSnapshot {
    #[inline]
    pub fn new(bids: Vec<DepthLevel>, asks: Vec<DepthLevel>, instrument_id: Uuid) -> Self {
        Self {
            bids,
            asks,
            timestamp: Utc::now(),
            instrument_id,
        }
    }

    #[inline]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|level| level.price)
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|level| level.price)
    }

    /// Returns the current spread (best ask - best bid)
    #[inline]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_ask(), self.best_bid()) {
            (Some(ask), Some(bid)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
