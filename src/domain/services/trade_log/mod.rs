//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Append-only record of executions on one instrument, plus summary statistics over it.
//
// | Name        | Description                                                    |
// |-------------|----------------------------------------------------------------|
// | TradeLog    | append is the only mutation; recent reads newest first         |
// | TradeStats  | Count and volume overall, last price and change over a window  |
//--------------------------------------------------------------------------------------------------

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::types::Trade;

/// Statistics over an instrument's trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub trade_count: usize,
    /// Contracts traded over the instrument's lifetime
    pub total_volume: u64,
    /// Contracts traded within the window
    pub window_volume: u64,
    pub last_price: Option<Decimal>,
    /// Last price minus the oldest price within the window
    pub price_change: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct TradeLog {
    instrument_id: Uuid,
    trades: Vec<Trade>,
}

impl TradeLog {
    pub fn new(instrument_id: Uuid) -> Self {
        Self {
            instrument_id,
            trades: Vec::new(),
        }
    }

    pub fn instrument_id(&self) -> Uuid {
        self.instrument_id
    }

    pub fn append(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    /// Up to `limit` trades, most recent first.
    pub fn recent(&self, limit: usize) -> Vec<Trade> {
        self.trades.iter().rev().take(limit).cloned().collect()
    }

    pub fn last(&self) -> Option<&Trade> {
        self.trades.last()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn stats(&self, window: usize) -> TradeStats {
        let start = self.trades.len().saturating_sub(window);
        let windowed = &self.trades[start..];

        let last_price = windowed.last().map(|trade| trade.price);
        let price_change = match (windowed.first(), windowed.last()) {
            (Some(first), Some(last)) => Some(last.price - first.price),
            _ => None,
        };

        TradeStats {
            trade_count: self.trades.len(),
            total_volume: self.trades.iter().map(|t| t.quantity as u64).sum(),
            window_volume: windowed.iter().map(|t| t.quantity as u64).sum(),
            last_price,
            price_change,
        }
    }
}
