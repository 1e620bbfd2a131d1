//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the crossing loop that turns a crossed book into trades.
// Orders are matched in price-time priority and every execution prices at the resting order.
//
// | Component       | Description                                                       |
// |-----------------|-------------------------------------------------------------------|
// | MatchingEngine  | Owns one instrument's book and its acceptance sequence            |
// | Fill            | A proposed execution handed to the settlement hook                |
// | FillDecision    | The hook's verdict: settle, drop a resting order, or stop         |
// | MatchResult     | Trades, touched orders and canceled bids of one matching pass     |
//
//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name            | Description                                 | Key Methods                |
// |-----------------|---------------------------------------------|----------------------------|
// | MatchingEngine  | Core matching engine                        | submit                     |
// |                 |                                             | match_crossed              |
// |                 |                                             | cancel_order               |
// |                 |                                             | expire_where               |
//--------------------------------------------------------------------------------------------------
// TESTS
//--------------------------------------------------------------------------------------------------
// | Name                                 | Description                                       |
// |--------------------------------------|---------------------------------------------------|
// | test_resting_order_sets_price        | Incoming order gets the resting order's price     |
// | test_partial_fill_across_levels      | Sweeps levels best first, leaves book uncrossed   |
// | test_fifo_at_equal_price             | Earliest order at a level trades first            |
// | test_rejected_bid_is_canceled        | Hook rejection cancels the bid, matching goes on  |
// | test_rejected_ask_and_abort          | Dropped ask, then abort leaves the book intact   |
// | test_cancel_and_expire               | Terminal statuses and book removal                |
//--------------------------------------------------------------------------------------------------

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{MatchingError, MatchingResult};
use crate::domain::models::types::{Order, OrderStatus, Side, Trade};
use crate::domain::services::orderbook::orderbook::OrderBook;

/// A proposed execution between the top bid and the top ask.
#[derive(Debug, Clone)]
pub struct Fill {
    /// The bid as it stood before this execution.
    pub bid: Order,
    /// The ask as it stood before this execution.
    pub ask: Order,
    /// The resting order's limit price.
    pub price: Decimal,
    pub quantity: u32,
}

impl Fill {
    #[inline]
    pub fn notional(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// What the settlement hook decided about a proposed fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillDecision {
    /// Cash and positions moved; record the trade.
    Settled,
    /// The resting bidder can no longer pay; cancel the bid and keep matching.
    RejectBid,
    /// The resting seller cannot receive the proceeds; cancel the ask and keep matching.
    RejectAsk,
    /// The incoming order cannot settle; stop without touching either order.
    Abort,
}

/// Represents the outcome of a matching operation.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Trades generated from the matching process, in execution order
    pub trades: Vec<Trade>,

    /// Final state of every order touched by a trade (filled or partially filled)
    pub affected_orders: Vec<Order>,

    /// Resting orders dropped because their owner's account could not settle
    pub canceled_orders: Vec<Order>,

    /// Matching stopped on `FillDecision::Abort` while the book was still crossed
    pub aborted: bool,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty() && self.canceled_orders.is_empty()
    }

    /// Total quantity executed in this pass.
    pub fn executed_quantity(&self) -> u32 {
        self.trades.iter().map(|trade| trade.quantity).sum()
    }

    fn record_affected(&mut self, order: Order) {
        match self.affected_orders.iter_mut().find(|o| o.id == order.id) {
            Some(existing) => *existing = order,
            None => self.affected_orders.push(order),
        }
    }
}

/// The matching engine for one instrument.
///
/// # Price-Time Priority
///
/// * Better prices are matched first (higher bids, lower asks)
/// * At the same price level, orders are matched in acceptance order (FIFO)
///
/// # Execution Price
///
/// The order accepted earlier (lower sequence ID) is the resting one and sets the price, so the
/// crossing order always receives any price improvement.
#[derive(Debug)]
pub struct MatchingEngine {
    /// The order book for the instrument this engine is managing
    order_book: OrderBook,

    /// Sequence counter for assigning order priorities
    next_sequence_id: u64,

    /// Instrument ID this engine is managing
    instrument_id: Uuid,
}

impl MatchingEngine {
    #[inline]
    pub fn new(instrument_id: Uuid) -> Self {
        Self {
            order_book: OrderBook::new(instrument_id),
            next_sequence_id: 1,
            instrument_id,
        }
    }

    #[inline]
    pub fn instrument_id(&self) -> Uuid {
        self.instrument_id
    }

    #[inline]
    pub fn order_book(&self) -> &OrderBook {
        &self.order_book
    }

    /// Sequences an order and rests it on the book. Matching is a separate step.
    ///
    /// # Arguments
    ///
    /// * `order` - An open order for this instrument
    ///
    /// # Returns
    ///
    /// The order as accepted, carrying its sequence ID
    pub fn submit(&mut self, mut order: Order) -> MatchingResult<Order> {
        order.sequence_id = self.next_sequence_id;
        self.order_book.add_order(order.clone())?;
        self.next_sequence_id += 1;

        debug!(
            order_id = %order.id,
            side = %order.side,
            price = %order.limit_price,
            sequence_id = order.sequence_id,
            "order rested"
        );
        Ok(order)
    }

    /// Runs the crossing loop until the book is no longer crossed.
    ///
    /// `settle` is called once per proposed fill before anything in the book changes. Every
    /// iteration executes quantity, removes an order or stops, so the loop terminates.
    pub fn match_crossed<F>(&mut self, mut settle: F) -> MatchingResult<MatchResult>
    where
        F: FnMut(&Fill) -> FillDecision,
    {
        let mut result = MatchResult::default();

        while self.order_book.is_crossed() {
            let (bid, ask) = match (self.order_book.get_best_bid(), self.order_book.get_best_ask())
            {
                (Some(bid), Some(ask)) => (bid.clone(), ask.clone()),
                _ => break,
            };

            let price = if bid.sequence_id < ask.sequence_id {
                bid.limit_price
            } else {
                ask.limit_price
            };
            let fill = Fill {
                quantity: bid.remaining.min(ask.remaining),
                price,
                bid,
                ask,
            };

            match settle(&fill) {
                FillDecision::Settled => {
                    let bid_after = self.order_book.fill_best(Side::Bid, fill.quantity)?;
                    let ask_after = self.order_book.fill_best(Side::Ask, fill.quantity)?;

                    let trade = Trade {
                        id: Uuid::new_v4(),
                        instrument_id: self.instrument_id,
                        buyer_id: fill.bid.user_id,
                        seller_id: fill.ask.user_id,
                        buy_order_id: Some(fill.bid.id),
                        sell_order_id: Some(fill.ask.id),
                        price: fill.price,
                        quantity: fill.quantity,
                        created_at: Utc::now(),
                    };
                    debug!(
                        trade_id = %trade.id,
                        price = %trade.price,
                        quantity = trade.quantity,
                        "orders crossed"
                    );

                    result.record_affected(bid_after);
                    result.record_affected(ask_after);
                    result.trades.push(trade);
                }
                FillDecision::RejectBid => {
                    warn!(
                        order_id = %fill.bid.id,
                        user_id = %fill.bid.user_id,
                        "dropping bid whose owner can no longer pay"
                    );
                    let mut dropped = self.order_book.remove_order(fill.bid.id)?;
                    dropped.close(OrderStatus::Canceled);
                    result.canceled_orders.push(dropped);
                }
                FillDecision::RejectAsk => {
                    warn!(
                        order_id = %fill.ask.id,
                        user_id = %fill.ask.user_id,
                        "dropping ask whose owner cannot be credited"
                    );
                    let mut dropped = self.order_book.remove_order(fill.ask.id)?;
                    dropped.close(OrderStatus::Canceled);
                    result.canceled_orders.push(dropped);
                }
                FillDecision::Abort => {
                    debug!(
                        bid_id = %fill.bid.id,
                        ask_id = %fill.ask.id,
                        "matching aborted by settlement"
                    );
                    result.aborted = true;
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Removes a resting order and marks it canceled.
    pub fn cancel_order(&mut self, order_id: Uuid) -> MatchingResult<Order> {
        let mut order = self
            .order_book
            .remove_order(order_id)
            .map_err(|_| MatchingError::OrderNotFound(order_id))?;
        order.close(OrderStatus::Canceled);
        Ok(order)
    }

    /// Expires every resting order on `side` matching `predicate`.
    pub fn expire_where<F>(&mut self, side: Side, predicate: F) -> Vec<Order>
    where
        F: Fn(&Order) -> bool,
    {
        let mut expired = self.order_book.drain_where(side, predicate);
        for order in &mut expired {
            order.close(OrderStatus::Expired);
        }
        expired
    }

    /// Expires everything on the book, bids first.
    pub fn expire_all(&mut self) -> Vec<Order> {
        let mut expired = self.expire_where(Side::Bid, |_| true);
        expired.extend(self.expire_where(Side::Ask, |_| true));
        expired
    }
}
