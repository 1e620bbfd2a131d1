//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements a limit order book for a single prop instrument.
// It maintains bid and ask orders in price-time priority (FIFO) order.
//
// | Component     | Description                                                               |
// |---------------|---------------------------------------------------------------------------|
// | OrderBook     | Main order book structure managing bids and asks                          |
// | PriceLevel    | Groups orders at the same price level                                     |
// | FIFO Queue    | Orders within each price level are processed first-in-first-out           |
//
//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                        | Key Methods              |
// |---------------|----------------------------------------------------|--------------------------|
// | PriceLevel    | Maintains orders at a specific price               | peek_next_order          |
// |               |                                                    | order_count              |
// |---------------|----------------------------------------------------|--------------------------|
// | OrderBook     | Main order book implementation                     | add_order                |
// |               |                                                    | remove_order             |
// |               |                                                    | fill_best                |
// |               |                                                    | depth                    |
//--------------------------------------------------------------------------------------------------
// TESTS
//--------------------------------------------------------------------------------------------------
// | Name                         | Description                                             |
// |------------------------------|---------------------------------------------------------|
// | test_empty_orderbook         | New book has no best prices                             |
// | test_price_levels            | Best bid is highest, best ask is lowest                 |
// | test_fifo_within_level       | Earlier orders are served first at equal price          |
// | test_remove_order            | Removal updates volume and best prices                  |
// | test_fill_best               | Partial and full fills of the top order                 |
// | test_drain_where             | Selective removal of resting orders                     |
//--------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, HashMap, VecDeque};

use rust_decimal::Decimal;
use uuid::Uuid;

use super::depth::{DepthLevel, DepthSnapshot};
use super::OrderbookError;
use crate::domain::models::types::{Order, Side};

/// Represents a price level in the order book, maintaining a FIFO queue of orders
/// at the same price point.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    /// The price for this level
    pub price: Decimal,
    /// FIFO queue of orders at this price level
    pub orders: VecDeque<Order>,
    /// Total remaining quantity of all orders at this price level
    pub total_volume: u64,
}

impl PriceLevel {
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            orders: VecDeque::with_capacity(4),
            total_volume: 0,
        }
    }

    /// Returns the next order to be matched without removing it from the queue.
    #[inline]
    pub fn peek_next_order(&self) -> Option<&Order> {
        self.orders.front()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

/// The main order book structure that maintains bid and ask orders in price-time priority.
/// Uses BTreeMap for price level organization and VecDeque for FIFO ordering within price levels.
#[derive(Debug)]
pub struct OrderBook {
    /// Bid side orders organized by price (best is the last key)
    bids: BTreeMap<Decimal, PriceLevel>,
    /// Ask side orders organized by price (best is the first key)
    asks: BTreeMap<Decimal, PriceLevel>,
    /// Cache of best bid price for O(1) access
    best_bid: Option<Decimal>,
    /// Cache of best ask price for O(1) access
    best_ask: Option<Decimal>,
    /// Identifier for the instrument this order book manages
    instrument_id: Uuid,
    /// O(1) lookup for resting orders by ID
    order_map: HashMap<Uuid, (Side, Decimal)>,
}

impl OrderBook {
    pub fn new(instrument_id: Uuid) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            best_bid: None,
            best_ask: None,
            instrument_id,
            order_map: HashMap::new(),
        }
    }

    /// Gets a resting order by its ID.
    pub fn get_order_by_id(&self, order_id: &Uuid) -> Option<&Order> {
        self.order_map.get(order_id).and_then(|(side, price)| {
            self.levels(*side)
                .get(price)
                .and_then(|level| level.orders.iter().find(|order| order.id == *order_id))
        })
    }

    /// Adds an order to the back of the queue at its price level.
    ///
    /// # Errors
    /// - `WrongInstrument` for orders of another instrument
    /// - `InvalidQuantity` for orders with nothing left to trade
    /// - `DuplicateOrder` if the ID is already resting
    pub fn add_order(&mut self, order: Order) -> Result<(), OrderbookError> {
        if order.instrument_id != self.instrument_id {
            return Err(OrderbookError::WrongInstrument {
                expected: self.instrument_id,
                got: order.instrument_id,
            });
        }
        if order.remaining == 0 {
            return Err(OrderbookError::InvalidQuantity(order.remaining));
        }
        if self.order_map.contains_key(&order.id) {
            return Err(OrderbookError::DuplicateOrder(order.id));
        }

        let price = order.limit_price;
        let side = order.side;
        self.order_map.insert(order.id, (side, price));

        let price_level = self
            .levels_mut(side)
            .entry(price)
            .or_insert_with(|| PriceLevel::new(price));
        price_level.total_volume = price_level.total_volume.saturating_add(order.remaining as u64);
        price_level.orders.push_back(order);

        match side {
            Side::Bid if self.best_bid.map_or(true, |p| price > p) => self.best_bid = Some(price),
            Side::Ask if self.best_ask.map_or(true, |p| price < p) => self.best_ask = Some(price),
            _ => {}
        }

        Ok(())
    }

    /// Removes a resting order from the book and returns it unchanged.
    pub fn remove_order(&mut self, order_id: Uuid) -> Result<Order, OrderbookError> {
        let (side, price) = self
            .order_map
            .remove(&order_id)
            .ok_or(OrderbookError::OrderNotFound(order_id))?;

        let price_levels = self.levels_mut(side);
        let price_level = price_levels
            .get_mut(&price)
            .ok_or(OrderbookError::OrderNotFound(order_id))?;

        let order_idx = price_level
            .orders
            .iter()
            .position(|o| o.id == order_id)
            .ok_or(OrderbookError::OrderNotFound(order_id))?;

        let order = price_level
            .orders
            .remove(order_idx)
            .ok_or(OrderbookError::OrderNotFound(order_id))?;

        price_level.total_volume = price_level.total_volume.saturating_sub(order.remaining as u64);

        if price_level.orders.is_empty() {
            price_levels.remove(&price);
            self.refresh_best(side, price);
        }

        Ok(order)
    }

    /// Executes `qty` against the top order of `side`.
    ///
    /// Returns the order as it stands after the fill. A filled order has already left the book.
    pub fn fill_best(&mut self, side: Side, qty: u32) -> Result<Order, OrderbookError> {
        let price = match side {
            Side::Bid => self.best_bid,
            Side::Ask => self.best_ask,
        }
        .ok_or(OrderbookError::InvalidQuantity(qty))?;

        let price_levels = self.levels_mut(side);
        let level = price_levels
            .get_mut(&price)
            .ok_or(OrderbookError::InvalidQuantity(qty))?;
        let front = level
            .orders
            .front_mut()
            .ok_or(OrderbookError::InvalidQuantity(qty))?;
        if qty == 0 || qty > front.remaining {
            return Err(OrderbookError::InvalidQuantity(qty));
        }

        front.fill(qty);
        level.total_volume = level.total_volume.saturating_sub(qty as u64);
        let snapshot = front.clone();

        if snapshot.remaining == 0 {
            level.orders.pop_front();
            let now_empty = level.orders.is_empty();
            if now_empty {
                price_levels.remove(&price);
            }
            self.order_map.remove(&snapshot.id);
            if now_empty {
                self.refresh_best(side, price);
            }
        }

        Ok(snapshot)
    }

    /// Removes and returns every resting order on `side` matching `predicate`, in priority order.
    pub fn drain_where<F>(&mut self, side: Side, predicate: F) -> Vec<Order>
    where
        F: Fn(&Order) -> bool,
    {
        let ids: Vec<Uuid> = self
            .iter_side(side)
            .filter(|order| predicate(order))
            .map(|order| order.id)
            .collect();

        ids.into_iter()
            .filter_map(|id| self.remove_order(id).ok())
            .collect()
    }

    /// Recomputes a cached best price after the level at `emptied` disappeared.
    #[inline]
    fn refresh_best(&mut self, side: Side, emptied: Decimal) {
        match side {
            Side::Bid if Some(emptied) == self.best_bid => {
                self.best_bid = self.bids.keys().next_back().copied();
            }
            Side::Ask if Some(emptied) == self.best_ask => {
                self.best_ask = self.asks.keys().next().copied();
            }
            _ => {}
        }
    }

    #[inline]
    fn levels(&self, side: Side) -> &BTreeMap<Decimal, PriceLevel> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    #[inline]
    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    /// Price levels of `side` from best to worst.
    pub fn iter_levels(&self, side: Side) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        match side {
            Side::Bid => Box::new(self.bids.values().rev()),
            Side::Ask => Box::new(self.asks.values()),
        }
    }

    /// Resting orders of `side` in price-time priority.
    pub fn iter_side(&self, side: Side) -> impl Iterator<Item = &Order> + '_ {
        self.iter_levels(side).flat_map(|level| level.orders.iter())
    }

    /// Gets the next order to be matched on `side` without removing it.
    #[inline]
    pub fn peek_best_order(&self, side: Side) -> Option<&Order> {
        let best_price = match side {
            Side::Bid => self.best_bid,
            Side::Ask => self.best_ask,
        };
        best_price.and_then(|price| {
            self.levels(side)
                .get(&price)
                .and_then(|level| level.peek_next_order())
        })
    }

    #[inline]
    pub fn get_best_bid(&self) -> Option<&Order> {
        self.peek_best_order(Side::Bid)
    }

    #[inline]
    pub fn get_best_ask(&self) -> Option<&Order> {
        self.peek_best_order(Side::Ask)
    }

    #[inline]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.best_bid
    }

    #[inline]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.best_ask
    }

    /// Returns the spread between the best bid and ask prices.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_ask, self.best_bid) {
            (Some(ask), Some(bid)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Best bid at or above best ask.
    #[inline]
    pub fn is_crossed(&self) -> bool {
        matches!((self.best_bid, self.best_ask), (Some(bid), Some(ask)) if bid >= ask)
    }

    pub fn volume_at_price(&self, side: Side, price: Decimal) -> Option<u64> {
        self.levels(side).get(&price).map(|level| level.total_volume)
    }

    pub fn order_count_at_price(&self, side: Side, price: Decimal) -> usize {
        self.levels(side)
            .get(&price)
            .map_or(0, |level| level.order_count())
    }

    /// Total remaining quantity resting on `side`.
    pub fn side_volume(&self, side: Side) -> u64 {
        self.levels(side).values().map(|level| level.total_volume).sum()
    }

    pub fn len(&self) -> usize {
        self.order_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order_map.is_empty()
    }

    pub fn instrument_id(&self) -> Uuid {
        self.instrument_id
    }

    /// Aggregated ladder of up to `levels` price levels per side. Never mutates the book.
    pub fn depth(&self, levels: usize) -> DepthSnapshot {
        let ladder = |side: Side| -> Vec<DepthLevel> {
            self.iter_levels(side)
                .filter(|level| !level.is_empty())
                .take(levels)
                .map(|level| {
                    DepthLevel::new(level.price, level.total_volume, level.order_count() as u32)
                })
                .collect()
        };
        DepthSnapshot::new(ladder(Side::Bid), ladder(Side::Ask), self.instrument_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::types::{OrderSource, OrderStatus};
    use rust_decimal_macros::dec;

    /// Creates a test order with the specified parameters.
    fn create_test_order(side: Side, price: Decimal, quantity: u32, instrument_id: Uuid) -> Order {
        Order::new(
            instrument_id,
            Uuid::new_v4(),
            side,
            price,
            quantity,
            OrderSource::LimitOrder,
        )
    }

    #[test]
    fn test_empty_orderbook() {
        let book = OrderBook::new(Uuid::new_v4());

        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.spread(), None);
        assert!(!book.is_crossed());
        assert!(book.is_empty());
        assert_eq!(book.volume_at_price(Side::Bid, dec!(50)), None);
    }

    #[test]
    fn test_price_levels() {
        let instrument_id = Uuid::new_v4();
        let mut book = OrderBook::new(instrument_id);

        for price in [dec!(50), dec!(48), dec!(52)] {
            book.add_order(create_test_order(Side::Bid, price, 1, instrument_id))
                .unwrap();
        }
        for price in [dec!(60), dec!(58), dec!(61)] {
            book.add_order(create_test_order(Side::Ask, price, 1, instrument_id))
                .unwrap();
        }

        assert_eq!(book.best_bid(), Some(dec!(52)));
        assert_eq!(book.best_ask(), Some(dec!(58)));
        assert_eq!(book.spread(), Some(dec!(6)));
        assert_eq!(book.len(), 6);
    }

    #[test]
    fn test_fifo_within_level() {
        let instrument_id = Uuid::new_v4();
        let mut book = OrderBook::new(instrument_id);

        let first = create_test_order(Side::Ask, dec!(55), 1, instrument_id);
        let second = create_test_order(Side::Ask, dec!(55), 2, instrument_id);
        book.add_order(first.clone()).unwrap();
        book.add_order(second.clone()).unwrap();

        assert_eq!(book.get_best_ask().map(|o| o.id), Some(first.id));
        assert_eq!(book.volume_at_price(Side::Ask, dec!(55)), Some(3));
        assert_eq!(book.order_count_at_price(Side::Ask, dec!(55)), 2);

        let ids: Vec<Uuid> = book.iter_side(Side::Ask).map(|o| o.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn test_remove_order() {
        let instrument_id = Uuid::new_v4();
        let mut book = OrderBook::new(instrument_id);

        let best = create_test_order(Side::Bid, dec!(55), 1, instrument_id);
        let other = create_test_order(Side::Bid, dec!(50), 1, instrument_id);
        book.add_order(best.clone()).unwrap();
        book.add_order(other.clone()).unwrap();

        let removed = book.remove_order(best.id).unwrap();
        assert_eq!(removed.id, best.id);
        assert_eq!(book.best_bid(), Some(dec!(50)));
        assert_eq!(book.volume_at_price(Side::Bid, dec!(55)), None);

        assert_eq!(
            book.remove_order(best.id),
            Err(OrderbookError::OrderNotFound(best.id))
        );
    }

    #[test]
    fn test_fill_best() {
        let instrument_id = Uuid::new_v4();
        let mut book = OrderBook::new(instrument_id);

        let ask = create_test_order(Side::Ask, dec!(40), 3, instrument_id);
        book.add_order(ask.clone()).unwrap();

        let partial = book.fill_best(Side::Ask, 2).unwrap();
        assert_eq!(partial.status, OrderStatus::PartiallyFilled);
        assert_eq!(partial.remaining, 1);
        assert_eq!(book.volume_at_price(Side::Ask, dec!(40)), Some(1));

        let filled = book.fill_best(Side::Ask, 1).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert!(book.is_empty());
        assert_eq!(book.best_ask(), None);

        assert!(book.fill_best(Side::Ask, 1).is_err());
    }

    #[test]
    fn test_rejects_foreign_and_duplicate_orders() {
        let instrument_id = Uuid::new_v4();
        let mut book = OrderBook::new(instrument_id);

        let foreign = create_test_order(Side::Bid, dec!(50), 1, Uuid::new_v4());
        assert!(matches!(
            book.add_order(foreign),
            Err(OrderbookError::WrongInstrument { .. })
        ));

        let order = create_test_order(Side::Bid, dec!(50), 1, instrument_id);
        book.add_order(order.clone()).unwrap();
        assert_eq!(
            book.add_order(order.clone()),
            Err(OrderbookError::DuplicateOrder(order.id))
        );
    }

    #[test]
    fn test_drain_where() {
        let instrument_id = Uuid::new_v4();
        let mut book = OrderBook::new(instrument_id);

        let mut issuance = create_test_order(Side::Ask, dec!(45), 1, instrument_id);
        issuance.issuance = true;
        let resale = create_test_order(Side::Ask, dec!(47), 1, instrument_id);
        book.add_order(issuance.clone()).unwrap();
        book.add_order(resale.clone()).unwrap();

        let drained = book.drain_where(Side::Ask, |order| order.issuance);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, issuance.id);
        assert_eq!(book.best_ask(), Some(dec!(47)));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_depth_is_limited_and_ordered() {
        let instrument_id = Uuid::new_v4();
        let mut book = OrderBook::new(instrument_id);

        for price in [dec!(40), dec!(41), dec!(42)] {
            book.add_order(create_test_order(Side::Bid, price, 1, instrument_id))
                .unwrap();
        }
        book.add_order(create_test_order(Side::Ask, dec!(60), 2, instrument_id))
            .unwrap();

        let depth = book.depth(2);
        assert_eq!(depth.bids.len(), 2);
        assert_eq!(depth.bids[0].price, dec!(42));
        assert_eq!(depth.bids[1].price, dec!(41));
        assert_eq!(depth.asks[0].volume, 2);
        assert_eq!(book.len(), 4);
    }
}
