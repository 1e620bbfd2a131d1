//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Everything that belongs to one instrument, mutated only while its lock is held.
//
// | Component        | Description                                                          |
// |------------------|----------------------------------------------------------------------|
// | Market           | Instrument, matching engine, positions, trade log and order history  |
// | MarketContext    | Balance seam and pricing rules shared by every market                |
// | *Outcome         | Results of the mutating operations                                   |
// | MarketSummary    | Quote, capacity and trade statistics for display                     |
//
// Every mutating operation validates first and mutates second. Committed changes are reported as
// `ExchangeEvent`s pushed onto the caller's buffer, which is published before the lock is
// released.
//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                    | Description                                                     |
// |-------------------------|-----------------------------------------------------------------|
// | place_order             | Validate, reserve issuance, rest and match a limit order        |
// | cancel_order            | Idempotent cancel, releasing issuance reservations              |
// | buy_contract            | Take the best ask, else house issuance before the event         |
// | sell_contract           | Hit the best bid, else house redemption or a resting ask        |
// | cash_out                | Settle a position once the instrument is FINAL                  |
// | transition              | Lifecycle edge plus its effect on resting orders                |
// | expire_all_orders       | End-of-life expiry of every resting order                       |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ExchangeError, ExchangeResult};
use crate::domain::models::instrument::{Instrument, LifecycleState};
use crate::domain::models::types::{
    Order, OrderSource, OrderStatus, Position, Settlement, Side, Trade, HOUSE_ACCOUNT,
};
use crate::domain::services::events::ExchangeEvent;
use crate::domain::services::ledger::{BalanceProvider, LedgerError, PositionLedger};
use crate::domain::services::lifecycle::{self, TradingAvailability};
use crate::domain::services::matching_engine::{FillDecision, MatchResult, MatchingEngine};
use crate::domain::services::orderbook::depth::DepthSnapshot;
use crate::domain::services::pricing::PricingModel;
use crate::domain::services::trade_log::{TradeLog, TradeStats};

/// Collaborators a market needs while its lock is held.
#[derive(Clone, Copy)]
pub struct MarketContext<'a> {
    pub balances: &'a dyn BalanceProvider,
    pub pricing: &'a PricingModel,
    /// Levels per side in the snapshot returned with a placed order
    pub book_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderOutcome {
    /// The order after matching
    pub order: Order,
    pub trades: Vec<Trade>,
    pub book: DepthSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub order: Order,
    /// False when the order was already terminal
    pub canceled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantTradeOutcome {
    pub trade: Option<Trade>,
    /// Ask left on the book when a LIVE sale found no buyer
    pub resting_order: Option<Order>,
    pub new_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashOutOutcome {
    pub position: Position,
    pub settlement: Settlement,
    pub payout: Decimal,
    pub new_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub instrument_id: Uuid,
    pub state: LifecycleState,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub current_price: Decimal,
    pub mid_price: Decimal,
    pub probability: Decimal,
    pub available_capacity: u32,
    pub trade_stats: TradeStats,
}

/// One instrument and all of its trading state.
#[derive(Debug)]
pub struct Market {
    instrument: Instrument,
    engine: MatchingEngine,
    ledger: PositionLedger,
    trade_log: TradeLog,
    /// Every order accepted on this instrument, terminal ones included. Kept for lookups
    /// until the instrument is archived.
    orders: HashMap<Uuid, Order>,
    /// user -> their single active order
    open_orders: HashMap<Uuid, Uuid>,
}

impl Market {
    pub fn new(instrument: Instrument) -> Self {
        let id = instrument.id;
        Self {
            instrument,
            engine: MatchingEngine::new(id),
            ledger: PositionLedger::new(id),
            trade_log: TradeLog::new(id),
            orders: HashMap::new(),
            open_orders: HashMap::new(),
        }
    }

    //----------------------------------------------------------------------------------------------
    // Queries
    //----------------------------------------------------------------------------------------------

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn id(&self) -> Uuid {
        self.instrument.id
    }

    pub fn state(&self) -> LifecycleState {
        self.instrument.state
    }

    pub fn get_order(&self, order_id: &Uuid) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn orders_for(&self, user_id: Uuid) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|order| order.sequence_id);
        orders
    }

    pub fn position(&self, user_id: &Uuid) -> Option<&Position> {
        self.ledger.position(user_id)
    }

    pub fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        self.trade_log.recent(limit)
    }

    pub fn depth(&self, levels: usize) -> DepthSnapshot {
        self.engine.order_book().depth(levels)
    }

    /// Some holder is offering a previously issued contract.
    pub fn has_reentrant_inventory(&self) -> bool {
        self.engine
            .order_book()
            .iter_side(Side::Ask)
            .any(|order| !order.issuance)
    }

    pub fn trading_availability(&self) -> TradingAvailability {
        lifecycle::trading_availability(self.state(), self.has_reentrant_inventory())
    }

    pub fn current_price(&self, pricing: &PricingModel) -> Decimal {
        pricing.current_price(&self.instrument, self.engine.order_book())
    }

    pub fn mid_price(&self, pricing: &PricingModel) -> Decimal {
        pricing.mid_price(&self.instrument, self.engine.order_book())
    }

    pub fn summary(&self, pricing: &PricingModel, stats_window: usize) -> MarketSummary {
        let book = self.engine.order_book();
        MarketSummary {
            instrument_id: self.instrument.id,
            state: self.instrument.state,
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            spread: book.spread(),
            current_price: self.current_price(pricing),
            mid_price: self.mid_price(pricing),
            probability: self.instrument.active_probability(),
            available_capacity: self.instrument.available_capacity(),
            trade_stats: self.trade_log.stats(stats_window),
        }
    }

    //----------------------------------------------------------------------------------------------
    // Limit orders
    //----------------------------------------------------------------------------------------------

    /// Accepts a limit order and matches it.
    ///
    /// # Errors
    /// - `Validation` for a zero quantity, a bid for more than one contract, a price outside
    ///   `[0, payout]` or an ask larger than the seller's position
    /// - `NotTradeable` when the lifecycle forbids the side, or issuance capacity is exhausted
    /// - `DuplicatePosition` when the user already has an open order, or bids while holding
    /// - `InsufficientBalance` when a bidder cannot cover `price x quantity`
    pub fn place_order(
        &mut self,
        user_id: Uuid,
        side: Side,
        price: Decimal,
        quantity: u32,
        ctx: MarketContext<'_>,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<PlaceOrderOutcome> {
        let issuance = self.admit_order(user_id, side, price, quantity, ctx)?;
        let (order, trades) = self.accept_and_match(
            user_id,
            side,
            price,
            quantity,
            OrderSource::LimitOrder,
            issuance,
            ctx,
            events,
        )?;

        Ok(PlaceOrderOutcome {
            order,
            trades,
            book: self.depth(ctx.book_depth),
        })
    }

    /// Checks a prospective order against every rule without touching state.
    ///
    /// Returns whether an ask would be fresh issuance.
    fn admit_order(
        &self,
        user_id: Uuid,
        side: Side,
        price: Decimal,
        quantity: u32,
        ctx: MarketContext<'_>,
    ) -> ExchangeResult<bool> {
        let instrument_id = self.instrument.id;

        if quantity == 0 {
            return Err(ExchangeError::Validation(
                "quantity must be positive".to_string(),
            ));
        }
        if price.is_sign_negative() || price > self.instrument.payout {
            return Err(ExchangeError::Validation(format!(
                "price {} is outside [0, {}]",
                price, self.instrument.payout
            )));
        }
        if self.state() == LifecycleState::Final {
            return Err(ExchangeError::not_tradeable(
                instrument_id,
                "instrument is FINAL; only cash-out is allowed",
            ));
        }
        if self.open_orders.contains_key(&user_id) {
            return Err(ExchangeError::DuplicatePosition {
                user_id,
                instrument_id,
            });
        }

        match side {
            Side::Bid => {
                if quantity != 1 {
                    return Err(ExchangeError::Validation(
                        "a bid may be for exactly one contract".to_string(),
                    ));
                }
                if self.ledger.holds(&user_id) {
                    return Err(ExchangeError::DuplicatePosition {
                        user_id,
                        instrument_id,
                    });
                }
                if !lifecycle::can_buy(self.state(), self.has_reentrant_inventory()) {
                    return Err(ExchangeError::not_tradeable(
                        instrument_id,
                        "no contracts are offered by current holders",
                    ));
                }
                let required = price * Decimal::from(quantity);
                let available = ctx.balances.balance(user_id);
                if available < required {
                    return Err(ExchangeError::InsufficientBalance {
                        user_id,
                        required,
                        available,
                    });
                }
                Ok(false)
            }
            Side::Ask => {
                if !lifecycle::can_sell(self.state()) {
                    return Err(ExchangeError::not_tradeable(
                        instrument_id,
                        "selling is closed",
                    ));
                }
                match self.ledger.position(&user_id) {
                    Some(position) if quantity > position.quantity => {
                        Err(ExchangeError::Validation(format!(
                            "ask for {} contracts exceeds the {} held",
                            quantity, position.quantity
                        )))
                    }
                    Some(_) => Ok(false),
                    None => {
                        if self.state() != LifecycleState::Upcoming {
                            return Err(ExchangeError::not_tradeable(
                                instrument_id,
                                "new contracts can only be issued before the event starts",
                            ));
                        }
                        if self.instrument.available_capacity() < quantity {
                            return Err(ExchangeError::not_tradeable(
                                instrument_id,
                                format!(
                                    "only {} contracts left to issue",
                                    self.instrument.available_capacity()
                                ),
                            ));
                        }
                        Ok(true)
                    }
                }
            }
        }
    }

    /// Rests an admitted order and runs the crossing loop.
    #[allow(clippy::too_many_arguments)]
    fn accept_and_match(
        &mut self,
        user_id: Uuid,
        side: Side,
        price: Decimal,
        quantity: u32,
        source: OrderSource,
        issuance: bool,
        ctx: MarketContext<'_>,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<(Order, Vec<Trade>)> {
        let mut order = Order::new(self.instrument.id, user_id, side, price, quantity, source);
        order.issuance = issuance;

        let order = self.engine.submit(order)?;
        if issuance {
            self.instrument.issued_count += quantity;
        }
        self.record_order(order.clone());
        info!(
            instrument_id = %self.instrument.id,
            order_id = %order.id,
            %user_id,
            side = %side,
            %price,
            quantity,
            issuance,
            "order accepted"
        );
        let accepted_at = events.len();
        events.push(ExchangeEvent::OrderAccepted {
            order: order.clone(),
            timestamp: Utc::now(),
        });

        let (result, failure) = self.run_matching(ctx, events)?;
        if let Some(err) = failure {
            return self.withdraw_incoming(order.id, accepted_at, err, result.trades, ctx, events);
        }
        let order = self.orders.get(&order.id).cloned().unwrap_or(order);
        Ok((order, result.trades))
    }

    /// Matches until the book is uncrossed and commits every fill.
    ///
    /// A resting order whose owner's account cannot settle is canceled and matching goes on.
    /// When the incoming order is the one that cannot settle, matching stops and the ledger
    /// error is handed back with the fills committed so far.
    fn run_matching(
        &mut self,
        ctx: MarketContext<'_>,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<(MatchResult, Option<LedgerError>)> {
        let Market {
            engine, ledger, ..
        } = self;
        let mut failure = None;

        let result = engine.match_crossed(|fill| {
            let err = match ledger.apply_trade(
                ctx.balances,
                fill.bid.user_id,
                fill.ask.user_id,
                fill.price,
                fill.quantity,
            ) {
                Ok(()) => return FillDecision::Settled,
                Err(err) => err,
            };

            // The book was uncrossed before the newest order arrived, so it is in every fill.
            let incoming_is_bid = fill.bid.sequence_id > fill.ask.sequence_id;
            match (err.is_seller_side(), incoming_is_bid) {
                (false, false) => {
                    warn!(order_id = %fill.bid.id, error = %err, "resting bid rejected by ledger");
                    FillDecision::RejectBid
                }
                (true, true) => {
                    warn!(order_id = %fill.ask.id, error = %err, "resting ask rejected by ledger");
                    FillDecision::RejectAsk
                }
                _ => {
                    failure = Some(err);
                    FillDecision::Abort
                }
            }
        })?;

        for order in result
            .affected_orders
            .iter()
            .chain(result.canceled_orders.iter())
        {
            self.record_order(order.clone());
        }
        for order in &result.canceled_orders {
            events.push(ExchangeEvent::OrderCancelled {
                order: order.clone(),
                timestamp: Utc::now(),
            });
        }
        for trade in &result.trades {
            self.record_trade(trade.clone(), ctx, events);
        }
        if !result.is_empty() {
            events.push(self.price_event(ctx.pricing));
        }

        Ok((result, failure))
    }

    /// Takes an incoming order that could not settle back off the book.
    ///
    /// Without any fill the acceptance is undone and `err` is returned. Fills that already
    /// settled stay committed; the remainder is canceled and the fills are reported.
    fn withdraw_incoming(
        &mut self,
        order_id: Uuid,
        accepted_at: usize,
        err: LedgerError,
        trades: Vec<Trade>,
        ctx: MarketContext<'_>,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<(Order, Vec<Trade>)> {
        let withdrawn = self.engine.cancel_order(order_id)?;
        self.release_issuance(std::slice::from_ref(&withdrawn));

        if withdrawn.filled_quantity() == 0 {
            self.orders.remove(&order_id);
            if self.open_orders.get(&withdrawn.user_id) == Some(&order_id) {
                self.open_orders.remove(&withdrawn.user_id);
            }
            events.remove(accepted_at);
            warn!(
                instrument_id = %self.instrument.id,
                %order_id,
                error = %err,
                "order withdrawn before any fill"
            );
            return Err(err.into());
        }

        self.record_order(withdrawn.clone());
        warn!(
            instrument_id = %self.instrument.id,
            %order_id,
            filled = withdrawn.filled_quantity(),
            error = %err,
            "remainder canceled after settlement failure"
        );
        events.push(ExchangeEvent::OrderCancelled {
            order: withdrawn.clone(),
            timestamp: Utc::now(),
        });
        events.push(self.price_event(ctx.pricing));
        Ok((withdrawn, trades))
    }

    fn record_trade(
        &mut self,
        trade: Trade,
        ctx: MarketContext<'_>,
        events: &mut Vec<ExchangeEvent>,
    ) {
        let probability = ctx.pricing.learn_from_trade(&mut self.instrument, trade.price);
        self.instrument.updated_at = Utc::now();
        info!(
            instrument_id = %self.instrument.id,
            trade_id = %trade.id,
            buyer_id = %trade.buyer_id,
            seller_id = %trade.seller_id,
            price = %trade.price,
            quantity = trade.quantity,
            %probability,
            "trade executed"
        );
        self.trade_log.append(trade.clone());
        events.push(ExchangeEvent::TradeExecuted {
            trade,
            timestamp: Utc::now(),
        });
    }

    fn record_order(&mut self, order: Order) {
        if order.is_active() {
            self.open_orders.insert(order.user_id, order.id);
        } else if self.open_orders.get(&order.user_id) == Some(&order.id) {
            self.open_orders.remove(&order.user_id);
        }
        self.orders.insert(order.id, order);
    }

    /// Returns capacity reserved by issuance asks that left the book unfilled.
    fn release_issuance(&mut self, orders: &[Order]) {
        let released: u32 = orders
            .iter()
            .filter(|order| order.side == Side::Ask && order.issuance)
            .map(|order| order.remaining)
            .sum();
        if released > 0 {
            self.instrument.issued_count = self.instrument.issued_count.saturating_sub(released);
            debug!(
                instrument_id = %self.instrument.id,
                released,
                issued_count = self.instrument.issued_count,
                "issuance capacity released"
            );
        }
    }

    fn price_event(&self, pricing: &PricingModel) -> ExchangeEvent {
        ExchangeEvent::PriceUpdated {
            instrument_id: self.instrument.id,
            current_price: self.current_price(pricing),
            probability: self.instrument.active_probability(),
            timestamp: Utc::now(),
        }
    }

    /// Cancels an order. Canceling a terminal order is a successful no-op.
    pub fn cancel_order(
        &mut self,
        order_id: Uuid,
        pricing: &PricingModel,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<CancelOutcome> {
        let existing = self
            .orders
            .get(&order_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("order {}", order_id)))?;
        if !existing.is_active() {
            return Ok(CancelOutcome {
                order: existing.clone(),
                canceled: false,
            });
        }

        let order = self.engine.cancel_order(order_id)?;
        self.release_issuance(std::slice::from_ref(&order));
        self.record_order(order.clone());
        info!(instrument_id = %self.instrument.id, %order_id, "order canceled");

        events.push(ExchangeEvent::OrderCancelled {
            order: order.clone(),
            timestamp: Utc::now(),
        });
        events.push(self.price_event(pricing));
        Ok(CancelOutcome {
            order,
            canceled: true,
        })
    }

    //----------------------------------------------------------------------------------------------
    // Instant trades
    //----------------------------------------------------------------------------------------------

    /// Buys one contract at the best ask or, before the event, from the house at the quote.
    ///
    /// Fails with `InsufficientBalance` when the buyer cannot pay the ask, leaving the book as
    /// it was.
    pub fn buy_contract(
        &mut self,
        user_id: Uuid,
        ctx: MarketContext<'_>,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<InstantTradeOutcome> {
        let instrument_id = self.instrument.id;
        if self.state() == LifecycleState::Final {
            return Err(ExchangeError::not_tradeable(
                instrument_id,
                "instrument is FINAL; only cash-out is allowed",
            ));
        }
        if self.ledger.holds(&user_id) || self.open_orders.contains_key(&user_id) {
            return Err(ExchangeError::DuplicatePosition {
                user_id,
                instrument_id,
            });
        }

        if let Some(ask) = self.engine.order_book().best_ask() {
            self.admit_order(user_id, Side::Bid, ask, 1, ctx)?;
            let (order, trades) = self.accept_and_match(
                user_id,
                Side::Bid,
                ask,
                1,
                OrderSource::InstantTrade,
                false,
                ctx,
                events,
            )?;
            if let Some(trade) = trades.into_iter().next() {
                return Ok(InstantTradeOutcome {
                    trade: Some(trade),
                    resting_order: None,
                    new_balance: ctx.balances.balance(user_id),
                });
            }
            // Every crossing ask belonged to a seller who could not be credited.
            if order.is_active() {
                self.cancel_order(order.id, ctx.pricing, events)?;
            }
        }

        if self.state() != LifecycleState::Upcoming {
            return Err(ExchangeError::not_tradeable(
                instrument_id,
                "no contracts are offered by current holders",
            ));
        }
        if self.instrument.available_capacity() == 0 {
            return Err(ExchangeError::not_tradeable(
                instrument_id,
                "all contracts have been issued",
            ));
        }

        let price = ctx.pricing.fallback_price(&self.instrument);
        self.ledger
            .apply_trade(ctx.balances, user_id, HOUSE_ACCOUNT, price, 1)?;
        self.instrument.issued_count += 1;
        let trade = self.house_trade(user_id, HOUSE_ACCOUNT, price);
        self.record_trade(trade.clone(), ctx, events);
        events.push(self.price_event(ctx.pricing));

        Ok(InstantTradeOutcome {
            trade: Some(trade),
            resting_order: None,
            new_balance: ctx.balances.balance(user_id),
        })
    }

    /// Sells the user's contract at the best bid. Without a bid the house redeems it before the
    /// event, and during the event it rests as an ask at the quote.
    pub fn sell_contract(
        &mut self,
        user_id: Uuid,
        ctx: MarketContext<'_>,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<InstantTradeOutcome> {
        let instrument_id = self.instrument.id;
        if !lifecycle::can_sell(self.state()) {
            return Err(ExchangeError::not_tradeable(
                instrument_id,
                "selling is closed; cash out instead",
            ));
        }
        if !self.ledger.holds(&user_id) {
            return Err(ExchangeError::NotFound(format!(
                "position of user {} on instrument {}",
                user_id, instrument_id
            )));
        }
        if self.open_orders.contains_key(&user_id) {
            return Err(ExchangeError::DuplicatePosition {
                user_id,
                instrument_id,
            });
        }

        if let Some(bid) = self.engine.order_book().best_bid() {
            self.admit_order(user_id, Side::Ask, bid, 1, ctx)?;
            let (order, trades) = self.accept_and_match(
                user_id,
                Side::Ask,
                bid,
                1,
                OrderSource::InstantTrade,
                false,
                ctx,
                events,
            )?;
            if let Some(trade) = trades.into_iter().next() {
                return Ok(InstantTradeOutcome {
                    trade: Some(trade),
                    resting_order: None,
                    new_balance: ctx.balances.balance(user_id),
                });
            }
            // Every crossing bid was unfunded.
            if order.is_active() {
                self.cancel_order(order.id, ctx.pricing, events)?;
            }
        }

        let price = ctx.pricing.fallback_price(&self.instrument);
        match self.state() {
            LifecycleState::Upcoming => {
                self.ledger
                    .apply_trade(ctx.balances, HOUSE_ACCOUNT, user_id, price, 1)?;
                self.instrument.issued_count = self.instrument.issued_count.saturating_sub(1);
                let trade = self.house_trade(HOUSE_ACCOUNT, user_id, price);
                self.record_trade(trade.clone(), ctx, events);
                events.push(self.price_event(ctx.pricing));

                Ok(InstantTradeOutcome {
                    trade: Some(trade),
                    resting_order: None,
                    new_balance: ctx.balances.balance(user_id),
                })
            }
            _ => {
                self.admit_order(user_id, Side::Ask, price, 1, ctx)?;
                let (order, trades) = self.accept_and_match(
                    user_id,
                    Side::Ask,
                    price,
                    1,
                    OrderSource::InstantTrade,
                    false,
                    ctx,
                    events,
                )?;
                Ok(InstantTradeOutcome {
                    trade: trades.into_iter().next(),
                    resting_order: order.is_active().then_some(order),
                    new_balance: ctx.balances.balance(user_id),
                })
            }
        }
    }

    fn house_trade(&self, buyer_id: Uuid, seller_id: Uuid, price: Decimal) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            instrument_id: self.instrument.id,
            buyer_id,
            seller_id,
            buy_order_id: None,
            sell_order_id: None,
            price,
            quantity: 1,
            created_at: Utc::now(),
        }
    }

    //----------------------------------------------------------------------------------------------
    // Settlement and lifecycle
    //----------------------------------------------------------------------------------------------

    pub fn cash_out(
        &mut self,
        user_id: Uuid,
        settlement: Settlement,
        balances: &dyn BalanceProvider,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<CashOutOutcome> {
        if !lifecycle::can_cash_out(self.state()) {
            return Err(ExchangeError::not_tradeable(
                self.instrument.id,
                "cash-out opens once the instrument is FINAL",
            ));
        }

        let settled = self
            .ledger
            .settle(balances, user_id, settlement, self.instrument.payout)?;
        events.push(ExchangeEvent::PositionSettled {
            position: settled.position.clone(),
            settlement,
            amount: settled.amount,
            timestamp: Utc::now(),
        });

        Ok(CashOutOutcome {
            position: settled.position,
            settlement,
            payout: settled.amount,
            new_balance: settled.new_balance,
        })
    }

    /// Moves the instrument along its lifecycle.
    ///
    /// Entering LIVE withdraws unmatched issuance asks and seeds the live probability. Entering
    /// FINAL expires every resting order.
    pub fn transition(
        &mut self,
        to: LifecycleState,
        pricing: &PricingModel,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<Vec<Order>> {
        let from = self.state();
        lifecycle::transition(from, to)?;

        let expired = match to {
            LifecycleState::Live => self.engine.expire_where(Side::Ask, |order| order.issuance),
            LifecycleState::Final => self.engine.expire_all(),
            LifecycleState::Upcoming => Vec::new(),
        };
        self.release_issuance(&expired);
        for order in &expired {
            self.record_order(order.clone());
        }

        if to == LifecycleState::Live {
            self.instrument.live_probability = self.instrument.probability;
        }
        self.instrument.state = to;
        self.instrument.updated_at = Utc::now();
        info!(
            instrument_id = %self.instrument.id,
            %from,
            %to,
            expired = expired.len(),
            issued_count = self.instrument.issued_count,
            "instrument transitioned"
        );

        events.push(ExchangeEvent::LifecycleChanged {
            instrument_id: self.instrument.id,
            from,
            to,
            timestamp: Utc::now(),
        });
        if !expired.is_empty() {
            events.push(ExchangeEvent::OrdersExpired {
                instrument_id: self.instrument.id,
                orders: expired.clone(),
                timestamp: Utc::now(),
            });
        }
        events.push(self.price_event(pricing));
        Ok(expired)
    }

    /// Expires every resting order regardless of state; returns how many were expired.
    pub fn expire_all_orders(&mut self, events: &mut Vec<ExchangeEvent>) -> usize {
        let expired = self.engine.expire_all();
        if expired.is_empty() {
            return 0;
        }
        self.release_issuance(&expired);
        for order in &expired {
            self.record_order(order.clone());
        }
        info!(
            instrument_id = %self.instrument.id,
            expired = expired.len(),
            "resting orders expired"
        );

        let count = expired.len();
        events.push(ExchangeEvent::OrdersExpired {
            instrument_id: self.instrument.id,
            orders: expired,
            timestamp: Utc::now(),
        });
        count
    }

    /// Orders currently resting, bids first.
    pub fn resting_orders(&self) -> Vec<Order> {
        let book = self.engine.order_book();
        book.iter_side(Side::Bid)
            .chain(book.iter_side(Side::Ask))
            .cloned()
            .collect()
    }

    pub fn order_status(&self, order_id: &Uuid) -> Option<OrderStatus> {
        self.orders.get(order_id).map(|order| order.status)
    }

    pub fn order_ids(&self) -> impl Iterator<Item = &Uuid> + '_ {
        self.orders.keys()
    }

    /// True while any user still holds an unsettled contract.
    pub fn has_open_positions(&self) -> bool {
        !self.ledger.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::instrument::{Direction, InstrumentSpec, StatLine};
    use crate::domain::services::ledger::{InMemoryBalances, LedgerError, MockBalanceProvider};
    use rust_decimal_macros::dec;

    fn create_test_market() -> Market {
        let spec = InstrumentSpec {
            stat: StatLine {
                player: "Test Player".to_string(),
                stat_type: "STRIKEOUTS".to_string(),
                line: dec!(6.5),
                direction: Direction::Over,
            },
            base_probability: dec!(0.60),
            payout: None,
            total_capacity: None,
        };
        Market::new(Instrument::new(Uuid::new_v4(), spec, dec!(100), 2))
    }

    /// Balances whose account for `frozen` reports funds but refuses every debit and credit.
    struct FrozenAccount {
        inner: InMemoryBalances,
        frozen: Uuid,
    }

    impl BalanceProvider for FrozenAccount {
        fn balance(&self, user_id: Uuid) -> Decimal {
            self.inner.balance(user_id)
        }

        fn debit(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, LedgerError> {
            if user_id == self.frozen {
                return Err(LedgerError::InsufficientBalance {
                    user_id,
                    required: amount,
                    available: Decimal::ZERO,
                });
            }
            self.inner.debit(user_id, amount)
        }

        fn credit(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, LedgerError> {
            if user_id == self.frozen {
                return Err(LedgerError::InvalidAmount(amount));
            }
            self.inner.credit(user_id, amount)
        }
    }

    fn frozen(users: &[Uuid], frozen: Uuid) -> FrozenAccount {
        let inner = funded(users);
        inner.open_account(frozen);
        FrozenAccount { inner, frozen }
    }

    fn funded(users: &[Uuid]) -> InMemoryBalances {
        let balances = InMemoryBalances::new(dec!(1000));
        for user in users {
            balances.open_account(*user);
        }
        balances
    }

    #[test]
    fn test_issuance_reserves_and_cancel_releases() {
        let pricing = PricingModel::default();
        let seller = Uuid::new_v4();
        let balances = funded(&[seller]);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        let placed = market
            .place_order(seller, Side::Ask, dec!(65), 2, ctx, &mut events)
            .unwrap();
        assert!(placed.order.issuance);
        assert_eq!(market.instrument().issued_count, 2);

        let err = market
            .place_order(Uuid::new_v4(), Side::Ask, dec!(65), 1, ctx, &mut events)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::NotTradeable { .. }));

        let canceled = market
            .cancel_order(placed.order.id, &pricing, &mut events)
            .unwrap();
        assert!(canceled.canceled);
        assert_eq!(market.instrument().issued_count, 0);

        let again = market
            .cancel_order(placed.order.id, &pricing, &mut events)
            .unwrap();
        assert!(!again.canceled);
        assert_eq!(again.order.status, OrderStatus::Canceled);
    }

    #[test]
    fn test_validation_runs_before_mutation() {
        let pricing = PricingModel::default();
        let user = Uuid::new_v4();
        let balances = funded(&[user]);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        for (side, price, quantity) in [
            (Side::Bid, dec!(101), 1),
            (Side::Bid, dec!(-1), 1),
            (Side::Bid, dec!(50), 0),
            (Side::Bid, dec!(50), 2),
        ] {
            let err = market
                .place_order(user, side, price, quantity, ctx, &mut events)
                .unwrap_err();
            assert!(matches!(err, ExchangeError::Validation(_)), "{:?}", err);
        }
        assert!(events.is_empty());
        assert!(market.resting_orders().is_empty());
    }

    #[test]
    fn test_unfunded_resting_bid_is_dropped() {
        let pricing = PricingModel::default();
        let (poor, rich, seller) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let balances = funded(&[poor, rich, seller]);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        let poor_bid = market
            .place_order(poor, Side::Bid, dec!(58), 1, ctx, &mut events)
            .unwrap()
            .order;
        market
            .place_order(rich, Side::Bid, dec!(52), 1, ctx, &mut events)
            .unwrap();
        balances.set_balance(poor, dec!(10));

        let outcome = market
            .place_order(seller, Side::Ask, dec!(50), 1, ctx, &mut events)
            .unwrap();

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].buyer_id, rich);
        assert_eq!(outcome.trades[0].price, dec!(52));
        assert_eq!(market.order_status(&poor_bid.id), Some(OrderStatus::Canceled));
        assert_eq!(balances.balance(poor), dec!(10));
        assert!(market.position(&rich).is_some());
    }

    #[test]
    fn test_house_issuance_and_redemption() {
        let pricing = PricingModel::default();
        let user = Uuid::new_v4();
        let balances = funded(&[user]);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        let bought = market.buy_contract(user, ctx, &mut events).unwrap();
        let trade = bought.trade.unwrap();
        assert_eq!(trade.seller_id, HOUSE_ACCOUNT);
        assert_eq!(trade.price, dec!(60));
        assert_eq!(bought.new_balance, dec!(940));
        assert_eq!(market.instrument().issued_count, 1);

        let sold = market.sell_contract(user, ctx, &mut events).unwrap();
        assert_eq!(sold.trade.unwrap().buyer_id, HOUSE_ACCOUNT);
        assert_eq!(sold.new_balance, dec!(1000));
        assert_eq!(market.instrument().issued_count, 0);
        assert!(market.position(&user).is_none());
    }

    #[test]
    fn test_live_sale_without_bid_rests_as_reentrant_ask() {
        let pricing = PricingModel::default();
        let (holder, buyer) = (Uuid::new_v4(), Uuid::new_v4());
        let balances = funded(&[holder, buyer]);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        market.buy_contract(holder, ctx, &mut events).unwrap();
        market
            .transition(LifecycleState::Live, &pricing, &mut events)
            .unwrap();
        assert!(!market.trading_availability().can_buy);

        let sold = market.sell_contract(holder, ctx, &mut events).unwrap();
        assert!(sold.trade.is_none());
        let resting = sold.resting_order.unwrap();
        assert!(!resting.issuance);
        assert!(market.trading_availability().can_buy);

        let bought = market.buy_contract(buyer, ctx, &mut events).unwrap();
        assert_eq!(bought.trade.unwrap().seller_id, holder);
        assert!(market.position(&holder).is_none());
        assert!(market.position(&buyer).is_some());
    }

    #[test]
    fn test_cash_out_requires_final_and_position() {
        let pricing = PricingModel::default();
        let user = Uuid::new_v4();
        let balances = funded(&[user]);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        market.buy_contract(user, ctx, &mut events).unwrap();
        assert!(matches!(
            market.cash_out(user, Settlement::Won, &balances, &mut events),
            Err(ExchangeError::NotTradeable { .. })
        ));

        market
            .transition(LifecycleState::Live, &pricing, &mut events)
            .unwrap();
        market
            .transition(LifecycleState::Final, &pricing, &mut events)
            .unwrap();

        let outcome = market
            .cash_out(user, Settlement::Push, &balances, &mut events)
            .unwrap();
        assert_eq!(outcome.payout, dec!(60));
        assert_eq!(outcome.new_balance, dec!(1000));
        assert!(matches!(
            market.cash_out(user, Settlement::Push, &balances, &mut events),
            Err(ExchangeError::NotFound(_))
        ));
    }

    #[test]
    fn test_house_issuance_surfaces_insufficient_balance() {
        let pricing = PricingModel::default();
        let user = Uuid::new_v4();
        let mut balances = MockBalanceProvider::new();
        balances.expect_debit().returning(|user_id, required| {
            Err(LedgerError::InsufficientBalance {
                user_id,
                required,
                available: dec!(5),
            })
        });
        balances.expect_credit().never();
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        let err = market.buy_contract(user, ctx, &mut events).unwrap_err();

        assert!(matches!(err, ExchangeError::InsufficientBalance { .. }));
        assert_eq!(market.instrument().issued_count, 0);
        assert!(events.is_empty());
    }

    #[test]
    fn test_expire_all_orders_counts_once() {
        let pricing = PricingModel::default();
        let (bidder, seller) = (Uuid::new_v4(), Uuid::new_v4());
        let balances = funded(&[bidder, seller]);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        market
            .place_order(bidder, Side::Bid, dec!(40), 1, ctx, &mut events)
            .unwrap();
        market
            .place_order(seller, Side::Ask, dec!(70), 1, ctx, &mut events)
            .unwrap();

        assert_eq!(market.expire_all_orders(&mut events), 2);
        assert_eq!(market.expire_all_orders(&mut events), 0);
        assert_eq!(market.instrument().issued_count, 0);
        assert!(market.orders_for(bidder)[0].status == OrderStatus::Expired);
    }

    #[test]
    fn test_uncreditable_incoming_ask_leaves_bids_resting() {
        let pricing = PricingModel::default();
        let bidders = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let seller = Uuid::new_v4();
        let balances = frozen(&bidders, seller);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        for (bidder, price) in bidders.iter().zip([dec!(50), dec!(51), dec!(52)]) {
            market
                .place_order(*bidder, Side::Bid, price, 1, ctx, &mut events)
                .unwrap();
        }
        let published = events.len();

        let err = market
            .place_order(seller, Side::Ask, dec!(40), 1, ctx, &mut events)
            .unwrap_err();

        assert!(matches!(err, ExchangeError::Internal(_)), "{:?}", err);
        assert_eq!(events.len(), published);
        assert_eq!(market.resting_orders().len(), 3);
        for bidder in &bidders {
            assert_eq!(market.orders_for(*bidder)[0].status, OrderStatus::Open);
            assert_eq!(balances.balance(*bidder), dec!(1000));
            assert!(market.position(bidder).is_none());
        }
        assert!(market.orders_for(seller).is_empty());
        assert_eq!(market.instrument().issued_count, 0);
        assert_eq!(market.depth(10).asks.len(), 0);
    }

    #[test]
    fn test_uncreditable_resting_ask_is_dropped() {
        let pricing = PricingModel::default();
        let (buyer, seller, stuck) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let balances = frozen(&[buyer, seller], stuck);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        let stuck_ask = market
            .place_order(stuck, Side::Ask, dec!(40), 1, ctx, &mut events)
            .unwrap()
            .order;
        market
            .place_order(seller, Side::Ask, dec!(45), 1, ctx, &mut events)
            .unwrap();

        let outcome = market
            .place_order(buyer, Side::Bid, dec!(50), 1, ctx, &mut events)
            .unwrap();

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].seller_id, seller);
        assert_eq!(outcome.trades[0].price, dec!(45));
        assert_eq!(market.order_status(&stuck_ask.id), Some(OrderStatus::Canceled));
        assert_eq!(balances.balance(buyer), dec!(955));
        assert_eq!(balances.balance(stuck), dec!(1000));
        assert_eq!(market.instrument().issued_count, 1);
    }

    #[test]
    fn test_instant_buy_debit_failure_keeps_the_ask() {
        let pricing = PricingModel::default();
        let (seller, buyer) = (Uuid::new_v4(), Uuid::new_v4());
        let balances = frozen(&[seller], buyer);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        let ask = market
            .place_order(seller, Side::Ask, dec!(45), 1, ctx, &mut events)
            .unwrap()
            .order;
        let published = events.len();

        let err = market.buy_contract(buyer, ctx, &mut events).unwrap_err();

        assert!(matches!(err, ExchangeError::InsufficientBalance { .. }), "{:?}", err);
        assert_eq!(events.len(), published);
        assert_eq!(market.order_status(&ask.id), Some(OrderStatus::Open));
        assert!(market.orders_for(buyer).is_empty());
        assert!(market.position(&buyer).is_none());
    }

    #[test]
    fn test_instant_buy_skips_uncreditable_ask() {
        let pricing = PricingModel::default();
        let (buyer, stuck) = (Uuid::new_v4(), Uuid::new_v4());
        let balances = frozen(&[buyer], stuck);
        let ctx = MarketContext {
            balances: &balances,
            pricing: &pricing,
            book_depth: 10,
        };
        let mut market = create_test_market();
        let mut events = Vec::new();

        let stuck_ask = market
            .place_order(stuck, Side::Ask, dec!(40), 1, ctx, &mut events)
            .unwrap()
            .order;

        let outcome = market.buy_contract(buyer, ctx, &mut events).unwrap();

        let trade = outcome.trade.unwrap();
        assert_eq!(trade.seller_id, HOUSE_ACCOUNT);
        assert_eq!(market.order_status(&stuck_ask.id), Some(OrderStatus::Canceled));
        assert!(market.resting_orders().is_empty());
        assert_eq!(market.instrument().issued_count, 1);
        assert!(market.position(&buyer).is_some());
    }
}
