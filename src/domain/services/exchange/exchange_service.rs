//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// The exchange: an explicit engine object owning every market, constructed per session or test.
//
// | Component     | Description                                                           |
// |---------------|-----------------------------------------------------------------------|
// | Exchange      | Instrument registry, order index, balance seam, pricing and event bus |
//
// Locking: the registry is a `RwLock` that is only held long enough to clone a market handle.
// Each market sits behind its own `Mutex`, so instruments never contend with each other and
// every operation on one instrument is linearized. Events collected under a market lock are
// published before the guard is dropped, so subscribers see one instrument's events in commit
// order. Lock order is market, then registry or order index; never the reverse.
//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                     | Description                                          |
// |--------------------------|------------------------------------------------------|
// | create_instrument        | Registers an UPCOMING instrument                     |
// | place_order              | Limit order flow                                     |
// | cancel_order             | Idempotent cancel by order ID                        |
// | buy_contract             | Instant buy                                          |
// | sell_contract            | Instant sell                                         |
// | cash_out                 | Settles a position on a FINAL instrument             |
// | get_order_book           | Bid/ask ladders                                      |
// | get_mid_price            | Mean of best bid and ask, else current price         |
// | get_current_price        | Liquidity-weighted quote or probability fallback     |
// | transition_instrument    | Lifecycle trigger from the game-status monitor       |
// | expire_at_lifecycle_end  | Expires every resting order, returns the count       |
// | archive_instrument       | Drops a settled FINAL instrument and its order index |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{error, info};
use uuid::Uuid;

use super::market::{
    CancelOutcome, CashOutOutcome, InstantTradeOutcome, Market, MarketContext, MarketSummary,
    PlaceOrderOutcome,
};
use super::{ExchangeError, ExchangeResult};
use crate::config::Config;
use crate::domain::models::instrument::{Instrument, InstrumentSpec, LifecycleState};
use crate::domain::models::types::{Order, Position, Settlement, Side, Trade};
use crate::domain::services::events::{EventBus, ExchangeEvent};
use crate::domain::services::ledger::BalanceProvider;
use crate::domain::services::lifecycle::TradingAvailability;
use crate::domain::services::orderbook::depth::DepthSnapshot;
use crate::domain::services::pricing::PricingModel;

/// The trading core for a set of instruments.
pub struct Exchange {
    markets: RwLock<HashMap<Uuid, Arc<Mutex<Market>>>>,
    /// order ID -> instrument ID, for every order of a registered instrument. Entries leave
    /// with their instrument in `archive_instrument`.
    order_index: RwLock<HashMap<Uuid, Uuid>>,
    balances: Arc<dyn BalanceProvider>,
    pricing: PricingModel,
    event_bus: EventBus,
    config: Config,
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("instruments", &self.markets.read().len())
            .field("pricing", &self.pricing)
            .field("event_bus", &self.event_bus)
            .finish_non_exhaustive()
    }
}

impl Exchange {
    /// Creates an empty exchange with its own event bus.
    ///
    /// # Arguments
    ///
    /// * `config` - Payout, capacity, pricing clamp and display defaults
    /// * `balances` - The account seam debited and credited by trades and cash-outs
    pub fn new(config: Config, balances: Arc<dyn BalanceProvider>) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        Self::with_event_bus(config, balances, event_bus)
    }

    pub fn with_event_bus(
        config: Config,
        balances: Arc<dyn BalanceProvider>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            markets: RwLock::new(HashMap::new()),
            order_index: RwLock::new(HashMap::new()),
            balances,
            pricing: config.pricing_model(),
            event_bus,
            config,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn balance(&self, user_id: Uuid) -> Decimal {
        self.balances.balance(user_id)
    }

    fn market(&self, instrument_id: Uuid) -> ExchangeResult<Arc<Mutex<Market>>> {
        self.markets
            .read()
            .get(&instrument_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("instrument {}", instrument_id)))
    }

    /// Runs `f` under the instrument's lock and publishes what it committed before unlocking.
    ///
    /// Publishing under the lock keeps each instrument's events in commit order across threads.
    /// The broadcast send never blocks, and the order index is always locked after a market.
    fn with_market<T, F>(&self, instrument_id: Uuid, f: F) -> ExchangeResult<T>
    where
        F: FnOnce(&mut Market, MarketContext<'_>, &mut Vec<ExchangeEvent>) -> ExchangeResult<T>,
    {
        let market = self.market(instrument_id)?;
        let mut events = Vec::new();
        let mut guard = market.lock();
        let ctx = MarketContext {
            balances: self.balances.as_ref(),
            pricing: &self.pricing,
            book_depth: self.config.default_book_depth,
        };
        let result = f(&mut guard, ctx, &mut events);
        self.commit(events);
        drop(guard);
        result
    }

    /// Read-only access under the instrument's lock.
    fn read_market<T, F>(&self, instrument_id: Uuid, f: F) -> ExchangeResult<T>
    where
        F: FnOnce(&Market) -> T,
    {
        let market = self.market(instrument_id)?;
        let guard = market.lock();
        Ok(f(&guard))
    }

    fn commit(&self, events: Vec<ExchangeEvent>) {
        if events.is_empty() {
            return;
        }
        {
            let mut index = self.order_index.write();
            for event in &events {
                if let ExchangeEvent::OrderAccepted { order, .. } = event {
                    index.insert(order.id, order.instrument_id);
                }
            }
        }
        if let Err(e) = self.event_bus.publish_all(events) {
            error!("Failed to publish exchange events: {}", e);
        }
    }

    //----------------------------------------------------------------------------------------------
    // Instruments
    //----------------------------------------------------------------------------------------------

    /// Registers a new UPCOMING instrument. Payout and capacity default from the config.
    pub fn create_instrument(&self, spec: InstrumentSpec) -> ExchangeResult<Instrument> {
        let payout = spec.payout.unwrap_or(self.config.standard_payout);
        let total_capacity = spec
            .total_capacity
            .unwrap_or(self.config.max_contracts_per_prop);

        if !(Decimal::ZERO..=Decimal::ONE).contains(&spec.base_probability) {
            return Err(ExchangeError::Validation(format!(
                "base probability {} is outside [0, 1]",
                spec.base_probability
            )));
        }
        if payout <= Decimal::ZERO {
            return Err(ExchangeError::Validation(format!(
                "payout {} must be positive",
                payout
            )));
        }

        let instrument = Instrument::new(Uuid::new_v4(), spec, payout, total_capacity);
        self.markets
            .write()
            .insert(instrument.id, Arc::new(Mutex::new(Market::new(instrument.clone()))));
        info!(
            instrument_id = %instrument.id,
            player = %instrument.stat.player,
            stat_type = %instrument.stat.stat_type,
            line = %instrument.stat.line,
            %payout,
            total_capacity,
            "instrument created"
        );
        Ok(instrument)
    }

    pub fn instrument(&self, instrument_id: Uuid) -> ExchangeResult<Instrument> {
        self.read_market(instrument_id, |market| market.instrument().clone())
    }

    pub fn list_instruments(&self) -> Vec<Instrument> {
        let markets: Vec<Arc<Mutex<Market>>> = self.markets.read().values().cloned().collect();
        let mut instruments: Vec<Instrument> = markets
            .iter()
            .map(|market| market.lock().instrument().clone())
            .collect();
        instruments.sort_by_key(|instrument| instrument.created_at);
        instruments
    }

    //----------------------------------------------------------------------------------------------
    // Trading
    //----------------------------------------------------------------------------------------------

    pub fn place_order(
        &self,
        user_id: Uuid,
        instrument_id: Uuid,
        side: Side,
        price: Decimal,
        quantity: u32,
    ) -> ExchangeResult<PlaceOrderOutcome> {
        self.with_market(instrument_id, |market, ctx, events| {
            market.place_order(user_id, side, price, quantity, ctx, events)
        })
    }

    /// Cancels by order ID. A second cancel of the same order succeeds without effect.
    pub fn cancel_order(&self, order_id: Uuid) -> ExchangeResult<CancelOutcome> {
        let instrument_id = self
            .order_index
            .read()
            .get(&order_id)
            .copied()
            .ok_or_else(|| ExchangeError::NotFound(format!("order {}", order_id)))?;

        let pricing = self.pricing;
        self.with_market(instrument_id, |market, _, events| {
            market.cancel_order(order_id, &pricing, events)
        })
    }

    pub fn buy_contract(
        &self,
        user_id: Uuid,
        instrument_id: Uuid,
    ) -> ExchangeResult<InstantTradeOutcome> {
        self.with_market(instrument_id, |market, ctx, events| {
            market.buy_contract(user_id, ctx, events)
        })
    }

    pub fn sell_contract(
        &self,
        user_id: Uuid,
        instrument_id: Uuid,
    ) -> ExchangeResult<InstantTradeOutcome> {
        self.with_market(instrument_id, |market, ctx, events| {
            market.sell_contract(user_id, ctx, events)
        })
    }

    /// Settles the user's position on a FINAL instrument.
    ///
    /// `settlement` is determined outside the core, e.g. with `Settlement::determine`.
    pub fn cash_out(
        &self,
        user_id: Uuid,
        instrument_id: Uuid,
        settlement: Settlement,
    ) -> ExchangeResult<CashOutOutcome> {
        self.with_market(instrument_id, |market, ctx, events| {
            market.cash_out(user_id, settlement, ctx.balances, events)
        })
    }

    //----------------------------------------------------------------------------------------------
    // Lifecycle
    //----------------------------------------------------------------------------------------------

    /// Applies a lifecycle edge. Returns the orders the transition expired.
    pub fn transition_instrument(
        &self,
        instrument_id: Uuid,
        to: LifecycleState,
    ) -> ExchangeResult<Vec<Order>> {
        self.with_market(instrument_id, |market, ctx, events| {
            market.transition(to, ctx.pricing, events)
        })
    }

    pub fn expire_at_lifecycle_end(&self, instrument_id: Uuid) -> ExchangeResult<usize> {
        self.with_market(instrument_id, |market, _, events| {
            Ok(market.expire_all_orders(events))
        })
    }

    /// Unregisters a FINAL instrument once every position has been cashed out, dropping its
    /// order history and index entries. Returns the instrument as it was archived.
    ///
    /// # Errors
    /// - `NotFound` for an unknown or already archived instrument
    /// - `NotTradeable` before FINAL, or while positions remain unsettled
    pub fn archive_instrument(&self, instrument_id: Uuid) -> ExchangeResult<Instrument> {
        let market = self.market(instrument_id)?;
        let guard = market.lock();
        if guard.state() != LifecycleState::Final {
            return Err(ExchangeError::not_tradeable(
                instrument_id,
                "only FINAL instruments can be archived",
            ));
        }
        if guard.has_open_positions() {
            return Err(ExchangeError::not_tradeable(
                instrument_id,
                "positions are still awaiting cash-out",
            ));
        }

        if self.markets.write().remove(&instrument_id).is_none() {
            return Err(ExchangeError::NotFound(format!(
                "instrument {}",
                instrument_id
            )));
        }
        let mut index = self.order_index.write();
        let mut dropped = 0usize;
        for order_id in guard.order_ids() {
            if index.remove(order_id).is_some() {
                dropped += 1;
            }
        }
        info!(%instrument_id, orders = dropped, "instrument archived");
        Ok(guard.instrument().clone())
    }

    //----------------------------------------------------------------------------------------------
    // Queries
    //----------------------------------------------------------------------------------------------

    /// Bid/ask ladders, `depth` levels per side (the configured default when `None`).
    pub fn get_order_book(
        &self,
        instrument_id: Uuid,
        depth: Option<usize>,
    ) -> ExchangeResult<DepthSnapshot> {
        let levels = depth.unwrap_or(self.config.default_book_depth);
        self.read_market(instrument_id, |market| market.depth(levels))
    }

    pub fn get_current_price(&self, instrument_id: Uuid) -> ExchangeResult<Decimal> {
        self.read_market(instrument_id, |market| market.current_price(&self.pricing))
    }

    pub fn get_mid_price(&self, instrument_id: Uuid) -> ExchangeResult<Decimal> {
        self.read_market(instrument_id, |market| market.mid_price(&self.pricing))
    }

    pub fn market_summary(&self, instrument_id: Uuid) -> ExchangeResult<MarketSummary> {
        let window = self.config.trade_stats_window;
        self.read_market(instrument_id, |market| {
            market.summary(&self.pricing, window)
        })
    }

    pub fn recent_trades(&self, instrument_id: Uuid, limit: usize) -> ExchangeResult<Vec<Trade>> {
        self.read_market(instrument_id, |market| market.recent_trades(limit))
    }

    pub fn trading_availability(&self, instrument_id: Uuid) -> ExchangeResult<TradingAvailability> {
        self.read_market(instrument_id, |market| market.trading_availability())
    }

    pub fn get_order(&self, order_id: Uuid) -> ExchangeResult<Order> {
        let instrument_id = self
            .order_index
            .read()
            .get(&order_id)
            .copied()
            .ok_or_else(|| ExchangeError::NotFound(format!("order {}", order_id)))?;
        self.read_market(instrument_id, |market| market.get_order(&order_id).cloned())?
            .ok_or_else(|| ExchangeError::NotFound(format!("order {}", order_id)))
    }

    /// Every order the user ever placed, grouped by instrument in acceptance order.
    pub fn user_orders(&self, user_id: Uuid) -> Vec<Order> {
        let markets: Vec<Arc<Mutex<Market>>> = self.markets.read().values().cloned().collect();
        let mut orders: Vec<Order> = markets
            .iter()
            .flat_map(|market| market.lock().orders_for(user_id))
            .collect();
        orders.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.sequence_id.cmp(&b.sequence_id))
        });
        orders
    }

    pub fn position(&self, user_id: Uuid, instrument_id: Uuid) -> ExchangeResult<Option<Position>> {
        self.read_market(instrument_id, |market| market.position(&user_id).cloned())
    }
}
