// Expose the modules
pub mod config;
pub mod domain;

// Re-export key types for easier usage
pub use config::{Config, ConfigError};
pub use domain::models::instrument::{
    Direction, Instrument, InstrumentSpec, LifecycleState, StatLine,
};
pub use domain::models::types::{
    Order, OrderSource, OrderStatus, Position, Settlement, Side, Trade, HOUSE_ACCOUNT,
};
pub use domain::services::events::{
    EventBus, EventDispatcher, EventError, EventHandler, EventLogger, EventResult, ExchangeEvent,
};
pub use domain::services::exchange::{
    CancelOutcome, CashOutOutcome, ErrorKind, Exchange, ExchangeError, ExchangeResult,
    InstantTradeOutcome, MarketSummary, PlaceOrderOutcome,
};
pub use domain::services::ledger::{BalanceProvider, InMemoryBalances, LedgerError};
pub use domain::services::lifecycle::TradingAvailability;
pub use domain::services::matching_engine::{MatchResult, MatchingEngine};
pub use domain::services::orderbook::depth::{DepthLevel, DepthSnapshot};
pub use domain::services::orderbook::orderbook::OrderBook;
pub use domain::services::pricing::PricingModel;
pub use domain::services::trade_log::TradeStats;
