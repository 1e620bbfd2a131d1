pub mod events;
pub mod exchange;
pub mod ledger;
pub mod lifecycle;
pub mod matching_engine;
pub mod orderbook;
pub mod pricing;
pub mod trade_log;
