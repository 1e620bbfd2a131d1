//--------------------------------------------------------------------------------------------------
// DEMO SESSION
//--------------------------------------------------------------------------------------------------
// Runs one instrument through its whole lifecycle against in-memory balances, printing every
// exchange event as it is dispatched.
//
// | Step        | Description                                                       |
// |-------------|-------------------------------------------------------------------|
// | UPCOMING    | Limit orders cross, price learns, an instant buy issues a contract |
// | LIVE        | Unmatched issuance vanishes, a holder re-offers their contract     |
// | FINAL       | Resting orders expire, holders cash out against the final stat     |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use uuid::Uuid;

use prop_matching::{
    Config, Direction, EventDispatcher, EventHandler, EventLogger, EventResult, Exchange,
    ExchangeEvent, InMemoryBalances, InstrumentSpec, LifecycleState, Settlement, Side, StatLine,
};

/// Command line arguments for the demo session
#[derive(Parser, Debug)]
#[command(author, version, about = "Walks a player prop through a full trading session")]
struct Args {
    #[arg(long, default_value = "Aaron Judge")]
    player: String,

    #[arg(long, default_value = "HITS")]
    stat_type: String,

    #[arg(long, default_value = "1.5")]
    line: Decimal,

    /// Contract pays out when the stat finishes under the line
    #[arg(long)]
    under: bool,

    /// Base probability of the contract paying out
    #[arg(long, default_value = "0.60")]
    probability: Decimal,

    /// Final value of the statistic used to settle positions
    #[arg(long, default_value = "2")]
    actual: Decimal,

    /// Print the final market summary as JSON
    #[arg(long)]
    json: bool,
}

/// Prints events to the console as they are dispatched
struct ConsoleEventHandler;

#[async_trait::async_trait]
impl EventHandler for ConsoleEventHandler {
    fn event_types(&self) -> Vec<&'static str> {
        vec![
            "OrderAccepted",
            "OrderCancelled",
            "OrdersExpired",
            "TradeExecuted",
            "LifecycleChanged",
            "PositionSettled",
        ]
    }

    async fn handle_event(&self, event: ExchangeEvent) -> EventResult<()> {
        match &event {
            ExchangeEvent::OrderAccepted { order, timestamp } => println!(
                "[{}] order accepted: {} {} @ {}",
                timestamp, order.side, order.quantity, order.limit_price
            ),
            ExchangeEvent::OrderCancelled { order, timestamp } => {
                println!("[{}] order canceled: {}", timestamp, order.id)
            }
            ExchangeEvent::OrdersExpired {
                orders, timestamp, ..
            } => println!("[{}] {} orders expired", timestamp, orders.len()),
            ExchangeEvent::TradeExecuted { trade, timestamp } => println!(
                "[{}] trade executed: {} @ {}",
                timestamp, trade.quantity, trade.price
            ),
            ExchangeEvent::LifecycleChanged {
                from, to, timestamp, ..
            } => println!("[{}] lifecycle {} -> {}", timestamp, from, to),
            ExchangeEvent::PositionSettled {
                settlement,
                amount,
                timestamp,
                ..
            } => println!("[{}] position settled {:?}: {}", timestamp, settlement, amount),
            ExchangeEvent::PriceUpdated { .. } => {}
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::try_from_env().context("failed to load configuration")?;
    config.init_tracing();

    let balances = Arc::new(InMemoryBalances::new(config.initial_balance));
    let exchange = Exchange::new(config.clone(), balances.clone());

    let logger = Arc::new(EventLogger::new(256));
    let dispatcher = EventDispatcher::new(exchange.event_bus().clone());
    dispatcher.register_handler(Arc::new(ConsoleEventHandler)).await;
    dispatcher.register_handler(logger.clone()).await;
    let _dispatcher_handle = dispatcher.start();

    let direction = if args.under {
        Direction::Under
    } else {
        Direction::Over
    };
    let line = args.line;
    let instrument = exchange.create_instrument(InstrumentSpec {
        stat: StatLine {
            player: args.player.clone(),
            stat_type: args.stat_type.clone(),
            line,
            direction,
        },
        base_probability: args.probability,
        payout: None,
        total_capacity: None,
    })?;
    let id = instrument.id;
    println!(
        "{} {} {:?} {} opens at {}",
        args.player,
        args.stat_type,
        direction,
        line,
        exchange.get_current_price(id)?
    );

    let (alice, bob, carol, dave) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    for user in [alice, bob, carol, dave] {
        balances.open_account(user);
    }

    // UPCOMING: a bid rests, an issuance ask crosses it at the bid's price.
    let payout = instrument.payout;
    let bid_price = (exchange.get_current_price(id)? - Decimal::from(5)).max(Decimal::ZERO);
    exchange.place_order(alice, id, Side::Bid, bid_price, 1)?;
    let crossed = exchange.place_order(bob, id, Side::Ask, (bid_price - Decimal::from(5)).max(Decimal::ZERO), 1)?;
    println!("matched {} trade(s), price now {}", crossed.trades.len(), exchange.get_current_price(id)?);

    exchange.buy_contract(carol, id)?;
    let unmatched = exchange.place_order(dave, id, Side::Ask, payout, 1)?;
    println!(
        "book before the event: {}",
        serde_json::to_string(&exchange.get_order_book(id, None)?)?
    );

    // LIVE: the unmatched issuance ask disappears, only holders can supply contracts.
    let expired = exchange.transition_instrument(id, LifecycleState::Live)?;
    println!(
        "{} issuance ask(s) withdrawn (dave's order is now {:?})",
        expired.len(),
        exchange.get_order(unmatched.order.id)?.status
    );
    if let Err(err) = exchange.buy_contract(dave, id) {
        println!("dave cannot buy yet: {}", err);
    }
    exchange.sell_contract(carol, id)?;
    let resale = exchange.buy_contract(dave, id)?;
    println!("dave bought carol's contract: {:?}", resale.trade.map(|t| t.price));

    // FINAL: settle everyone still holding.
    exchange.transition_instrument(id, LifecycleState::Final)?;
    let settlement = Settlement::determine(direction, line, args.actual);
    for user in [alice, dave] {
        let outcome = exchange.cash_out(user, id, settlement)?;
        println!(
            "user {} cashed out {:?} for {}, balance {}",
            user, outcome.settlement, outcome.payout, outcome.new_balance
        );
    }

    let summary = exchange.market_summary(id)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "final: {} trades, {} contracts traded, last price {:?}",
            summary.trade_stats.trade_count,
            summary.trade_stats.total_volume,
            summary.trade_stats.last_price
        );
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("{} events recorded", logger.get_history().await.len());
    Ok(())
}
