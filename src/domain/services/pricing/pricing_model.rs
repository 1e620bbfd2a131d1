//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Quotes for an instrument derived from standing order intent, with a probability fallback.
//
// | Name              | Description                                                        |
// |-------------------|--------------------------------------------------------------------|
// | current_price     | VWAP of resting quantity when both sides are populated             |
// | fallback_price    | payout x probability for the instrument's current state            |
// | mid_price         | Mean of best bid and best ask, else current_price                  |
// | learn_from_trade  | Moves the state's probability to the clamped trade price / payout  |
//
// All quotes are rounded to cents.
//--------------------------------------------------------------------------------------------------

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::models::instrument::{Instrument, LifecycleState};
use crate::domain::models::types::Side;
use crate::domain::services::orderbook::orderbook::OrderBook;

/// Quotes carry two decimal places.
pub const PRICE_DECIMALS: u32 = 2;

/// Pricing rules parameterised by the probability clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingModel {
    pub probability_floor: Decimal,
    pub probability_ceiling: Decimal,
}

impl Default for PricingModel {
    fn default() -> Self {
        Self {
            probability_floor: dec!(0.01),
            probability_ceiling: dec!(0.99),
        }
    }
}

impl PricingModel {
    pub fn new(probability_floor: Decimal, probability_ceiling: Decimal) -> Self {
        Self {
            probability_floor,
            probability_ceiling,
        }
    }

    /// Price implied by the instrument's probability for its current state.
    pub fn fallback_price(&self, instrument: &Instrument) -> Decimal {
        (instrument.payout * instrument.active_probability()).round_dp(PRICE_DECIMALS)
    }

    /// Volume-weighted average of every resting order price, weighted by remaining quantity.
    ///
    /// Only used when both sides carry open interest; otherwise the fallback applies.
    pub fn current_price(&self, instrument: &Instrument, book: &OrderBook) -> Decimal {
        let bid_volume = book.side_volume(Side::Bid);
        let ask_volume = book.side_volume(Side::Ask);
        if bid_volume == 0 || ask_volume == 0 {
            return self.fallback_price(instrument);
        }

        let weighted: Decimal = [Side::Bid, Side::Ask]
            .into_iter()
            .flat_map(|side| book.iter_levels(side))
            .map(|level| level.price * Decimal::from(level.total_volume))
            .sum();
        let total = Decimal::from(bid_volume + ask_volume);

        (weighted / total).round_dp(PRICE_DECIMALS)
    }

    pub fn mid_price(&self, instrument: &Instrument, book: &OrderBook) -> Decimal {
        match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) => ((bid + ask) / dec!(2)).round_dp(PRICE_DECIMALS),
            _ => self.current_price(instrument, book),
        }
    }

    /// Clamped probability implied by a trade price.
    pub fn implied_probability(&self, instrument: &Instrument, price: Decimal) -> Decimal {
        if instrument.payout.is_zero() {
            return self.probability_floor;
        }
        (price / instrument.payout).clamp(self.probability_floor, self.probability_ceiling)
    }

    /// Updates the probability that backs fallback pricing in the current state.
    ///
    /// Returns the new probability. FINAL instruments never trade, so they are left alone.
    pub fn learn_from_trade(&self, instrument: &mut Instrument, price: Decimal) -> Decimal {
        let learned = self.implied_probability(instrument, price);
        match instrument.state {
            LifecycleState::Upcoming => instrument.probability = learned,
            LifecycleState::Live => instrument.live_probability = learned,
            LifecycleState::Final => return instrument.active_probability(),
        }
        learned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::instrument::{Direction, InstrumentSpec, StatLine};
    use crate::domain::models::types::{Order, OrderSource};
    use uuid::Uuid;

    fn create_test_instrument(probability: Decimal) -> Instrument {
        let spec = InstrumentSpec {
            stat: StatLine {
                player: "Test Player".to_string(),
                stat_type: "RUNS".to_string(),
                line: dec!(0.5),
                direction: Direction::Over,
            },
            base_probability: probability,
            payout: None,
            total_capacity: None,
        };
        Instrument::new(Uuid::new_v4(), spec, dec!(100), 10)
    }

    fn rest(book: &mut OrderBook, side: Side, price: Decimal, quantity: u32) {
        let order = Order::new(
            book.instrument_id(),
            Uuid::new_v4(),
            side,
            price,
            quantity,
            OrderSource::LimitOrder,
        );
        book.add_order(order).unwrap();
    }

    #[test]
    fn test_fallback_on_empty_book() {
        let model = PricingModel::default();
        let instrument = create_test_instrument(dec!(0.60));
        let book = OrderBook::new(instrument.id);

        assert_eq!(model.current_price(&instrument, &book), dec!(60));
        assert_eq!(model.mid_price(&instrument, &book), dec!(60));
    }

    #[test]
    fn test_one_sided_interest_uses_fallback() {
        let model = PricingModel::default();
        let instrument = create_test_instrument(dec!(0.60));
        let mut book = OrderBook::new(instrument.id);
        rest(&mut book, Side::Bid, dec!(20), 1);

        assert_eq!(model.current_price(&instrument, &book), dec!(60));
    }

    #[test]
    fn test_vwap_weights_remaining_quantity() {
        let model = PricingModel::default();
        let instrument = create_test_instrument(dec!(0.60));
        let mut book = OrderBook::new(instrument.id);
        rest(&mut book, Side::Bid, dec!(40), 3);
        rest(&mut book, Side::Ask, dec!(60), 1);

        // (40 * 3 + 60) / 4
        assert_eq!(model.current_price(&instrument, &book), dec!(45));
        assert_eq!(model.mid_price(&instrument, &book), dec!(50));
    }

    #[test]
    fn test_vwap_rounds_to_cents() {
        let model = PricingModel::default();
        let instrument = create_test_instrument(dec!(0.60));
        let mut book = OrderBook::new(instrument.id);
        rest(&mut book, Side::Bid, dec!(40), 2);
        rest(&mut book, Side::Ask, dec!(41), 1);

        assert_eq!(model.current_price(&instrument, &book), dec!(40.33));
    }

    #[test]
    fn test_learning_is_clamped_and_state_aware() {
        let model = PricingModel::default();
        let mut instrument = create_test_instrument(dec!(0.60));

        assert_eq!(model.learn_from_trade(&mut instrument, dec!(55)), dec!(0.55));
        assert_eq!(instrument.probability, dec!(0.55));
        assert_eq!(model.fallback_price(&instrument), dec!(55));

        assert_eq!(model.learn_from_trade(&mut instrument, dec!(100)), dec!(0.99));
        assert_eq!(model.learn_from_trade(&mut instrument, dec!(0)), dec!(0.01));

        instrument.state = LifecycleState::Live;
        instrument.live_probability = instrument.probability;
        model.learn_from_trade(&mut instrument, dec!(30));
        assert_eq!(instrument.live_probability, dec!(0.30));
        assert_eq!(instrument.probability, dec!(0.01));
        assert_eq!(model.fallback_price(&instrument), dec!(30));
    }
}
