//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Finite state machine gating which trading actions are legal for an instrument.
//
// | Name                 | Description                                              |
// |----------------------|----------------------------------------------------------|
// | TRANSITIONS          | The only legal edges: UPCOMING -> LIVE -> FINAL          |
// | transition           | Validates an edge against the table                      |
// | can_buy              | UPCOMING, or LIVE with re-entrant inventory on the book  |
// | can_sell             | UPCOMING or LIVE                                         |
// | can_cash_out         | FINAL only                                               |
// | trading_availability | The three predicates plus a display message              |
//
// Side effects of a transition on the book (vanishing issuance asks, expiring orders) are
// applied by the exchange under the instrument lock; this module only decides.
//--------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::domain::models::instrument::LifecycleState;

use super::LifecycleError;

/// Legal lifecycle edges.
pub const TRANSITIONS: &[(LifecycleState, LifecycleState)] = &[
    (LifecycleState::Upcoming, LifecycleState::Live),
    (LifecycleState::Live, LifecycleState::Final),
];

/// Validates `from -> to` and returns the new state.
pub fn transition(
    from: LifecycleState,
    to: LifecycleState,
) -> Result<LifecycleState, LifecycleError> {
    if TRANSITIONS.contains(&(from, to)) {
        Ok(to)
    } else {
        Err(LifecycleError::InvalidTransition { from, to })
    }
}

/// `has_reentrant_inventory` is true when some owner has an ask resting on the book.
#[inline]
pub fn can_buy(state: LifecycleState, has_reentrant_inventory: bool) -> bool {
    match state {
        LifecycleState::Upcoming => true,
        LifecycleState::Live => has_reentrant_inventory,
        LifecycleState::Final => false,
    }
}

#[inline]
pub fn can_sell(state: LifecycleState) -> bool {
    matches!(state, LifecycleState::Upcoming | LifecycleState::Live)
}

#[inline]
pub fn can_cash_out(state: LifecycleState) -> bool {
    state == LifecycleState::Final
}

/// What a user may currently do with an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingAvailability {
    pub state: LifecycleState,
    pub can_buy: bool,
    pub can_sell: bool,
    pub can_cash_out: bool,
    pub message: &'static str,
}

pub fn trading_availability(
    state: LifecycleState,
    has_reentrant_inventory: bool,
) -> TradingAvailability {
    let message = match state {
        LifecycleState::Upcoming => "Full trading available",
        LifecycleState::Live if has_reentrant_inventory => {
            "Limited trading - sell owned contracts or buy contracts other holders are selling"
        }
        LifecycleState::Live => "Limited trading - no contracts are currently offered by holders",
        LifecycleState::Final => "Event finished - cash out your contracts",
    };

    TradingAvailability {
        state,
        can_buy: can_buy(state, has_reentrant_inventory),
        can_sell: can_sell(state),
        can_cash_out: can_cash_out(state),
        message,
    }
}
