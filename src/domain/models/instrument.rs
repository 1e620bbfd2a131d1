//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Tradeable prop instruments: what statistic they track, where they are in their lifecycle and
// the counters bounding how many contracts may ever exist.
//
// | Name            | Description                                                     |
// |-----------------|-----------------------------------------------------------------|
// | LifecycleState  | UPCOMING / LIVE / FINAL                                         |
// | Direction       | Over/under convention of the contract                           |
// | StatLine        | Player, stat type, line and direction                           |
// | InstrumentSpec  | What the prop-generation pipeline hands us to create an instrument|
// | Instrument      | The instrument as held by the exchange                          |
//--------------------------------------------------------------------------------------------------

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of the sporting event behind an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleState {
    Upcoming,
    Live,
    Final,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upcoming => write!(f, "UPCOMING"),
            Self::Live => write!(f, "LIVE"),
            Self::Final => write!(f, "FINAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Over,
    Under,
}

/// The statistic a contract is written on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatLine {
    pub player: String,
    /// e.g. `HITS`, `PASSING_YARDS`.
    pub stat_type: String,
    pub line: Decimal,
    pub direction: Direction,
}

/// Input for creating an instrument. `payout` and `total_capacity` fall back to configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub stat: StatLine,
    /// Externally supplied probability in `[0, 1]`.
    pub base_probability: Decimal,
    pub payout: Option<Decimal>,
    pub total_capacity: Option<u32>,
}

/// A tradeable prop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: Uuid,
    pub stat: StatLine,
    pub state: LifecycleState,
    /// Probability supplied at creation; never changes.
    pub base_probability: Decimal,
    /// Pre-game probability, seeded from `base_probability` and learned from trades while UPCOMING.
    pub probability: Decimal,
    /// In-game probability, seeded on entering LIVE and learned from trades while LIVE.
    pub live_probability: Decimal,
    /// Paid per contract to winning holders.
    pub payout: Decimal,
    pub total_capacity: u32,
    /// Contracts issued or reserved by resting issuance asks.
    pub issued_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instrument {
    pub fn new(id: Uuid, spec: InstrumentSpec, payout: Decimal, total_capacity: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            stat: spec.stat,
            state: LifecycleState::Upcoming,
            base_probability: spec.base_probability,
            probability: spec.base_probability,
            live_probability: spec.base_probability,
            payout,
            total_capacity,
            issued_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Probability fallback pricing should use in the current state.
    #[inline]
    pub fn active_probability(&self) -> Decimal {
        match self.state {
            LifecycleState::Live => self.live_probability,
            _ => self.probability,
        }
    }

    /// Fresh contracts that can still be issued.
    #[inline]
    pub fn available_capacity(&self) -> u32 {
        self.total_capacity.saturating_sub(self.issued_count)
    }
}
