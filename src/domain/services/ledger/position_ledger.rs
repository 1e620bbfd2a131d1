//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Positions held on a single instrument and the cash movements that go with trades and settlement.
//
// | Name          | Description                                                          |
// |---------------|----------------------------------------------------------------------|
// | apply_trade   | Debit buyer, credit seller, open buyer position, reduce seller's     |
// | settle        | Pay out a position according to its settlement and remove it         |
// | settlement_amount | Won pays payout x qty, Lost nothing, Push refunds the entry cost |
//
// HOUSE_ACCOUNT never holds positions and its cash is not tracked.
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{BalanceProvider, LedgerError};
use crate::domain::models::types::{Position, Settlement, HOUSE_ACCOUNT};

/// Result of settling one position.
#[derive(Debug, Clone, PartialEq)]
pub struct SettledPosition {
    pub position: Position,
    pub settlement: Settlement,
    pub amount: Decimal,
    pub new_balance: Decimal,
}

/// Positions on one instrument, keyed by user.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    instrument_id: Uuid,
    positions: HashMap<Uuid, Position>,
}

impl PositionLedger {
    pub fn new(instrument_id: Uuid) -> Self {
        Self {
            instrument_id,
            positions: HashMap::new(),
        }
    }

    pub fn position(&self, user_id: &Uuid) -> Option<&Position> {
        self.positions.get(user_id)
    }

    #[inline]
    pub fn holds(&self, user_id: &Uuid) -> bool {
        self.positions.contains_key(user_id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Moves cash and positions for one execution.
    ///
    /// Fails without changing anything if the buyer already holds a position or cannot pay.
    /// A seller whose account refuses the proceeds yields `CreditFailed` after the buyer's
    /// debit has been reversed.
    pub fn apply_trade(
        &mut self,
        balances: &dyn BalanceProvider,
        buyer_id: Uuid,
        seller_id: Uuid,
        price: Decimal,
        quantity: u32,
    ) -> Result<(), LedgerError> {
        if buyer_id != HOUSE_ACCOUNT && self.holds(&buyer_id) {
            return Err(LedgerError::PositionLimit {
                user_id: buyer_id,
                instrument_id: self.instrument_id,
            });
        }
        let seller_quantity = self.positions.get(&seller_id).map_or(0, |p| p.quantity);
        let notional = price * Decimal::from(quantity);

        if buyer_id != HOUSE_ACCOUNT {
            balances.debit(buyer_id, notional)?;
        }
        if seller_id != HOUSE_ACCOUNT {
            if let Err(err) = balances.credit(seller_id, notional) {
                if buyer_id != HOUSE_ACCOUNT {
                    if let Err(refund) = balances.credit(buyer_id, notional) {
                        error!(
                            %buyer_id,
                            %notional,
                            error = %refund,
                            "failed to reverse buyer debit"
                        );
                    }
                }
                return Err(LedgerError::CreditFailed {
                    user_id: seller_id,
                    reason: err.to_string(),
                });
            }
        }

        if buyer_id != HOUSE_ACCOUNT {
            self.positions.insert(
                buyer_id,
                Position {
                    user_id: buyer_id,
                    instrument_id: self.instrument_id,
                    quantity,
                    average_entry_price: price,
                    opened_at: Utc::now(),
                },
            );
        }
        if seller_quantity > 0 {
            if seller_quantity <= quantity {
                self.positions.remove(&seller_id);
            } else if let Some(position) = self.positions.get_mut(&seller_id) {
                position.quantity -= quantity;
            }
        }

        debug!(
            instrument_id = %self.instrument_id,
            %buyer_id,
            %seller_id,
            %price,
            quantity,
            "trade applied to ledger"
        );
        Ok(())
    }

    /// Cash owed to the holder of `position` under `settlement`.
    pub fn settlement_amount(position: &Position, settlement: Settlement, payout: Decimal) -> Decimal {
        match settlement {
            Settlement::Won => payout * Decimal::from(position.quantity),
            Settlement::Lost => Decimal::ZERO,
            Settlement::Push => position.cost_basis(),
        }
    }

    /// Pays out and removes the position of `user_id`.
    pub fn settle(
        &mut self,
        balances: &dyn BalanceProvider,
        user_id: Uuid,
        settlement: Settlement,
        payout: Decimal,
    ) -> Result<SettledPosition, LedgerError> {
        let position = self
            .positions
            .get(&user_id)
            .ok_or(LedgerError::PositionNotFound {
                user_id,
                instrument_id: self.instrument_id,
            })?;

        let amount = Self::settlement_amount(position, settlement, payout);
        let new_balance = balances.credit(user_id, amount)?;
        let position = self
            .positions
            .remove(&user_id)
            .ok_or(LedgerError::PositionNotFound {
                user_id,
                instrument_id: self.instrument_id,
            })?;

        info!(
            instrument_id = %self.instrument_id,
            %user_id,
            ?settlement,
            %amount,
            "position settled"
        );
        Ok(SettledPosition {
            position,
            settlement,
            amount,
            new_balance,
        })
    }
}
