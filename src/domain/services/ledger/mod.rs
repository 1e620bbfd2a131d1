use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub mod balances;
pub mod position_ledger;

pub use self::balances::InMemoryBalances;
pub use self::position_ledger::{PositionLedger, SettledPosition};

/// Cash accounts owned outside the trading core.
///
/// The ledger debits buyers and credits sellers and cash-outs through this seam.
/// Implementations must be thread-safe since every instrument lock shares one provider.
pub trait BalanceProvider: Send + Sync {
    /// Current balance of `user_id`; unknown users have a zero balance.
    fn balance(&self, user_id: Uuid) -> Decimal;

    /// Removes `amount` from the account.
    ///
    /// # Returns
    /// * `Ok(Decimal)` - The balance after the debit
    /// * `Err(LedgerError::InsufficientBalance)` - If the account cannot cover it; nothing changes
    fn debit(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, LedgerError>;

    /// Adds `amount` to the account and returns the new balance.
    fn credit(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, LedgerError>;
}

/// Errors raised by balances and the position ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient balance for user {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        user_id: Uuid,
        required: Decimal,
        available: Decimal,
    },

    /// The buyer already holds the one contract allowed per instrument.
    #[error("User {user_id} already holds a position on instrument {instrument_id}")]
    PositionLimit { user_id: Uuid, instrument_id: Uuid },

    #[error("User {user_id} holds no position on instrument {instrument_id}")]
    PositionNotFound { user_id: Uuid, instrument_id: Uuid },

    #[error("Invalid ledger amount: {0}")]
    InvalidAmount(Decimal),

    /// The seller's account refused the proceeds of a trade. The buyer's debit was reversed.
    #[error("Could not credit seller {user_id}: {reason}")]
    CreditFailed { user_id: Uuid, reason: String },
}

impl LedgerError {
    /// True when the selling side of a trade caused the failure.
    #[inline]
    pub fn is_seller_side(&self) -> bool {
        matches!(self, Self::CreditFailed { .. })
    }
}

#[cfg(test)]
use mockall::*;

#[cfg(test)]
mock! {
    pub BalanceProvider {}

    impl BalanceProvider for BalanceProvider {
        fn balance(&self, user_id: uuid::Uuid) -> rust_decimal::Decimal;

        fn debit(&self, user_id: uuid::Uuid, amount: rust_decimal::Decimal) -> Result<rust_decimal::Decimal, LedgerError>;

        fn credit(&self, user_id: uuid::Uuid, amount: rust_decimal::Decimal) -> Result<rust_decimal::Decimal, LedgerError>;
    }
}
