//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// In-memory implementation of the balance seam, used by the demo binary and the tests.
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use super::{BalanceProvider, LedgerError};

/// Thread-safe account table.
#[derive(Debug, Default)]
pub struct InMemoryBalances {
    accounts: RwLock<HashMap<Uuid, Decimal>>,
    initial_balance: Decimal,
}

impl InMemoryBalances {
    /// # Arguments
    ///
    /// * `initial_balance` - Amount granted to every account opened with `open_account`
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            initial_balance,
        }
    }

    /// Opens `user_id` with the initial balance. Existing accounts are left untouched.
    pub fn open_account(&self, user_id: Uuid) -> Decimal {
        *self
            .accounts
            .write()
            .entry(user_id)
            .or_insert(self.initial_balance)
    }

    /// Overwrites the balance of `user_id`.
    pub fn set_balance(&self, user_id: Uuid, amount: Decimal) {
        self.accounts.write().insert(user_id, amount);
    }
}

impl BalanceProvider for InMemoryBalances {
    fn balance(&self, user_id: Uuid) -> Decimal {
        self.accounts
            .read()
            .get(&user_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn debit(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount.is_sign_negative() {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut accounts = self.accounts.write();
        let available = accounts.get(&user_id).copied().unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                user_id,
                required: amount,
                available,
            });
        }
        let updated = available - amount;
        accounts.insert(user_id, updated);
        debug!(%user_id, %amount, balance = %updated, "account debited");
        Ok(updated)
    }

    fn credit(&self, user_id: Uuid, amount: Decimal) -> Result<Decimal, LedgerError> {
        if amount.is_sign_negative() {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut accounts = self.accounts.write();
        let balance = accounts.entry(user_id).or_insert(Decimal::ZERO);
        *balance += amount;
        debug!(%user_id, %amount, balance = %*balance, "account credited");
        Ok(*balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_account_is_idempotent() {
        let balances = InMemoryBalances::new(dec!(10000));
        let user = Uuid::new_v4();

        assert_eq!(balances.balance(user), Decimal::ZERO);
        assert_eq!(balances.open_account(user), dec!(10000));
        balances.debit(user, dec!(100)).unwrap();
        assert_eq!(balances.open_account(user), dec!(9900));
    }

    #[test]
    fn test_debit_never_overdraws() {
        let balances = InMemoryBalances::new(dec!(50));
        let user = Uuid::new_v4();
        balances.open_account(user);

        assert_eq!(
            balances.debit(user, dec!(55)),
            Err(LedgerError::InsufficientBalance {
                user_id: user,
                required: dec!(55),
                available: dec!(50),
            })
        );
        assert_eq!(balances.balance(user), dec!(50));
        assert_eq!(balances.debit(user, dec!(50)), Ok(Decimal::ZERO));
    }

    #[test]
    fn test_credit_creates_account() {
        let balances = InMemoryBalances::new(dec!(0));
        let user = Uuid::new_v4();

        assert_eq!(balances.credit(user, dec!(55)), Ok(dec!(55)));
        assert_eq!(
            balances.credit(user, dec!(-1)),
            Err(LedgerError::InvalidAmount(dec!(-1)))
        );
    }
}
