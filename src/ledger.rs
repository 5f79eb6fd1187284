use serde::Serialize;

use crate::Amount;
use crate::model::{LedgerId, UserId};

/// A user's finance row: spendable balance, running income counters and
/// the withdrawal wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ledger {
    pub id: LedgerId,
    pub user_id: UserId,
    pub balance: Amount,
    pub income: Amount,
    pub affiliate_income: Amount,
    pub wallet: Option<String>,
}

impl Ledger {
    pub fn new(id: LedgerId, user_id: UserId) -> Self {
        Self {
            id,
            user_id,
            balance: Amount::ZERO,
            income: Amount::ZERO,
            affiliate_income: Amount::ZERO,
            wallet: None,
        }
    }

    pub fn with_balance(mut self, balance: Amount) -> Self {
        self.balance = balance;
        self
    }

    /// Returns `false` (and leaves the balance untouched) on overflow.
    pub fn credit(&mut self, amount: Amount) -> bool {
        match self.balance.checked_add(amount) {
            Some(balance) => {
                self.balance = balance;
                true
            }
            None => false,
        }
    }

    /// Returns `false` (and leaves the balance untouched) when funds are short.
    pub fn debit(&mut self, amount: Amount) -> bool {
        match self.balance.checked_sub(amount) {
            Some(balance) => {
                self.balance = balance;
                true
            }
            None => false,
        }
    }
}
