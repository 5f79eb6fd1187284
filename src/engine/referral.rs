//! Multi-level referral payouts.

use tracing::{debug, error};

use super::{Engine, EngineError, FinanceError};
use crate::model::{IncomeKind, TransactionKind, TxStatus, UserId};
use crate::store::UnitOfWork;
use crate::Amount;

/// One credited ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    pub level: usize,
    pub master: UserId,
    pub amount: Amount,
}

impl Engine {
    /// Pay each ancestor of `purchaser` its share of `price`, inside the
    /// caller's unit of work.
    ///
    /// Walks up one master per level, at most one level per entry of the
    /// referral table, and stops early at the root of the chain. A missing
    /// ancestor ledger fails the whole unit.
    pub(super) async fn distribute(
        &self,
        uow: &mut UnitOfWork<'_>,
        purchaser: UserId,
        price: Amount,
    ) -> Result<Vec<Payout>, EngineError> {
        let mut payouts = Vec::new();
        let mut current = purchaser;

        for (level, pct) in self.config.referral_percentages.iter().enumerate() {
            let Some(master) = self.store.master_of(current) else {
                break;
            };

            let ledger = uow.lock_ledger(master).await.ok_or_else(|| {
                error!(master, purchaser, "master ledger row missing");
                FinanceError::MasterFinanceUnavailable(master)
            })?;

            let amount = price.share(*pct);
            if !amount.is_zero() {
                if !uow.ledger_mut(ledger).credit(amount) {
                    return Err(FinanceError::InvalidAmount(amount).into());
                }
                uow.append(
                    ledger,
                    TransactionKind::income(IncomeKind::Affiliate),
                    amount,
                    TxStatus::Completed,
                )
                .ok_or(FinanceError::InvalidAmount(amount))?;
            }

            debug!(level = level + 1, master, purchaser, amount = %amount, "referral payout");
            payouts.push(Payout {
                level: level + 1,
                master,
                amount,
            });
            current = master;
        }

        Ok(payouts)
    }
}
