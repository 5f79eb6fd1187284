//! Machine ownership state machine and commission collection.

use tracing::{debug, info};

use super::referral::Payout;
use super::{Engine, EngineError, FinanceError, MachineError};
use crate::Amount;
use crate::model::{OwnedMachineId, TransactionKind, TxStatus, UserId};

/// Result of a successful purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub machine: OwnedMachineId,
    pub price: Amount,
    pub payouts: Vec<Payout>,
}

impl Engine {
    /// Buy the machine mining `coin`.
    ///
    /// Debit, ownership row and the whole referral cascade commit together.
    pub async fn purchase(&self, user: UserId, coin: &str) -> Result<PurchaseReceipt, EngineError> {
        let machine = self
            .store
            .machine_by_coin(coin)
            .ok_or_else(|| MachineError::MachineNotFound(coin.to_string()))?;

        let mut uow = self.store.begin();
        let ledger = uow
            .lock_ledger(user)
            .await
            .ok_or_else(|| Self::finance_unavailable(user))?;

        // checked under the purchaser's ledger lock, so a racing purchase
        // of the same coin sees the first one's row
        if uow.owns(user, machine.id) {
            return Err(MachineError::MachineAlreadyOwned {
                user,
                coin: machine.coin.clone(),
            }
            .into());
        }

        let balance = uow.ledger(ledger).balance;
        if !uow.ledger_mut(ledger).debit(machine.price) {
            return Err(FinanceError::InsufficientBalance {
                user,
                balance,
                required: machine.price,
            }
            .into());
        }

        let owned = uow.insert_machine(user, machine.id);
        let payouts = self.distribute(&mut uow, user, machine.price).await?;
        uow.commit();

        info!(user, coin = %machine.coin, price = %machine.price, machine = owned, "machine purchased");
        Ok(PurchaseReceipt {
            machine: owned,
            price: machine.price,
            payouts,
        })
    }

    /// Start a mining cycle. Activating an active machine is a no-op.
    pub async fn activate(&self, user: UserId, machine: OwnedMachineId) -> Result<(), EngineError> {
        let mut uow = self.store.begin();
        let row = uow.lock_machine(machine).await;
        let row = row
            .filter(|r| uow.machine(*r).user_id == user)
            .ok_or(MachineError::MachineNotOwned(machine))?;

        if uow.machine(row).activated_time.is_some() {
            debug!(user, machine, "machine already active");
            return Ok(());
        }

        uow.machine_mut(row).activated_time = Some(self.clock.now());
        uow.commit();

        info!(user, machine, "machine activated");
        Ok(())
    }

    /// Collect the commission of an active machine whose cooldown has
    /// elapsed, and return it to the inactive state.
    pub async fn collect_commission(
        &self,
        user: UserId,
        machine: OwnedMachineId,
    ) -> Result<Amount, EngineError> {
        let mut uow = self.store.begin();
        let row = uow.lock_machine(machine).await;
        let row = row
            .filter(|r| uow.machine(*r).user_id == user)
            .ok_or(MachineError::MachineNotOwned(machine))?;

        let owned = uow.machine(row);
        let activated_time = owned
            .activated_time
            .ok_or(MachineError::MachineNotActivated(machine))?;

        let elapsed = self.clock.now() - activated_time;
        let cooldown = self.config.commission_cooldown();
        if elapsed < cooldown {
            return Err(MachineError::CommissionCooldownNotElapsed {
                machine,
                remaining_secs: (cooldown - elapsed).num_seconds(),
            }
            .into());
        }

        let machine_type = self
            .store
            .machine_type(owned.machine_type)
            .ok_or_else(|| MachineError::MachineNotFound(owned.machine_type.to_string()))?;

        let ledger = uow
            .lock_ledger(user)
            .await
            .ok_or_else(|| Self::finance_unavailable(user))?;
        if !uow.ledger_mut(ledger).credit(machine_type.income) {
            return Err(FinanceError::InvalidAmount(machine_type.income).into());
        }
        uow.append(
            ledger,
            TransactionKind::commission(&machine_type.coin),
            machine_type.income,
            TxStatus::Completed,
        )
        .ok_or(FinanceError::InvalidAmount(machine_type.income))?;
        uow.machine_mut(row).activated_time = None;
        uow.commit();

        info!(user, machine, coin = %machine_type.coin, income = %machine_type.income, "commission collected");
        Ok(machine_type.income)
    }

    /// The user's purchased machine mining `coin`.
    pub fn owned_machine_by_coin(&self, user: UserId, coin: &str) -> Result<OwnedMachineId, EngineError> {
        let machine = self
            .store
            .machine_by_coin(coin)
            .ok_or_else(|| MachineError::MachineNotFound(coin.to_string()))?;
        self.store
            .owned_machine_id(user, machine.id)
            .ok_or_else(|| {
                MachineError::CoinNotOwned {
                    user,
                    coin: machine.coin.clone(),
                }
                .into()
            })
    }
}
