//! Deposits, bonuses, wallets and withdrawals.

use tracing::{debug, info, warn};

use super::{Engine, EngineError, FinanceError};
use crate::Amount;
use crate::locks::{LockToken, withdrawal_lock_key};
use crate::model::{IncomeKind, TransactionKind, TxId, TxStatus, UserId};

/// Public API
impl Engine {
    /// Record a deposit awaiting confirmation from `platform`.
    /// The balance is only credited once the record completes.
    pub async fn deposit(
        &self,
        user: UserId,
        amount: Amount,
        platform: &str,
    ) -> Result<TxId, EngineError> {
        if amount.is_zero() {
            return Err(FinanceError::InvalidAmount(amount).into());
        }

        let mut uow = self.store.begin();
        let ledger = uow
            .lock_ledger(user)
            .await
            .ok_or_else(|| Self::finance_unavailable(user))?;
        let tx = uow.append(
            ledger,
            TransactionKind::Deposit {
                platform: platform.to_string(),
            },
            amount,
            TxStatus::New,
        )
        .ok_or(FinanceError::InvalidAmount(amount))?;
        uow.commit();

        info!(user, tx, amount = %amount, platform, "deposit recorded");
        Ok(tx)
    }

    /// Move a transaction record forward.
    ///
    /// A deposit reaching `Completed` credits its amount to the balance in
    /// the same unit. A withdrawal reaching `Completed` frees the user's
    /// withdrawal lock, unless a newer withdrawal has taken it since.
    pub async fn advance_transaction(&self, tx: TxId, status: TxStatus) -> Result<(), EngineError> {
        let record = self
            .store
            .transaction(tx)
            .ok_or(FinanceError::TransactionNotFound(tx))?;
        let user = self
            .store
            .ledger_owner(record.ledger_id)
            .ok_or(FinanceError::TransactionNotFound(tx))?;

        let mut uow = self.store.begin();
        let ledger = uow
            .lock_ledger(user)
            .await
            .ok_or_else(|| Self::finance_unavailable(user))?;

        // re-read under the row lock, a concurrent advance may have won
        let record = uow
            .transaction(tx)
            .ok_or(FinanceError::TransactionNotFound(tx))?;
        if !record.status.can_advance_to(status) {
            return Err(FinanceError::InvalidStatusTransition {
                tx,
                from: record.status,
                to: status,
            }
            .into());
        }

        let completes = status == TxStatus::Completed;
        if completes && matches!(record.kind, TransactionKind::Deposit { .. })
            && !uow.ledger_mut(ledger).credit(record.amount)
        {
            return Err(FinanceError::InvalidAmount(record.amount).into());
        }
        uow.set_status(tx, status);
        uow.commit();

        if completes && matches!(record.kind, TransactionKind::Withdrawal { .. }) {
            if let Some(owner) = self.store.user(user) {
                self.release_withdrawal_lock(&owner.username, tx);
            }
        }

        info!(user, tx, kind = record.kind.label(), status = ?status, "transaction advanced");
        Ok(())
    }

    /// Credit a platform bonus.
    pub async fn grant_bonus(&self, user: UserId, amount: Amount) -> Result<TxId, EngineError> {
        if amount.is_zero() {
            return Err(FinanceError::InvalidAmount(amount).into());
        }

        let mut uow = self.store.begin();
        let ledger = uow
            .lock_ledger(user)
            .await
            .ok_or_else(|| Self::finance_unavailable(user))?;
        if !uow.ledger_mut(ledger).credit(amount) {
            return Err(FinanceError::InvalidAmount(amount).into());
        }
        let tx = uow.append(
            ledger,
            TransactionKind::income(IncomeKind::Bonus),
            amount,
            TxStatus::Completed,
        )
        .ok_or(FinanceError::InvalidAmount(amount))?;
        uow.commit();

        info!(user, tx, amount = %amount, "bonus granted");
        Ok(tx)
    }

    /// Set the wallet withdrawals are paid to.
    pub async fn change_wallet(&self, user: UserId, address: &str) -> Result<(), EngineError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(FinanceError::InvalidWallet.into());
        }

        let mut uow = self.store.begin();
        let ledger = uow
            .lock_ledger(user)
            .await
            .ok_or_else(|| Self::finance_unavailable(user))?;
        uow.ledger_mut(ledger).wallet = Some(address.to_string());
        uow.commit();

        info!(user, wallet = address, "wallet changed");
        Ok(())
    }

    /// Request a withdrawal to the configured wallet.
    ///
    /// At most one withdrawal per user is in flight: the request takes the
    /// user's withdrawal lock, which is held until the withdrawal completes
    /// or the lock expires.
    pub async fn withdraw(&self, user: UserId, amount: Amount) -> Result<TxId, EngineError> {
        let owner = self
            .store
            .user(user)
            .ok_or_else(|| EngineError::UnknownUser(user.to_string()))?;
        let purged = self.locks.purge_expired();
        if purged > 0 {
            debug!(purged, "expired locks dropped");
        }

        let key = withdrawal_lock_key(&owner.username);
        let Some(token) = self.locks.try_acquire(&key, self.config.withdrawal_lock_ttl()) else {
            let remaining = self.locks.remaining(&key).map(|d| d.num_seconds());
            warn!(user, remaining_secs = ?remaining, "withdrawal already pending");
            return Err(FinanceError::WithdrawalLockExists(owner.username).into());
        };

        let result = self.debit_withdrawal(user, &owner.username, amount, token).await;
        if result.is_err() {
            self.locks.release(&key, token);
        }
        result
    }
}

/// Private API
impl Engine {
    async fn debit_withdrawal(
        &self,
        user: UserId,
        username: &str,
        amount: Amount,
        token: LockToken,
    ) -> Result<TxId, EngineError> {
        let mut uow = self.store.begin();
        let ledger = uow
            .lock_ledger(user)
            .await
            .ok_or_else(|| Self::finance_unavailable(user))?;

        let Some(wallet) = uow.ledger(ledger).wallet.clone() else {
            return Err(FinanceError::NoWalletConfigured(user).into());
        };
        if amount.is_zero() {
            return Err(FinanceError::InvalidAmount(amount).into());
        }
        let balance = uow.ledger(ledger).balance;
        if !uow.ledger_mut(ledger).debit(amount) {
            return Err(FinanceError::InsufficientBalance {
                user,
                balance,
                required: amount,
            }
            .into());
        }

        let tx = uow.append(
            ledger,
            TransactionKind::Withdrawal {
                wallet: wallet.clone(),
            },
            amount,
            TxStatus::New,
        )
        .ok_or(FinanceError::InvalidAmount(amount))?;
        // tracked before the record becomes visible
        self.withdrawals_in_flight
            .lock()
            .insert(username.to_string(), (tx, token));
        uow.commit();

        info!(user, tx, amount = %amount, wallet = %wallet, "withdrawal requested");
        Ok(tx)
    }

    /// Free the user's withdrawal lock if `tx` is the withdrawal holding it.
    fn release_withdrawal_lock(&self, username: &str, tx: TxId) {
        let mut in_flight = self.withdrawals_in_flight.lock();
        let Some(&(latest, token)) = in_flight.get(username) else {
            return;
        };
        if latest != tx {
            debug!(username, tx, latest, "stale withdrawal completed, lock kept");
            return;
        }
        in_flight.remove(username);
        self.locks.release(&withdrawal_lock_key(username), token);
    }
}
