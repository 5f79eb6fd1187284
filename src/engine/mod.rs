//! Mining platform engine.
//!
//! The engine owns the store and runs every financial operation as one
//! unit of work: lock the rows involved, validate, mutate, append to the
//! transaction log, commit. Any failure drops the unit and nothing is
//! applied. Also supports replaying an async stream of operations.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::ledger::Ledger;
use crate::locks::{LockToken, TtlLocks};
use crate::model::{
    IncomeKind, MachineType, NewUser, OwnedMachine, Operation, TransactionKind, TransactionRecord,
    TxId, TxStatus, User, UserId,
};
use crate::store::Store;

mod error;
pub use error::{EngineError, ErrorClass, FinanceError, MachineError, RegistrationError};

mod finance;
mod machine;
mod referral;
mod user;
pub use machine::PurchaseReceipt;
pub use referral::Payout;

/// The platform engine.
///
/// Safe to share between tasks; operations on the same user serialize on
/// that user's ledger row, operations on different users run independently.
pub struct Engine {
    store: Store,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    locks: TtlLocks,
    /// Latest withdrawal per username and the lock acquisition it holds.
    withdrawals_in_flight: Mutex<HashMap<String, (TxId, LockToken)>>,
}

/// Public API
impl Engine {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Store::new(&config.machines, clock.clone()),
            config: Arc::new(config),
            locks: TtlLocks::new(clock.clone()),
            withdrawals_in_flight: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the engine with the given operation stream
    pub async fn run(&self, mut stream: impl Stream<Item = Operation> + Unpin) {
        while let Some(op) = stream.next().await {
            // a failed operation must not stop the replay
            let _ = self.apply(op).await;
        }
    }

    /// Apply a single operation, resolving usernames and coins
    pub async fn apply(&self, op: Operation) -> Result<(), EngineError> {
        let label = op.label();
        let username = op.user().to_string();
        let result = self.dispatch(op).await;
        Self::log_result(label, &username, &result);
        result
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.store.user(id)
    }

    pub fn user_by_name(&self, username: &str) -> Option<User> {
        self.store.user_by_name(username)
    }

    /// All users in id order.
    pub fn users(&self) -> Vec<User> {
        self.store.users()
    }

    pub fn master_of(&self, user: UserId) -> Option<UserId> {
        self.store.master_of(user)
    }

    /// Direct referrals of `user`, in registration order.
    pub fn referrals_of(&self, user: UserId) -> Vec<UserId> {
        self.store.referrals_of(user)
    }

    /// Snapshot of the user's ledger.
    pub async fn ledger(&self, user: UserId) -> Result<Ledger, EngineError> {
        self.store
            .ledger(user)
            .await
            .ok_or_else(|| Self::finance_unavailable(user))
    }

    pub async fn deposits(&self, user: UserId) -> Result<Vec<TransactionRecord>, EngineError> {
        self.records_where(user, |kind| matches!(kind, TransactionKind::Deposit { .. }))
            .await
    }

    pub async fn withdrawals(&self, user: UserId) -> Result<Vec<TransactionRecord>, EngineError> {
        self.records_where(user, |kind| matches!(kind, TransactionKind::Withdrawal { .. }))
            .await
    }

    pub async fn incomes(&self, user: UserId) -> Result<Vec<TransactionRecord>, EngineError> {
        self.records_where(user, |kind| matches!(kind, TransactionKind::Income { .. }))
            .await
    }

    /// Incomes of one sub-type.
    pub async fn incomes_of_kind(
        &self,
        user: UserId,
        kind: IncomeKind,
    ) -> Result<Vec<TransactionRecord>, EngineError> {
        self.records_where(
            user,
            |k| matches!(k, TransactionKind::Income { kind: found, .. } if *found == kind),
        )
        .await
    }

    /// The machine catalog.
    pub fn machines(&self) -> &[MachineType] {
        self.store.catalog()
    }

    pub async fn owned_machines(&self, user: UserId) -> Vec<OwnedMachine> {
        self.store.owned_machines(user).await
    }

    /// Every user with a committed ledger snapshot, in user id order.
    pub async fn ledgers(&self) -> Vec<(User, Ledger)> {
        let mut out = Vec::new();
        for user in self.store.users() {
            if let Some(ledger) = self.store.ledger(user.id).await {
                out.push((user, ledger));
            }
        }
        out
    }
}

/// Private API
impl Engine {
    async fn dispatch(&self, op: Operation) -> Result<(), EngineError> {
        match op {
            Operation::Register {
                username,
                email,
                master,
            } => {
                let code = match master {
                    Some(master) => Some(self.resolve(&master)?.affiliate_code),
                    None => None,
                };
                self.register(NewUser { username, email }, code.as_deref())?;
            }
            Operation::Deposit {
                user,
                amount,
                platform,
            } => {
                let user = self.resolve(&user)?;
                let tx = self.deposit(user.id, amount, &platform).await?;
                self.advance_transaction(tx, TxStatus::Completed).await?;
            }
            Operation::Bonus { user, amount } => {
                let user = self.resolve(&user)?;
                self.grant_bonus(user.id, amount).await?;
            }
            Operation::Purchase { user, coin } => {
                let user = self.resolve(&user)?;
                self.purchase(user.id, &coin).await?;
            }
            Operation::Activate { user, coin } => {
                let user = self.resolve(&user)?;
                let machine = self.owned_machine_by_coin(user.id, &coin)?;
                self.activate(user.id, machine).await?;
            }
            Operation::Collect { user, coin } => {
                let user = self.resolve(&user)?;
                let machine = self.owned_machine_by_coin(user.id, &coin)?;
                self.collect_commission(user.id, machine).await?;
            }
            Operation::ChangeWallet { user, wallet } => {
                let user = self.resolve(&user)?;
                self.change_wallet(user.id, &wallet).await?;
            }
            Operation::Withdraw { user, amount } => {
                let user = self.resolve(&user)?;
                self.withdraw(user.id, amount).await?;
            }
        }
        Ok(())
    }

    fn resolve(&self, username: &str) -> Result<User, EngineError> {
        self.store
            .user_by_name(username)
            .ok_or_else(|| EngineError::UnknownUser(username.to_string()))
    }

    /// Small helper to log `apply` results
    fn log_result<T>(op: &str, user: &str, result: &Result<T, EngineError>) {
        match result {
            Ok(_) => info!(user = %user, "{op} applied"),
            Err(e) if e.is_integrity_fault() => {
                error!(user = %user, code = e.code(), reason = %e, "{op} failed")
            }
            Err(e) => info!(user = %user, code = e.code(), reason = %e, "{op} skipped"),
        }
    }

    fn finance_unavailable(user: UserId) -> EngineError {
        error!(user, "ledger row missing");
        FinanceError::FinanceUnavailable(user).into()
    }

    async fn records_where(
        &self,
        user: UserId,
        keep: impl Fn(&TransactionKind) -> bool,
    ) -> Result<Vec<TransactionRecord>, EngineError> {
        let ledger = self.ledger(user).await?;
        Ok(self
            .store
            .transactions_for(ledger.id)
            .into_iter()
            .filter(|record| keep(&record.kind))
            .collect())
    }
}
