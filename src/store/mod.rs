//! In-memory relational store.
//!
//! Tables mirror the persisted layout: `user`, `master_referral`, `finance`,
//! `machine`, `purchased_machine` and the transaction log. Finance and
//! purchased machine rows sit behind their own async mutex so that a
//! [`UnitOfWork`] can hold them for the lifetime of an operation, the way a
//! `SELECT ... FOR UPDATE` row lock would.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::MachineSeed;
use crate::ledger::Ledger;
use crate::model::{
    LedgerId, MachineType, MachineTypeId, NewUser, OwnedMachine, OwnedMachineId,
    TransactionRecord, TxId, User, UserId,
};
use crate::Amount;

mod uow;
pub use uow::{LedgerRef, MachineRef, UnitOfWork};

/// Uniqueness violation while inserting a user.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InsertUserError {
    #[error("username '{0}' is taken")]
    UsernameTaken(String),
    #[error("email '{0}' is taken")]
    EmailTaken(String),
    #[error("affiliate code '{0}' is taken")]
    AffiliateCodeTaken(String),
}

/// Everything needed to insert a user together with its finance row.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub new_user: NewUser,
    pub affiliate_code: String,
    pub master: Option<UserId>,
    pub is_admin: bool,
    pub is_active: bool,
    pub opening_balance: Amount,
}

#[derive(Default)]
struct UserTable {
    rows: HashMap<UserId, User>,
    by_name: HashMap<String, UserId>,
    by_email: HashMap<String, UserId>,
    by_code: HashMap<String, UserId>,
    /// referral -> master
    masters: HashMap<UserId, UserId>,
    /// master -> direct referrals, in registration order
    referrals: HashMap<UserId, Vec<UserId>>,
}

#[derive(Default)]
struct LedgerTable {
    rows: HashMap<UserId, Arc<Mutex<Ledger>>>,
    owners: HashMap<LedgerId, UserId>,
}

#[derive(Default)]
struct MachineTable {
    rows: HashMap<OwnedMachineId, Arc<Mutex<OwnedMachine>>>,
    by_owner: HashMap<(UserId, MachineTypeId), OwnedMachineId>,
}

#[derive(Default)]
struct TransactionTable {
    rows: Vec<TransactionRecord>,
    by_id: HashMap<TxId, usize>,
    by_ledger: HashMap<LedgerId, Vec<usize>>,
}

#[derive(Default)]
struct Sequences {
    user: AtomicU64,
    ledger: AtomicU64,
    machine: AtomicU64,
    tx: AtomicU64,
}

impl Sequences {
    fn next(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct Store {
    users: RwLock<UserTable>,
    ledgers: RwLock<LedgerTable>,
    catalog: Vec<MachineType>,
    machines: RwLock<MachineTable>,
    transactions: RwLock<TransactionTable>,
    ids: Sequences,
    clock: Arc<dyn Clock>,
}

impl Store {
    pub fn new(seeds: &[MachineSeed], clock: Arc<dyn Clock>) -> Self {
        let catalog = seeds
            .iter()
            .zip(1..)
            .map(|(seed, id)| MachineType {
                id,
                title: seed.title.clone(),
                coin: seed.coin.clone(),
                price: seed.price,
                income: seed.income,
            })
            .collect();

        Self {
            users: RwLock::default(),
            ledgers: RwLock::default(),
            catalog,
            machines: RwLock::default(),
            transactions: RwLock::default(),
            ids: Sequences::default(),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Start a unit of work. Dropping it without [`UnitOfWork::commit`]
    /// discards everything it staged.
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self)
    }

    // user / master_referral

    /// Insert a user, its finance row and its master edge in one step.
    pub fn insert_user(&self, row: UserRow) -> Result<User, InsertUserError> {
        let mut users = self.users.write();

        if users.by_name.contains_key(&row.new_user.username) {
            return Err(InsertUserError::UsernameTaken(row.new_user.username));
        }
        if users.by_email.contains_key(&row.new_user.email) {
            return Err(InsertUserError::EmailTaken(row.new_user.email));
        }
        if users.by_code.contains_key(&row.affiliate_code) {
            return Err(InsertUserError::AffiliateCodeTaken(row.affiliate_code));
        }

        let now = self.now();
        let user = User {
            id: Sequences::next(&self.ids.user),
            username: row.new_user.username,
            email: row.new_user.email,
            affiliate_code: row.affiliate_code,
            is_active: row.is_active,
            is_admin: row.is_admin,
            created_at: now,
            updated_at: now,
        };

        users.by_name.insert(user.username.clone(), user.id);
        users.by_email.insert(user.email.clone(), user.id);
        users.by_code.insert(user.affiliate_code.clone(), user.id);
        if let Some(master) = row.master {
            users.masters.insert(user.id, master);
            users.referrals.entry(master).or_default().push(user.id);
        }
        users.rows.insert(user.id, user.clone());

        let ledger_id = Sequences::next(&self.ids.ledger);
        let ledger = Ledger::new(ledger_id, user.id).with_balance(row.opening_balance);
        let mut ledgers = self.ledgers.write();
        ledgers.owners.insert(ledger_id, user.id);
        ledgers.rows.insert(user.id, Arc::new(Mutex::new(ledger)));

        Ok(user)
    }

    pub fn set_user_active(&self, id: UserId, active: bool) -> Option<User> {
        let now = self.now();
        let mut users = self.users.write();
        let user = users.rows.get_mut(&id)?;
        user.is_active = active;
        user.updated_at = now;
        Some(user.clone())
    }

    pub fn user_count(&self) -> usize {
        self.users.read().rows.len()
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.users.read().rows.get(&id).cloned()
    }

    pub fn user_by_name(&self, username: &str) -> Option<User> {
        let users = self.users.read();
        users
            .by_name
            .get(username)
            .and_then(|id| users.rows.get(id))
            .cloned()
    }

    pub fn user_by_affiliate_code(&self, code: &str) -> Option<User> {
        let users = self.users.read();
        users
            .by_code
            .get(code)
            .and_then(|id| users.rows.get(id))
            .cloned()
    }

    pub fn affiliate_code_exists(&self, code: &str) -> bool {
        self.users.read().by_code.contains_key(code)
    }

    /// All users in id order.
    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<_> = self.users.read().rows.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn master_of(&self, id: UserId) -> Option<UserId> {
        self.users.read().masters.get(&id).copied()
    }

    pub fn referrals_of(&self, id: UserId) -> Vec<UserId> {
        self.users
            .read()
            .referrals
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    // finance

    fn ledger_row(&self, user: UserId) -> Option<Arc<Mutex<Ledger>>> {
        self.ledgers.read().rows.get(&user).cloned()
    }

    pub fn ledger_owner(&self, ledger: LedgerId) -> Option<UserId> {
        self.ledgers.read().owners.get(&ledger).copied()
    }

    /// Committed state of a user's ledger. Waits for any writer holding the row.
    pub async fn ledger(&self, user: UserId) -> Option<Ledger> {
        let row = self.ledger_row(user)?;
        let ledger = row.lock().await;
        Some(ledger.clone())
    }

    #[cfg(test)]
    pub(crate) fn remove_ledger(&self, user: UserId) {
        let mut ledgers = self.ledgers.write();
        ledgers.rows.remove(&user);
        ledgers.owners.retain(|_, owner| *owner != user);
    }

    // machine

    pub fn catalog(&self) -> &[MachineType] {
        &self.catalog
    }

    pub fn machine_type(&self, id: MachineTypeId) -> Option<&MachineType> {
        self.catalog.iter().find(|m| m.id == id)
    }

    pub fn machine_by_coin(&self, coin: &str) -> Option<&MachineType> {
        self.catalog.iter().find(|m| m.coin.eq_ignore_ascii_case(coin))
    }

    // purchased_machine

    fn machine_row(&self, id: OwnedMachineId) -> Option<Arc<Mutex<OwnedMachine>>> {
        self.machines.read().rows.get(&id).cloned()
    }

    pub fn owned_machine_id(&self, user: UserId, machine_type: MachineTypeId) -> Option<OwnedMachineId> {
        self.machines
            .read()
            .by_owner
            .get(&(user, machine_type))
            .copied()
    }

    /// Committed machines of a user, ordered by id.
    pub async fn owned_machines(&self, user: UserId) -> Vec<OwnedMachine> {
        let rows: Vec<_> = {
            let machines = self.machines.read();
            let mut ids: Vec<_> = machines
                .by_owner
                .iter()
                .filter(|((owner, _), _)| *owner == user)
                .map(|(_, id)| *id)
                .collect();
            ids.sort_unstable();
            ids.iter()
                .filter_map(|id| machines.rows.get(id).cloned())
                .collect()
        };

        let mut owned = Vec::with_capacity(rows.len());
        for row in rows {
            owned.push(row.lock().await.clone());
        }
        owned
    }

    // transaction log

    pub fn transaction(&self, id: TxId) -> Option<TransactionRecord> {
        let table = self.transactions.read();
        table.by_id.get(&id).map(|idx| table.rows[*idx].clone())
    }

    /// Records of one ledger in insertion order.
    pub fn transactions_for(&self, ledger: LedgerId) -> Vec<TransactionRecord> {
        let table = self.transactions.read();
        table
            .by_ledger
            .get(&ledger)
            .map(|idxs| idxs.iter().map(|idx| table.rows[*idx].clone()).collect())
            .unwrap_or_default()
    }
}
