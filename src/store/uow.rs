use tokio::sync::OwnedMutexGuard;

use super::{Sequences, Store};
use crate::Amount;
use crate::ledger::Ledger;
use crate::model::{
    IncomeKind, MachineTypeId, OwnedMachine, OwnedMachineId, TransactionKind,
    TransactionRecord, TxId, TxStatus, UserId,
};

/// Handle to a ledger row locked by a [`UnitOfWork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerRef(usize);

/// Handle to a purchased machine row locked by a [`UnitOfWork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineRef(usize);

/// A row held exclusively, with the uncommitted copy being edited.
struct Locked<T> {
    guard: OwnedMutexGuard<T>,
    draft: T,
}

impl<T: Clone> Locked<T> {
    fn new(guard: OwnedMutexGuard<T>) -> Self {
        let draft = guard.clone();
        Self { guard, draft }
    }

    fn write_back(mut self) {
        *self.guard = self.draft;
    }
}

/// One atomic unit: row locks plus staged writes.
///
/// Row locks are held until the unit is committed or dropped. Nothing staged
/// is visible to other readers before [`commit`](Self::commit); dropping the
/// unit rolls everything back.
pub struct UnitOfWork<'s> {
    store: &'s Store,
    ledgers: Vec<Locked<Ledger>>,
    machines: Vec<Locked<OwnedMachine>>,
    new_machines: Vec<OwnedMachine>,
    records: Vec<TransactionRecord>,
    status_changes: Vec<(TxId, TxStatus)>,
}

impl<'s> UnitOfWork<'s> {
    pub(super) fn new(store: &'s Store) -> Self {
        Self {
            store,
            ledgers: Vec::new(),
            machines: Vec::new(),
            new_machines: Vec::new(),
            records: Vec::new(),
            status_changes: Vec::new(),
        }
    }

    pub fn store(&self) -> &'s Store {
        self.store
    }

    /// Lock a user's ledger row for the rest of this unit.
    /// Returns `None` if the user has no ledger.
    pub async fn lock_ledger(&mut self, user: UserId) -> Option<LedgerRef> {
        if let Some(idx) = self.ledgers.iter().position(|l| l.draft.user_id == user) {
            return Some(LedgerRef(idx));
        }

        let row = self.store.ledger_row(user)?;
        let guard = row.lock_owned().await;
        self.ledgers.push(Locked::new(guard));
        Some(LedgerRef(self.ledgers.len() - 1))
    }

    pub fn ledger(&self, r: LedgerRef) -> &Ledger {
        &self.ledgers[r.0].draft
    }

    pub fn ledger_mut(&mut self, r: LedgerRef) -> &mut Ledger {
        &mut self.ledgers[r.0].draft
    }

    /// Lock a purchased machine row for the rest of this unit.
    pub async fn lock_machine(&mut self, id: OwnedMachineId) -> Option<MachineRef> {
        if let Some(idx) = self.machines.iter().position(|m| m.draft.id == id) {
            return Some(MachineRef(idx));
        }

        let row = self.store.machine_row(id)?;
        let guard = row.lock_owned().await;
        self.machines.push(Locked::new(guard));
        Some(MachineRef(self.machines.len() - 1))
    }

    pub fn machine(&self, r: MachineRef) -> &OwnedMachine {
        &self.machines[r.0].draft
    }

    pub fn machine_mut(&mut self, r: MachineRef) -> &mut OwnedMachine {
        &mut self.machines[r.0].draft
    }

    /// Whether `user` owns `machine_type`, counting rows staged in this unit.
    pub fn owns(&self, user: UserId, machine_type: MachineTypeId) -> bool {
        self.new_machines
            .iter()
            .any(|m| m.user_id == user && m.machine_type == machine_type)
            || self.store.owned_machine_id(user, machine_type).is_some()
    }

    /// Stage a new, inactive purchased machine row.
    pub fn insert_machine(&mut self, user: UserId, machine_type: MachineTypeId) -> OwnedMachineId {
        let now = self.store.now();
        let machine = OwnedMachine {
            id: Sequences::next(&self.store.ids.machine),
            user_id: user,
            machine_type,
            activated_time: None,
            created_at: now,
            updated_at: now,
        };
        let id = machine.id;
        self.new_machines.push(machine);
        id
    }

    /// Stage a transaction log record against a locked ledger.
    ///
    /// Income records bump the ledger's `income` or `affiliate_income`
    /// counter. The balance is left to the caller. Returns `None`, staging
    /// nothing, if that counter would overflow.
    pub fn append(
        &mut self,
        r: LedgerRef,
        kind: TransactionKind,
        amount: Amount,
        status: TxStatus,
    ) -> Option<TxId> {
        let ledger = &mut self.ledgers[r.0].draft;
        if let TransactionKind::Income { kind: income, .. } = &kind {
            let counter = match income {
                IncomeKind::Affiliate => &mut ledger.affiliate_income,
                IncomeKind::Bonus | IncomeKind::Commission => &mut ledger.income,
            };
            *counter = counter.checked_add(amount)?;
        }

        let now = self.store.now();
        let record = TransactionRecord {
            id: Sequences::next(&self.store.ids.tx),
            ledger_id: ledger.id,
            amount,
            status,
            kind,
            created_at: now,
            updated_at: now,
        };
        let id = record.id;
        self.records.push(record);
        Some(id)
    }

    /// Committed record with any status change staged in this unit applied.
    pub fn transaction(&self, id: TxId) -> Option<TransactionRecord> {
        let staged_status = self
            .status_changes
            .iter()
            .rev()
            .find(|(tx, _)| *tx == id)
            .map(|(_, status)| *status);

        let mut record = self
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .or_else(|| self.store.transaction(id))?;
        if let Some(status) = staged_status {
            record.status = status;
        }
        Some(record)
    }

    /// Stage a status change of an existing record.
    pub fn set_status(&mut self, id: TxId, status: TxStatus) {
        self.status_changes.push((id, status));
    }

    /// Publish all staged writes, then release the row locks.
    pub fn commit(self) {
        let now = self.store.now();
        {
            let mut machines = self.store.machines.write();
            for machine in self.new_machines {
                let key = (machine.user_id, machine.machine_type);
                debug_assert!(!machines.by_owner.contains_key(&key));
                machines.by_owner.insert(key, machine.id);
                machines
                    .rows
                    .insert(machine.id, std::sync::Arc::new(tokio::sync::Mutex::new(machine)));
            }
        }
        {
            let mut table = self.store.transactions.write();
            for record in self.records {
                let idx = table.rows.len();
                table.by_id.insert(record.id, idx);
                table.by_ledger.entry(record.ledger_id).or_default().push(idx);
                table.rows.push(record);
            }
            for (id, status) in self.status_changes {
                if let Some(idx) = table.by_id.get(&id).copied() {
                    let record = &mut table.rows[idx];
                    record.status = status;
                    record.updated_at = now;
                }
            }
        }

        for mut machine in self.machines {
            if machine.draft != *machine.guard {
                machine.draft.updated_at = now;
            }
            machine.write_back();
        }
        for ledger in self.ledgers {
            ledger.write_back();
        }
    }
}
