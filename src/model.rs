//! Core domain types for the mining platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;

/// User identifier.
pub type UserId = u64;

/// Ledger (finance row) identifier.
pub type LedgerId = u64;

/// Catalog machine identifier.
pub type MachineTypeId = u32;

/// Purchased machine identifier.
pub type OwnedMachineId = u64;

/// Transaction log record identifier.
pub type TxId = u64;

/// A registered platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// Unique, issued once at registration.
    pub affiliate_code: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration input.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
        }
    }
}

/// A purchasable machine from the seeded catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineType {
    pub id: MachineTypeId,
    pub title: String,
    /// Unique coin symbol, e.g. `BTC`.
    pub coin: String,
    pub price: Amount,
    /// Paid out once per activation cycle.
    pub income: Amount,
}

/// Activation state of an owned machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MachineState {
    Inactive,
    Active,
}

/// A user's instance of a catalog machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedMachine {
    pub id: OwnedMachineId,
    pub user_id: UserId,
    pub machine_type: MachineTypeId,
    /// Set while active, cleared on commission collection.
    pub activated_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OwnedMachine {
    pub fn state(&self) -> MachineState {
        match self.activated_time {
            Some(_) => MachineState::Active,
            None => MachineState::Inactive,
        }
    }
}

/// Status of a transaction log record. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    New,
    Pending,
    Completed,
}

impl TxStatus {
    pub fn can_advance_to(self, next: TxStatus) -> bool {
        next > self
    }
}

/// Income sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomeKind {
    Bonus,
    Affiliate,
    Commission,
}

/// Kind-specific part of a transaction log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransactionKind {
    /// Funds arriving from an external platform.
    Deposit { platform: String },
    /// Funds leaving to the given wallet.
    Withdrawal { wallet: String },
    /// Platform-paid income. `coin` is set for commissions.
    Income {
        kind: IncomeKind,
        coin: Option<String>,
    },
}

impl TransactionKind {
    pub fn income(kind: IncomeKind) -> Self {
        TransactionKind::Income { kind, coin: None }
    }

    pub fn commission(coin: impl Into<String>) -> Self {
        TransactionKind::Income {
            kind: IncomeKind::Commission,
            coin: Some(coin.into()),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::Deposit { .. } => "deposit",
            TransactionKind::Withdrawal { .. } => "withdrawal",
            TransactionKind::Income { .. } => "income",
        }
    }
}

/// An append-only transaction log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub id: TxId,
    pub ledger_id: LedgerId,
    pub amount: Amount,
    pub status: TxStatus,
    pub kind: TransactionKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An operation fed to [`Engine::apply`](crate::Engine::apply).
///
/// Users and machines are referenced by username and coin so that
/// operations can be replayed from a file.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Register a user, optionally under the named master.
    Register {
        username: String,
        email: String,
        master: Option<String>,
    },
    /// Record a platform deposit and confirm it.
    Deposit {
        user: String,
        amount: Amount,
        platform: String,
    },
    /// Grant a bonus income.
    Bonus { user: String, amount: Amount },
    /// Buy the machine mining `coin`.
    Purchase { user: String, coin: String },
    /// Activate the owned machine mining `coin`.
    Activate { user: String, coin: String },
    /// Collect the commission of the owned machine mining `coin`.
    Collect { user: String, coin: String },
    /// Set the withdrawal wallet.
    ChangeWallet { user: String, wallet: String },
    /// Request a withdrawal.
    Withdraw { user: String, amount: Amount },
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Register { .. } => "register",
            Operation::Deposit { .. } => "deposit",
            Operation::Bonus { .. } => "bonus",
            Operation::Purchase { .. } => "purchase",
            Operation::Activate { .. } => "activate",
            Operation::Collect { .. } => "collect",
            Operation::ChangeWallet { .. } => "wallet",
            Operation::Withdraw { .. } => "withdraw",
        }
    }

    pub fn user(&self) -> &str {
        match self {
            Operation::Register { username, .. } => username,
            Operation::Deposit { user, .. }
            | Operation::Bonus { user, .. }
            | Operation::Purchase { user, .. }
            | Operation::Activate { user, .. }
            | Operation::Collect { user, .. }
            | Operation::ChangeWallet { user, .. }
            | Operation::Withdraw { user, .. } => user,
        }
    }
}
