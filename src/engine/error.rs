//! Error types for engine operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{OwnedMachineId, TxId, TxStatus, UserId};

/// Whether a failure is the caller's fault or a server-side fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Server,
}

/// Top-level error returned by every [`Engine`](super::Engine) operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("{0}")]
    Finance(#[from] FinanceError),

    #[error("{0}")]
    Machine(#[from] MachineError),

    #[error("unknown user '{0}'")]
    UnknownUser(String),
}

/// Error during user registration.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("email '{0}' already exists")]
    EmailExists(String),
    #[error("username '{0}' already exists")]
    UsernameExists(String),
    #[error("invalid affiliate code '{0}'")]
    InvalidAffiliateCode(String),
    #[error("could not generate a unique affiliate code, try later")]
    AffiliateCodeExhausted,
}

/// Error touching a ledger or the transaction log.
#[derive(Debug, Error)]
pub enum FinanceError {
    #[error("insufficient balance for user {user}: balance {balance}, required {required}")]
    InsufficientBalance {
        user: UserId,
        balance: Amount,
        required: Amount,
    },
    #[error("finance of user {0} is unavailable")]
    FinanceUnavailable(UserId),
    #[error("finance of master user {0} is unavailable")]
    MasterFinanceUnavailable(UserId),
    #[error("a withdrawal of user '{0}' is already pending")]
    WithdrawalLockExists(String),
    #[error("user {0} has no withdrawal wallet")]
    NoWalletConfigured(UserId),
    #[error("invalid amount {0}")]
    InvalidAmount(Amount),
    #[error("invalid wallet address")]
    InvalidWallet,
    #[error("transaction {0} not found")]
    TransactionNotFound(TxId),
    #[error("transaction {tx} cannot move from {from:?} to {to:?}")]
    InvalidStatusTransition {
        tx: TxId,
        from: TxStatus,
        to: TxStatus,
    },
}

/// Error in the machine ownership state machine.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("no machine mines '{0}'")]
    MachineNotFound(String),
    #[error("user {user} already owns the {coin} machine")]
    MachineAlreadyOwned { user: UserId, coin: String },
    #[error("machine {0} is not owned by the caller")]
    MachineNotOwned(OwnedMachineId),
    #[error("user {user} does not own a {coin} machine")]
    CoinNotOwned { user: UserId, coin: String },
    #[error("machine {0} is not activated")]
    MachineNotActivated(OwnedMachineId),
    #[error("machine {machine} can collect commission in {remaining_secs}s")]
    CommissionCooldownNotElapsed {
        machine: OwnedMachineId,
        remaining_secs: i64,
    },
}

impl EngineError {
    /// Stable numeric code reported to clients.
    pub fn code(&self) -> u16 {
        match self {
            EngineError::Registration(e) => match e {
                RegistrationError::EmailExists(_) => 1000,
                RegistrationError::UsernameExists(_) => 1001,
                RegistrationError::InvalidAffiliateCode(_) => 1002,
                RegistrationError::AffiliateCodeExhausted => 1003,
            },
            EngineError::UnknownUser(_) => 1011,
            EngineError::Finance(e) => match e {
                FinanceError::FinanceUnavailable(_) => 1012,
                FinanceError::MasterFinanceUnavailable(_) => 1013,
                FinanceError::InsufficientBalance { .. } => 1014,
                FinanceError::WithdrawalLockExists(_) => 1015,
                FinanceError::NoWalletConfigured(_) => 1016,
                FinanceError::InvalidAmount(_) => 1017,
                FinanceError::InvalidWallet => 1018,
                FinanceError::TransactionNotFound(_) => 1019,
                FinanceError::InvalidStatusTransition { .. } => 1020,
            },
            EngineError::Machine(e) => match e {
                MachineError::MachineNotFound(_) => 1021,
                MachineError::MachineAlreadyOwned { .. } => 1022,
                MachineError::MachineNotOwned(_) => 1023,
                MachineError::MachineNotActivated(_) => 1024,
                MachineError::CommissionCooldownNotElapsed { .. } => 1025,
                MachineError::CoinNotOwned { .. } => 1026,
            },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Registration(RegistrationError::AffiliateCodeExhausted)
            | EngineError::Finance(
                FinanceError::FinanceUnavailable(_) | FinanceError::MasterFinanceUnavailable(_),
            ) => ErrorClass::Server,
            _ => ErrorClass::Client,
        }
    }

    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            EngineError::Finance(
                FinanceError::FinanceUnavailable(_) | FinanceError::MasterFinanceUnavailable(_)
            )
        )
    }
}
