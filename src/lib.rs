pub mod amount;
pub mod clock;
pub mod config;
pub mod csv;
pub mod engine;
pub mod ledger;
pub mod locks;
pub mod model;
pub mod store;

pub use amount::{Amount, Percentage};
pub use config::Config;
pub use engine::{Engine, EngineError};
pub use ledger::Ledger;
pub use model::{Operation, OwnedMachineId, TxId, TxStatus, User, UserId};
