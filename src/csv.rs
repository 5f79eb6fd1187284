use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::amount::ParseAmountError;
use crate::ledger::Ledger;
use crate::model::{Operation, User};
use crate::Amount;

/// Errors that can occur when reading or writing replay files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open operations file: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },

    #[error("line {line}: {source}")]
    Amount {
        line: usize,
        source: ParseAmountError,
    },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    user: String,
    target: Option<String>,
    memo: Option<String>,
    amount: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    user: &'a str,
    balance: String,
    income: String,
    affiliate_income: String,
    machines: String,
}

impl InputRow {
    fn require(field: Option<String>, line: usize, op: &str, name: &'static str) -> Result<String, CsvError> {
        field
            .filter(|value| !value.is_empty())
            .ok_or_else(|| CsvError::MissingField {
                line,
                op: op.to_string(),
                field: name,
            })
    }

    fn into_operation(self, line: usize) -> Result<Operation, CsvError> {
        let op = self.op.as_str();
        let target = |row: Option<String>| Self::require(row, line, op, "target");
        let memo = |row: Option<String>| Self::require(row, line, op, "memo");
        let amount = |row: Option<String>| -> Result<Amount, CsvError> {
            Self::require(row, line, op, "amount")?
                .parse()
                .map_err(|source| CsvError::Amount { line, source })
        };

        let user = self.user;
        match op {
            "register" => Ok(Operation::Register {
                username: user,
                email: memo(self.memo)?,
                master: self.target.filter(|master| !master.is_empty()),
            }),
            "deposit" => Ok(Operation::Deposit {
                user,
                amount: amount(self.amount)?,
                platform: memo(self.memo)?,
            }),
            "bonus" => Ok(Operation::Bonus {
                user,
                amount: amount(self.amount)?,
            }),
            "purchase" => Ok(Operation::Purchase {
                user,
                coin: target(self.target)?,
            }),
            "activate" => Ok(Operation::Activate {
                user,
                coin: target(self.target)?,
            }),
            "collect" => Ok(Operation::Collect {
                user,
                coin: target(self.target)?,
            }),
            "wallet" => Ok(Operation::ChangeWallet {
                user,
                wallet: memo(self.memo)?,
            }),
            "withdraw" => Ok(Operation::Withdraw {
                user,
                amount: amount(self.amount)?,
            }),
            other => Err(CsvError::UnrecognizedOp {
                line,
                op: other.to_string(),
            }),
        }
    }
}

/// Read replay operations from a csv file with columns
/// `op,user,target,memo,amount`
pub fn read_operations(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Operation, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_operation(line)
        }))
}

/// Write one row per user: balances and the coins of owned machines
pub fn write_ledgers<'a>(
    writer: impl io::Write,
    rows: impl IntoIterator<Item = (&'a User, &'a Ledger, Vec<&'a str>)>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for (user, ledger, coins) in rows {
        let row = OutputRow {
            user: &user.username,
            balance: ledger.balance.to_string(),
            income: ledger.income.to_string(),
            affiliate_income: ledger.affiliate_income.to_string(),
            machines: coins.join(" "),
        };
        writer.serialize(&row)?;
    }

    writer.flush()?;
    Ok(())
}
