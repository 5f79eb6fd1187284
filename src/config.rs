//! Platform configuration, loaded once and shared immutably.
//!
//! ```toml
//! referral_percentages = [1000, 500, 300]   # basis points, level 1 first
//! commission_cooldown_secs = 86400
//! withdrawal_lock_secs = 86400
//!
//! [[machines]]
//! title = "Antminer S19"
//! coin = "BTC"
//! price = 100000   # cents
//! income = 5000    # cents per cycle
//! ```

use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::{Amount, Percentage};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Catalog entry seeded into the machine table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MachineSeed {
    pub title: String,
    pub coin: String,
    pub price: Amount,
    pub income: Amount,
}

impl MachineSeed {
    pub fn new(title: &str, coin: &str, price: u64, income: u64) -> Self {
        Self {
            title: title.to_string(),
            coin: coin.to_string(),
            price: Amount::from_cents(price),
            income: Amount::from_cents(income),
        }
    }
}

/// The bootstrap administrator, created when the user table is empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub affiliate_code: String,
    #[serde(default)]
    pub balance: Amount,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One entry per upline level, level 1 (direct master) first.
    pub referral_percentages: Vec<Percentage>,
    pub commission_cooldown_secs: u64,
    pub withdrawal_lock_secs: u64,
    pub machines: Vec<MachineSeed>,
    pub admin: Option<AdminSeed>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            referral_percentages: [1_000, 500, 300, 200, 100]
                .into_iter()
                .map(Percentage::from_basis_points)
                .collect(),
            commission_cooldown_secs: 24 * 60 * 60,
            withdrawal_lock_secs: 24 * 60 * 60,
            machines: vec![
                MachineSeed::new("Antminer S19 Pro", "BTC", 150_000, 4_500),
                MachineSeed::new("Innosilicon A10 Pro", "ETH", 90_000, 2_600),
                MachineSeed::new("Goldshell LT6", "LTC", 60_000, 1_700),
                MachineSeed::new("Bitmain L7", "DOGE", 30_000, 850),
                MachineSeed::new("Ryzen 9 Rig", "XMR", 12_000, 330),
            ],
            admin: None,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let total: u32 = self
            .referral_percentages
            .iter()
            .map(|p| p.basis_points())
            .sum();
        if total > Percentage::HUNDRED.basis_points() {
            return Err(ConfigError::Invalid(format!(
                "referral percentages add up to {}",
                Percentage::from_basis_points(total)
            )));
        }

        let mut coins = HashSet::new();
        for machine in &self.machines {
            // coin lookups ignore case
            if !coins.insert(machine.coin.to_ascii_uppercase()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate machine coin '{}'",
                    machine.coin
                )));
            }
            if machine.price.is_zero() || machine.income.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "machine '{}' must have a positive price and income",
                    machine.coin
                )));
            }
        }

        for (name, secs) in [
            ("commission_cooldown_secs", self.commission_cooldown_secs),
            ("withdrawal_lock_secs", self.withdrawal_lock_secs),
        ] {
            let in_range = i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|d| Utc::now().checked_add_signed(d))
                .is_some();
            if !in_range {
                return Err(ConfigError::Invalid(format!("{name} = {secs} is out of range")));
            }
        }

        Ok(())
    }

    pub fn commission_cooldown(&self) -> TimeDelta {
        secs_to_delta(self.commission_cooldown_secs)
    }

    pub fn withdrawal_lock_ttl(&self) -> TimeDelta {
        secs_to_delta(self.withdrawal_lock_secs)
    }
}

/// Clamps to `TimeDelta::MAX` for values `validate` would reject.
fn secs_to_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.referral_percentages.len(), 5);
        assert_eq!(config.commission_cooldown(), TimeDelta::hours(24));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml("commission_cooldown_secs = 60\n").unwrap();
        assert_eq!(config.commission_cooldown(), TimeDelta::seconds(60));
        assert_eq!(config.machines, Config::default().machines);
    }

    #[test]
    fn full_toml() {
        let config = Config::from_toml(
            r#"
            referral_percentages = [1000, 500]
            commission_cooldown_secs = 3600
            withdrawal_lock_secs = 600

            [[machines]]
            title = "Tiny"
            coin = "TNY"
            price = 1000
            income = 10

            [admin]
            username = "admin"
            email = "admin@example.com"
            affiliate_code = "ADMIN00001"
            balance = 500
            "#,
        )
        .unwrap();

        assert_eq!(
            config.referral_percentages,
            vec![
                Percentage::from_basis_points(1000),
                Percentage::from_basis_points(500)
            ]
        );
        assert_eq!(config.machines, vec![MachineSeed::new("Tiny", "TNY", 1000, 10)]);
        assert_eq!(config.withdrawal_lock_ttl(), TimeDelta::minutes(10));
        let admin = config.admin.unwrap();
        assert_eq!(admin.affiliate_code, "ADMIN00001");
        assert_eq!(admin.balance, Amount::from_cents(500));
    }

    #[test]
    fn rejects_percentages_over_hundred() {
        let result = Config::from_toml("referral_percentages = [6000, 5000]\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_duplicate_coins() {
        let result = Config::from_toml(
            r#"
            [[machines]]
            title = "A"
            coin = "BTC"
            price = 1
            income = 1

            [[machines]]
            title = "B"
            coin = "BTC"
            price = 2
            income = 2
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_coins_differing_only_in_case() {
        let result = Config::from_toml(
            r#"
            [[machines]]
            title = "A"
            coin = "BTC"
            price = 1
            income = 1

            [[machines]]
            title = "B"
            coin = "btc"
            price = 2
            income = 2
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("btc")));
    }

    #[test]
    fn rejects_durations_chrono_cannot_represent() {
        for field in ["commission_cooldown_secs", "withdrawal_lock_secs"] {
            for secs in [u64::MAX, i64::MAX as u64, i64::MAX as u64 / 1_000 + 1] {
                let result = Config::from_toml(&format!("{field} = {secs}\n"));
                assert!(
                    matches!(result, Err(ConfigError::Invalid(_)) | Err(ConfigError::Parse(_))),
                    "{field} = {secs} was accepted"
                );
            }
        }
    }

    #[test]
    fn unvalidated_huge_durations_clamp() {
        let config = Config {
            commission_cooldown_secs: u64::MAX,
            withdrawal_lock_secs: i64::MAX as u64,
            ..Config::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.commission_cooldown(), TimeDelta::MAX);
        assert_eq!(config.withdrawal_lock_ttl(), TimeDelta::MAX);
    }

    #[test]
    fn accepts_a_year_long_lock() {
        let config = Config::from_toml("withdrawal_lock_secs = 31536000\n").unwrap();
        assert_eq!(config.withdrawal_lock_ttl(), TimeDelta::days(365));
    }

    #[test]
    fn rejects_free_machines() {
        let result = Config::from_toml(
            r#"
            [[machines]]
            title = "Free"
            coin = "FRE"
            price = 0
            income = 1
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"withdrawal_lock_secs = 5\n").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.withdrawal_lock_ttl(), TimeDelta::seconds(5));
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let result = Config::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let result = Config::from_toml("referral_percentages = [\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
