use rand::Rng;
use tracing::{debug, info, warn};

use super::{Engine, EngineError, RegistrationError};
use crate::config::AdminSeed;
use crate::model::{NewUser, User, UserId};
use crate::store::{InsertUserError, UserRow};
use crate::Amount;

const CODE_SYMBOLS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 10;
const CODE_ATTEMPTS: usize = 10;

/// Random uppercase alphanumeric string.
fn random_code(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CODE_SYMBOLS[rng.random_range(0..CODE_SYMBOLS.len())] as char)
        .collect()
}

impl Engine {
    /// Register a user under the master owning `affiliate_code`, or as a
    /// root of the referral forest when no code is given.
    ///
    /// The user, its ledger and the master edge are created together.
    pub fn register(
        &self,
        new_user: NewUser,
        affiliate_code: Option<&str>,
    ) -> Result<User, EngineError> {
        let master = match affiliate_code {
            Some(code) => Some(
                self.store
                    .user_by_affiliate_code(code)
                    .ok_or_else(|| RegistrationError::InvalidAffiliateCode(code.to_string()))?
                    .id,
            ),
            None => None,
        };

        let user = self.insert_with_fresh_code(new_user, master)?;
        info!(user = user.id, username = %user.username, master = ?master, "user registered");
        Ok(user)
    }

    /// Create the bootstrap administrator. Does nothing once any user exists.
    pub fn seed_admin(&self, seed: &AdminSeed) -> Result<Option<User>, EngineError> {
        if self.store.user_count() > 0 {
            return Ok(None);
        }

        let row = UserRow {
            new_user: NewUser::new(&seed.username, &seed.email),
            affiliate_code: seed.affiliate_code.clone(),
            master: None,
            is_admin: true,
            is_active: true,
            opening_balance: seed.balance,
        };
        let admin = self.store.insert_user(row).map_err(registration_error)?;
        info!(user = admin.id, username = %admin.username, "admin seeded");
        Ok(Some(admin))
    }

    /// Mark a user as verified.
    pub fn verify_user(&self, user: UserId) -> Result<User, EngineError> {
        self.store
            .set_user_active(user, true)
            .ok_or_else(|| EngineError::UnknownUser(user.to_string()))
    }

    fn insert_with_fresh_code(
        &self,
        new_user: NewUser,
        master: Option<UserId>,
    ) -> Result<User, EngineError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = random_code(CODE_LEN);
            if self.store.affiliate_code_exists(&code) {
                debug!(code = %code, "affiliate code collision");
                continue;
            }

            let row = UserRow {
                new_user: new_user.clone(),
                affiliate_code: code,
                master,
                is_admin: false,
                is_active: false,
                opening_balance: Amount::ZERO,
            };
            match self.store.insert_user(row) {
                Ok(user) => return Ok(user),
                // lost a race for the code, draw again
                Err(InsertUserError::AffiliateCodeTaken(_)) => continue,
                Err(e) => return Err(registration_error(e)),
            }
        }

        warn!(username = %new_user.username, "affiliate code space exhausted");
        Err(RegistrationError::AffiliateCodeExhausted.into())
    }
}

fn registration_error(e: InsertUserError) -> EngineError {
    match e {
        InsertUserError::UsernameTaken(name) => RegistrationError::UsernameExists(name),
        InsertUserError::EmailTaken(email) => RegistrationError::EmailExists(email),
        InsertUserError::AffiliateCodeTaken(code) => RegistrationError::InvalidAffiliateCode(code),
    }
    .into()
}
