//! Argon2id password hashing.

use anyhow::{Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand_core::OsRng;

/// Hashes and verifies account secrets. Cost parameters are injected so tests
/// can run with the cheapest settings.
#[derive(Clone, Default)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl SecretHasher {
    pub fn new(params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Returns a PHC string embedding algorithm, parameters and salt.
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| anyhow!("hashing failed: {e}"))?;
        Ok(hash.to_string())
    }

    /// `Ok(false)` on mismatch; errors only when the stored hash is unusable.
    pub fn verify(&self, secret: &str, stored: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(stored).map_err(|e| anyhow!("invalid stored hash format: {e}"))?;
        match self.argon2.verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(anyhow!("verifying password failed: {e}")),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> SecretHasher {
    SecretHasher::new(Params::new(Params::MIN_M_COST, 1, 1, None).unwrap())
}
