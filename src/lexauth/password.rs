//! Argon2id password hashing.
//!
//! Hashes are PHC strings, so the per-password salt and cost parameters travel with
//! the hash. Verification always uses the parameters embedded in the stored hash.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{
        rand_core::OsRng, Error as PasswordHashError, PasswordHash, PasswordHasher as _,
        PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use secrecy::{ExposeSecret, SecretString};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashingParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HashingParams {
    /// Minimal cost profile for test suites.
    #[must_use]
    pub const fn low_cost() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }
}

#[derive(Clone)]
pub struct PasswordHasher {
    params: HashingParams,
    pepper: Option<SecretString>,
}

impl PasswordHasher {
    #[must_use]
    pub fn new(params: HashingParams, pepper: Option<SecretString>) -> Self {
        Self { params, pepper }
    }

    fn argon2(&self) -> Result<Argon2<'_>> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            None,
        )
        .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;

        match &self.pepper {
            Some(pepper) => Argon2::new_with_secret(
                pepper.expose_secret().as_bytes(),
                Algorithm::Argon2id,
                Version::V0x13,
                params,
            )
            .map_err(|err| anyhow!("invalid argon2 pepper: {err}")),
            None => Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params)),
        }
    }

    fn hash_blocking(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| anyhow!("failed to hash password: {err}"))?;
        Ok(hash.to_string())
    }

    fn verify_blocking(&self, password: &str, stored: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(stored).map_err(|err| anyhow!("malformed password hash: {err}"))?;
        match self.argon2()?.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(PasswordHashError::Password) => Ok(false),
            Err(err) => Err(anyhow!("failed to verify password: {err}")),
        }
    }

    /// Hash on the blocking pool, off the request-handling threads.
    ///
    /// # Errors
    /// Returns an error if the parameters are invalid or the blocking task fails.
    pub async fn hash(&self, password: String) -> Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password))
            .await
            .context("password hashing task failed")?
    }

    /// # Errors
    /// Returns an error if the stored hash is malformed or the blocking task fails.
    pub async fn verify(&self, password: String, stored: String) -> Result<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&password, &stored))
            .await
            .context("password verification task failed")?
    }
}
