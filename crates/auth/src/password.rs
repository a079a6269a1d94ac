use crate::error::{AuthError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use lazy_static::lazy_static;

pub const BCRYPT_MIN_COST: u32 = 4;
pub const BCRYPT_MAX_COST: u32 = 31;
pub const BCRYPT_DEFAULT_COST: u32 = 10;

lazy_static! {
    // Verified against when the stored digest is unusable, so a missing
    // account costs as much as a wrong password.
    static ref ARGON2_DUMMY_HASH: Option<String> = Argon2::default()
        .hash_password(b"strawberry-dummy-password", &SaltString::generate(&mut OsRng))
        .map(|hash| hash.to_string())
        .ok();
}

#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, password: &str) -> Result<String>;

    /// Succeeds only when `password` matches `digest`.
    async fn compare(&self, digest: &str, password: &str) -> Result<()>;
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AuthError::Internal(format!("Password hashing task failed: {}", e)))?
}

/// Argon2id with the crate's default parameters, PHC string output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Hasher;

impl Argon2Hasher {
    pub fn new() -> Self {
        Self
    }

    fn verify(digest: &str, password: &str) -> Result<()> {
        let argon2 = Argon2::default();

        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(_) => {
                if let Some(dummy) = ARGON2_DUMMY_HASH.as_deref() {
                    if let Ok(dummy) = PasswordHash::new(dummy) {
                        let _ = argon2.verify_password(password.as_bytes(), &dummy);
                    }
                }
                return Err(AuthError::InvalidCredentials);
            }
        };

        match argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(()),
            Err(argon2::password_hash::Error::Password) => Err(AuthError::InvalidCredentials),
            Err(e) => Err(AuthError::Internal(format!("Password verification failed: {}", e))),
        }
    }
}

#[async_trait]
impl PasswordHasher for Argon2Hasher {
    async fn hash(&self, password: &str) -> Result<String> {
        let password = password.to_owned();
        run_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))
        })
        .await
    }

    async fn compare(&self, digest: &str, password: &str) -> Result<()> {
        let digest = digest.to_owned();
        let password = password.to_owned();
        run_blocking(move || Self::verify(&digest, &password)).await
    }
}

/// bcrypt with a configurable cost factor.
#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
    dummy_hash: String,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Result<Self> {
        if !(BCRYPT_MIN_COST..=BCRYPT_MAX_COST).contains(&cost) {
            return Err(AuthError::Internal(format!(
                "bcrypt cost must be between {} and {}",
                BCRYPT_MIN_COST, BCRYPT_MAX_COST
            )));
        }

        let dummy_hash = bcrypt::hash("strawberry-dummy-password", cost)
            .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))?;

        Ok(Self { cost, dummy_hash })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

#[async_trait]
impl PasswordHasher for BcryptHasher {
    async fn hash(&self, password: &str) -> Result<String> {
        let password = password.to_owned();
        let cost = self.cost;
        run_blocking(move || {
            bcrypt::hash(password, cost)
                .map_err(|e| AuthError::Internal(format!("Password hashing failed: {}", e)))
        })
        .await
    }

    async fn compare(&self, digest: &str, password: &str) -> Result<()> {
        let digest = if digest.is_empty() {
            self.dummy_hash.clone()
        } else {
            digest.to_owned()
        };
        let matched_dummy = digest == self.dummy_hash;
        let password = password.to_owned();

        run_blocking(move || match bcrypt::verify(password, &digest) {
            Ok(true) if !matched_dummy => Ok(()),
            _ => Err(AuthError::InvalidCredentials),
        })
        .await
    }
}
