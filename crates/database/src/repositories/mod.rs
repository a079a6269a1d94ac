//! Storage capabilities consumed by the session engine.
//!
//! Reads that need no isolation go through the repositories directly. Writes
//! that must be atomic go through a [`Transaction`] obtained from `begin()`:
//! the handle is passed explicitly to every operation in the unit of work and
//! is rolled back when dropped without `commit()`.

use crate::error::Result;
use async_trait::async_trait;
use strawberry_models::{NewSessionRecord, NewUser, Session, User, UserId};
use uuid::Uuid;

pub mod sessions;
pub mod transaction;
pub mod users;

#[async_trait]
pub trait UserStore: Send {
    /// Insert a user. Fails with `DuplicateEntry` when the email is taken.
    async fn save_user(&mut self, new_user: &NewUser) -> Result<UserId>;
}

#[async_trait]
pub trait SessionStore: Send {
    async fn create_session(&mut self, record: &NewSessionRecord) -> Result<i64>;

    /// Exclusive row lock that fails with `LockNotAvailable` instead of
    /// queueing behind another holder.
    async fn find_session_for_update_nowait(&mut self, token_id: Uuid) -> Result<Session>;

    /// Persist the revocation state of a session.
    async fn update_session(&mut self, session: &Session) -> Result<()>;
}

/// Scoped unit of work spanning users and sessions.
#[async_trait]
pub trait Transaction: UserStore + SessionStore {
    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `NotFound` when no account uses the email.
    async fn get_by_email(&self, email: &str) -> Result<User>;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, record: &NewSessionRecord) -> Result<i64>;

    async fn get(&self, token_id: Uuid) -> Result<Session>;

    /// Revoke every live session of a user, returning how many were flipped.
    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64>;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
