//! In-process store with the same locking and atomicity rules as the Postgres
//! repositories.
//!
//! Row locks taken by [`SessionStore::find_session_for_update_nowait`] fail
//! immediately when another open transaction holds them. Writes made through
//! a transaction stay private until `commit()`, which re-checks uniqueness and
//! applies everything under one lock. Dropping a transaction releases its row
//! locks and discards its writes.

use crate::error::{DatabaseError, Result};
use crate::repositories::{
    SessionRepository, SessionStore, Transaction, UserRepository, UserStore,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use strawberry_models::{NewSessionRecord, NewUser, Session, User, UserId};
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: Vec<User>,
    sessions: Vec<Session>,
    locked: HashSet<Uuid>,
    last_user_id: UserId,
    last_session_id: i64,
}

impl State {
    fn email_taken(&self, email: &str) -> bool {
        self.users.iter().any(|u| u.email == email)
    }

    fn session_taken(&self, token_id: Uuid, token_hash: &str) -> bool {
        self.sessions
            .iter()
            .any(|s| s.token_id == token_id || s.token_hash == token_hash)
    }

    fn next_user_id(&mut self) -> UserId {
        self.last_user_id += 1;
        self.last_user_id
    }

    fn next_session_id(&mut self) -> i64 {
        self.last_session_id += 1;
        self.last_session_id
    }
}

fn lock_state(state: &Mutex<State>) -> Result<MutexGuard<'_, State>> {
    state
        .lock()
        .map_err(|_| DatabaseError::Other("memory store lock poisoned".to_string()))
}

fn session_from_record(id: i64, record: &NewSessionRecord) -> Session {
    let now = Utc::now();
    Session {
        id,
        user_id: record.user_id,
        token_id: record.token_id,
        token_hash: record.token_hash.clone(),
        user_agent: record.user_agent.clone(),
        device: record.device.clone(),
        ip_address: record.ip_address.clone(),
        location: record.location.clone(),
        is_revoked: false,
        revoked_at: None,
        expires_at: record.expires_at,
        created_at: now,
        updated_at: now,
    }
}

/// Shared handle to the in-memory tables. Clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of committed users.
    pub fn users(&self) -> Vec<User> {
        self.state
            .lock()
            .map(|state| state.users.clone())
            .unwrap_or_default()
    }

    /// Snapshot of committed sessions, oldest first.
    pub fn sessions(&self) -> Vec<Session> {
        self.state
            .lock()
            .map(|state| state.sessions.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_by_email(&self, email: &str) -> Result<User> {
        let state = lock_state(&self.state)?;
        state
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("User", email))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(Arc::clone(&self.state))))
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create(&self, record: &NewSessionRecord) -> Result<i64> {
        let mut state = lock_state(&self.state)?;
        if state.session_taken(record.token_id, &record.token_hash) {
            return Err(DatabaseError::duplicate("Session", &record.token_id.to_string()));
        }

        let id = state.next_session_id();
        state.sessions.push(session_from_record(id, record));
        Ok(id)
    }

    async fn get(&self, token_id: Uuid) -> Result<Session> {
        let state = lock_state(&self.state)?;
        state
            .sessions
            .iter()
            .find(|s| s.token_id == token_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Session", &token_id.to_string()))
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64> {
        let mut state = lock_state(&self.state)?;
        let now = Utc::now();
        let mut revoked = 0;

        for session in state
            .sessions
            .iter_mut()
            .filter(|s| s.user_id == user_id && !s.is_revoked)
        {
            session.is_revoked = true;
            session.revoked_at = Some(now);
            session.updated_at = now;
            revoked += 1;
        }

        Ok(revoked)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(Arc::clone(&self.state))))
    }
}

pub struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    users: Vec<User>,
    sessions: Vec<Session>,
    updates: Vec<Session>,
    locks: Vec<Uuid>,
}

impl MemoryTransaction {
    fn new(state: Arc<Mutex<State>>) -> Self {
        Self {
            state,
            users: Vec::new(),
            sessions: Vec::new(),
            updates: Vec::new(),
            locks: Vec::new(),
        }
    }
}

#[async_trait]
impl UserStore for MemoryTransaction {
    async fn save_user(&mut self, new_user: &NewUser) -> Result<UserId> {
        let mut state = lock_state(&self.state)?;
        if state.email_taken(&new_user.email) || self.users.iter().any(|u| u.email == new_user.email)
        {
            return Err(DatabaseError::duplicate("User", &new_user.email));
        }

        let id = state.next_user_id();
        drop(state);

        let now = Utc::now();
        self.users.push(User {
            id,
            name: new_user.name.clone(),
            email: new_user.email.clone(),
            password_hash: new_user.password_hash.clone(),
            is_store: new_user.is_store,
            created_at: now,
            updated_at: now,
        });

        Ok(id)
    }
}

#[async_trait]
impl SessionStore for MemoryTransaction {
    async fn create_session(&mut self, record: &NewSessionRecord) -> Result<i64> {
        let mut state = lock_state(&self.state)?;
        let pending_conflict = self
            .sessions
            .iter()
            .any(|s| s.token_id == record.token_id || s.token_hash == record.token_hash);
        if pending_conflict || state.session_taken(record.token_id, &record.token_hash) {
            return Err(DatabaseError::duplicate("Session", &record.token_id.to_string()));
        }

        let id = state.next_session_id();
        drop(state);

        self.sessions.push(session_from_record(id, record));
        Ok(id)
    }

    async fn find_session_for_update_nowait(&mut self, token_id: Uuid) -> Result<Session> {
        // Rows written by this transaction are already ours
        if let Some(own) = self
            .updates
            .iter()
            .chain(self.sessions.iter())
            .find(|s| s.token_id == token_id)
        {
            return Ok(own.clone());
        }

        let mut state = lock_state(&self.state)?;
        let session = state
            .sessions
            .iter()
            .find(|s| s.token_id == token_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("Session", &token_id.to_string()))?;

        if !self.locks.contains(&token_id) {
            if !state.locked.insert(token_id) {
                return Err(DatabaseError::LockNotAvailable(format!("Session {}", token_id)));
            }
            self.locks.push(token_id);
        }

        Ok(session)
    }

    async fn update_session(&mut self, session: &Session) -> Result<()> {
        let mut updated = session.clone();
        updated.updated_at = Utc::now();

        if let Some(pending) = self.sessions.iter_mut().find(|s| s.id == session.id) {
            *pending = updated;
            return Ok(());
        }

        self.updates.retain(|s| s.id != session.id);
        self.updates.push(updated);
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let users = std::mem::take(&mut this.users);
        let sessions = std::mem::take(&mut this.sessions);
        let updates = std::mem::take(&mut this.updates);

        let state_handle = Arc::clone(&this.state);
        {
            let mut state = lock_state(&state_handle)?;

            // Another transaction may have committed the same email meanwhile
            if let Some(user) = users.iter().find(|u| state.email_taken(&u.email)) {
                return Err(DatabaseError::duplicate("User", &user.email));
            }
            if let Some(session) = sessions
                .iter()
                .find(|s| state.session_taken(s.token_id, &s.token_hash))
            {
                return Err(DatabaseError::duplicate("Session", &session.token_id.to_string()));
            }

            for update in updates {
                if let Some(row) = state.sessions.iter_mut().find(|s| s.id == update.id) {
                    row.is_revoked = update.is_revoked;
                    row.revoked_at = update.revoked_at;
                    row.updated_at = update.updated_at;
                }
            }
            state.users.extend(users);
            state.sessions.extend(sessions);

            for token_id in this.locks.drain(..) {
                state.locked.remove(&token_id);
            }
        }

        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.locks.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            for token_id in &self.locks {
                state.locked.remove(token_id);
            }
        }
    }
}
