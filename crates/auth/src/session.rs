//! Refresh-token lineages: issuing pairs, rotating them, and catching replays.
//!
//! Every refresh token has a session row keyed by its `jti`. Rotation locks
//! that row with a non-waiting lock, so two requests presenting the same token
//! can never both succeed: one wins, the other fails fast with
//! [`AuthError::SessionBusy`] or, if the winner already committed, sees a
//! revoked row and gets [`AuthError::SecurityViolation`].

use crate::error::{AuthError, Result};
use crate::token::{hash_token, Claims, SigningKeys, TokenConfig, TokenKind, TokenPair};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use strawberry_database::{DatabaseError, SessionRepository, SessionStore, Transaction};
use strawberry_models::{NewSession, NewSessionRecord, RefreshSession, Role, Session, UserId};

pub const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;
pub const DEFAULT_REFRESH_TTL_DAYS: i64 = 7;

/// What to do after a revoked refresh token is presented again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReusePolicy {
    /// Log a security event and reject the request.
    #[default]
    Report,
    /// Additionally revoke every live session of the user.
    RevokeAllSessions,
}

impl std::str::FromStr for ReusePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "report" => Ok(ReusePolicy::Report),
            "revoke_all" | "revoke_all_sessions" => Ok(ReusePolicy::RevokeAllSessions),
            other => Err(format!("unknown reuse policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub access: TokenConfig,
    pub refresh: TokenConfig,
    pub reuse_policy: ReusePolicy,
}

impl SessionConfig {
    pub fn new(access_keys: SigningKeys, refresh_keys: SigningKeys) -> Self {
        Self {
            access: TokenConfig::new(
                TokenKind::Access,
                Duration::minutes(DEFAULT_ACCESS_TTL_MINUTES),
                access_keys,
            ),
            refresh: TokenConfig::new(
                TokenKind::Refresh,
                Duration::days(DEFAULT_REFRESH_TTL_DAYS),
                refresh_keys,
            ),
            reuse_policy: ReusePolicy::default(),
        }
    }

    /// Default lifetimes with keys generated for this process only.
    ///
    /// Tokens signed with these keys stop verifying after a restart.
    pub fn ephemeral() -> Result<Self> {
        Ok(Self::new(SigningKeys::generate()?, SigningKeys::generate()?))
    }

    pub fn with_ttls(mut self, access: Duration, refresh: Duration) -> Self {
        self.access.ttl = access;
        self.refresh.ttl = refresh;
        self
    }

    pub fn with_reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }
}

#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Start a new lineage and return its first pair.
    async fn create(&self, hint: NewSession) -> Result<TokenPair>;

    /// Same as [`SessionManager::create`], writing through the caller's unit of work.
    async fn create_in(&self, tx: &mut dyn Transaction, hint: NewSession) -> Result<TokenPair>;

    /// Rotate the presented refresh token into a new pair.
    async fn refresh(&self, request: RefreshSession) -> Result<TokenPair>;

    async fn verify_access_token(&self, token: &str) -> Result<Claims>;

    async fn verify_refresh_token(&self, token: &str) -> Result<Claims>;
}

pub struct SessionService {
    config: SessionConfig,
    sessions: Arc<dyn SessionRepository>,
}

impl SessionService {
    pub fn new(config: SessionConfig, sessions: Arc<dyn SessionRepository>) -> Self {
        Self { config, sessions }
    }

    fn issue_pair(&self, user_id: UserId, role: Role) -> Result<TokenPair> {
        Ok(TokenPair {
            access: self.config.access.issue(user_id, role)?,
            refresh: self.config.refresh.issue(user_id, role)?,
        })
    }

    fn record_for(hint: &NewSession, tokens: &TokenPair) -> NewSessionRecord {
        NewSessionRecord {
            user_id: hint.user_id,
            token_id: tokens.refresh.token_id,
            token_hash: hash_token(&tokens.refresh.token),
            user_agent: hint.user_agent.clone(),
            device: hint.device.clone(),
            ip_address: hint.ip_address.clone(),
            location: hint.location.clone(),
            expires_at: tokens.refresh.expires_at,
        }
    }

    /// The presented token must match the row, be live and not yet rotated.
    fn validate_session(session: &Session, presented: &str) -> Result<()> {
        if session.token_hash != hash_token(presented) {
            return Err(AuthError::InvalidToken(
                "Token does not match its session".to_string(),
            ));
        }

        if session.is_revoked {
            return Err(AuthError::SecurityViolation(format!(
                "Revoked refresh token {} presented for user {}",
                session.token_id, session.user_id
            )));
        }

        if session.is_expired_at(Utc::now()) {
            return Err(AuthError::TokenExpired);
        }

        Ok(())
    }

    async fn rotate(&self, claims: &Claims, request: &RefreshSession) -> Result<TokenPair> {
        let mut tx = self.sessions.begin().await?;

        let mut active = match tx.find_session_for_update_nowait(claims.jti).await {
            Ok(session) => session,
            Err(e) if e.is_not_found() => {
                return Err(AuthError::InvalidToken("Session not found".to_string()))
            }
            Err(DatabaseError::LockNotAvailable(_)) => return Err(AuthError::SessionBusy),
            Err(e) => return Err(e.into()),
        };

        Self::validate_session(&active, &request.token)?;

        let tokens = self.issue_pair(active.user_id, claims.rol)?;

        active.is_revoked = true;
        active.revoked_at = Some(Utc::now());
        tx.update_session(&active).await?;

        let successor = NewSession {
            user_id: active.user_id,
            role: claims.rol,
            user_agent: request.user_agent.clone(),
            device: request.device.clone(),
            ip_address: request.ip_address.clone(),
            location: request.location.clone(),
        };
        tx.create_session(&Self::record_for(&successor, &tokens))
            .await?;

        tx.commit().await?;
        Ok(tokens)
    }

    async fn on_reuse(&self, claims: &Claims, reason: &str) {
        tracing::warn!(
            user_id = claims.uid,
            token_id = %claims.jti,
            policy = ?self.config.reuse_policy,
            "Refresh token reuse detected: {}",
            reason
        );

        if self.config.reuse_policy == ReusePolicy::RevokeAllSessions {
            match self.sessions.revoke_all_for_user(claims.uid).await {
                Ok(count) => tracing::warn!(
                    user_id = claims.uid,
                    revoked = count,
                    "Revoked all sessions after token reuse"
                ),
                Err(e) => tracing::error!(
                    user_id = claims.uid,
                    error = %e,
                    "Failed to revoke sessions after token reuse"
                ),
            }
        }
    }
}

#[async_trait]
impl SessionManager for SessionService {
    #[tracing::instrument(skip(self, hint), fields(user_id = hint.user_id))]
    async fn create(&self, hint: NewSession) -> Result<TokenPair> {
        let tokens = self.issue_pair(hint.user_id, hint.role)?;
        self.sessions.create(&Self::record_for(&hint, &tokens)).await?;

        tracing::debug!(token_id = %tokens.refresh.token_id, "Session created");
        Ok(tokens)
    }

    async fn create_in(&self, tx: &mut dyn Transaction, hint: NewSession) -> Result<TokenPair> {
        let tokens = self.issue_pair(hint.user_id, hint.role)?;
        tx.create_session(&Self::record_for(&hint, &tokens)).await?;
        Ok(tokens)
    }

    #[tracing::instrument(skip(self, request))]
    async fn refresh(&self, request: RefreshSession) -> Result<TokenPair> {
        let claims = self.verify_refresh_token(&request.token).await?;

        // The transaction is dropped inside rotate() on every error path,
        // so the old row is untouched by the time the reuse policy runs.
        match self.rotate(&claims, &request).await {
            Ok(tokens) => {
                tracing::debug!(
                    user_id = claims.uid,
                    old_token_id = %claims.jti,
                    new_token_id = %tokens.refresh.token_id,
                    "Session rotated"
                );
                Ok(tokens)
            }
            Err(AuthError::SecurityViolation(reason)) => {
                self.on_reuse(&claims, &reason).await;
                Err(AuthError::SecurityViolation(reason))
            }
            Err(e) => Err(e),
        }
    }

    async fn verify_access_token(&self, token: &str) -> Result<Claims> {
        self.config.access.verify(token)
    }

    async fn verify_refresh_token(&self, token: &str) -> Result<Claims> {
        self.config.refresh.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strawberry_database::MemoryStore;

    fn service(store: &MemoryStore) -> SessionService {
        SessionService::new(SessionConfig::ephemeral().unwrap(), Arc::new(store.clone()))
    }

    #[test]
    fn test_reuse_policy_from_str() {
        assert_eq!("report".parse::<ReusePolicy>().unwrap(), ReusePolicy::Report);
        assert_eq!(
            "REVOKE_ALL".parse::<ReusePolicy>().unwrap(),
            ReusePolicy::RevokeAllSessions
        );
        assert!("ignore".parse::<ReusePolicy>().is_err());
    }

    #[tokio::test]
    async fn test_create_persists_hashed_refresh_token() {
        let store = MemoryStore::new();
        let sessions = service(&store);

        let tokens = sessions
            .create(NewSession {
                user_agent: Some("curl/8".to_string()),
                ..NewSession::for_user(3, Role::Customer)
            })
            .await
            .unwrap();

        let rows = store.sessions();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token_id, tokens.refresh.token_id);
        assert_eq!(rows[0].token_hash, hash_token(&tokens.refresh.token));
        assert_ne!(rows[0].token_hash, tokens.refresh.token);
        assert_eq!(rows[0].user_agent.as_deref(), Some("curl/8"));
        assert_eq!(rows[0].expires_at, tokens.refresh.expires_at);
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let store = MemoryStore::new();
        let sessions = service(&store);
        let tokens = sessions.create(NewSession::for_user(1, Role::Customer)).await.unwrap();

        let err = sessions
            .refresh(RefreshSession {
                token: tokens.access.token,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_rotation_keeps_role() {
        let store = MemoryStore::new();
        let sessions = service(&store);
        let tokens = sessions.create(NewSession::for_user(5, Role::Store)).await.unwrap();

        let rotated = sessions
            .refresh(RefreshSession {
                token: tokens.refresh.token,
                ..Default::default()
            })
            .await
            .unwrap();

        let claims = sessions.verify_access_token(&rotated.access.token).await.unwrap();
        assert_eq!(claims.uid, 5);
        assert_eq!(claims.rol, Role::Store);
    }
}
