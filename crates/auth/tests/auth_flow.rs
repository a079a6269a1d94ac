use async_trait::async_trait;
use chrono::Duration;
use std::sync::{Arc, Mutex};
use strawberry_auth::{
    AuthConfig, AuthError, AuthService, BcryptHasher, Claims, EmailError, EmailVerifier,
    RegisterRequest, ReusePolicy, SessionConfig, SessionManager, SessionService, TokenPair,
};
use strawberry_database::{
    DatabaseError, MemoryStore, SessionRepository, SessionStore, Transaction, UserStore,
};
use strawberry_models::{
    Credentials, NewSession, NewSessionRecord, NewUser, RefreshSession, Session, UserId,
};
use uuid::Uuid;

struct NoMailExchange;

#[async_trait]
impl EmailVerifier for NoMailExchange {
    async fn verify_domain_has_mail_exchange(&self, _email: &str) -> Result<(), EmailError> {
        Err(EmailError::NoMailExchange)
    }
}

struct Harness {
    store: MemoryStore,
    auth: Arc<AuthService>,
}

fn harness_with(config: SessionConfig) -> Harness {
    let store = MemoryStore::new();
    let sessions = Arc::new(SessionService::new(config, Arc::new(store.clone())));
    let auth = AuthService::new(
        Arc::new(store.clone()),
        sessions,
        Arc::new(BcryptHasher::new(4).unwrap()),
        Arc::new(NoMailExchange),
    );

    Harness {
        store,
        auth: Arc::new(auth),
    }
}

fn harness() -> Harness {
    harness_with(SessionConfig::ephemeral().unwrap())
}

fn alice() -> RegisterRequest {
    RegisterRequest {
        name: "alice".to_string(),
        email: "alice@example.com".to_string(),
        password: "Abcdefg1".to_string(),
    }
}

fn refresh_request(tokens: &TokenPair) -> RefreshSession {
    RefreshSession {
        token: tokens.refresh.token.clone(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_login_after_register_yields_distinct_pair() {
    let h = harness();

    let registered = h.auth.register(alice()).await.expect("registration failed");
    let logged_in = h
        .auth
        .login(Credentials {
            email: "alice@example.com".to_string(),
            password: "Abcdefg1".to_string(),
        })
        .await
        .expect("login failed");

    assert_ne!(registered.access.token, logged_in.access.token);
    assert_ne!(registered.refresh.token_id, logged_in.refresh.token_id);
    assert_eq!(h.store.users().len(), 1);
    assert_eq!(h.store.sessions().len(), 2);

    let claims: Claims = h.auth.verify_access_token(&logged_in.access.token).await.unwrap();
    assert_eq!(claims.uid, h.store.users()[0].id);
}

#[tokio::test]
async fn test_duplicate_registration_is_rejected() {
    let h = harness();
    h.auth.register(alice()).await.unwrap();

    let err = h.auth.register(alice()).await.unwrap_err();
    assert!(matches!(err, AuthError::DuplicateEmail));
    assert_eq!(h.store.users().len(), 1);
}

#[tokio::test]
async fn test_weak_password_reports_all_violations() {
    let h = harness();

    let err = h
        .auth
        .register(RegisterRequest {
            password: "abc".to_string(),
            ..alice()
        })
        .await
        .unwrap_err();

    let details = err.details().join("; ");
    assert!(matches!(err, AuthError::BadRequest { .. }));
    assert!(details.contains("length"));
    assert!(details.contains("uppercase"));
    assert!(details.contains("digit"));
    assert!(!details.contains("lowercase"));
    assert!(h.store.users().is_empty());
}

#[tokio::test]
async fn test_invalid_email_is_rejected() {
    let h = harness();

    let err = h
        .auth
        .register(RegisterRequest {
            email: "alice@".to_string(),
            ..alice()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::BadRequest { .. }));
}

#[tokio::test]
async fn test_mx_check_runs_only_when_enabled() {
    let store = MemoryStore::new();
    let sessions = Arc::new(SessionService::new(
        SessionConfig::ephemeral().unwrap(),
        Arc::new(store.clone()),
    ));
    let auth = AuthService::new(
        Arc::new(store.clone()),
        sessions,
        Arc::new(BcryptHasher::new(4).unwrap()),
        Arc::new(NoMailExchange),
    )
    .with_config(AuthConfig {
        check_email_mx: true,
        ..AuthConfig::default()
    });

    let err = auth.register(alice()).await.unwrap_err();
    assert!(err.details().iter().any(|d| d.contains("MX")));
    assert!(store.users().is_empty());
}

#[tokio::test]
async fn test_unknown_email_and_wrong_password_fail_identically() {
    let h = harness();
    h.auth.register(alice()).await.unwrap();

    let unknown = h
        .auth
        .login(Credentials {
            email: "bob@example.com".to_string(),
            password: "Abcdefg1".to_string(),
        })
        .await
        .unwrap_err();
    let wrong = h
        .auth
        .login(Credentials {
            email: "alice@example.com".to_string(),
            password: "Abcdefg2".to_string(),
        })
        .await
        .unwrap_err();

    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert!(matches!(wrong, AuthError::InvalidCredentials));
    assert_eq!(unknown.to_string(), wrong.to_string());
    assert_eq!(unknown.client_message(), wrong.client_message());
    assert_eq!(h.store.sessions().len(), 1);
}

#[tokio::test]
async fn test_refresh_rotates_and_records_new_context() {
    let h = harness();
    let tokens = h.auth.register(alice()).await.unwrap();

    let rotated = h
        .auth
        .refresh(RefreshSession {
            token: tokens.refresh.token.clone(),
            user_agent: Some("Mozilla/5.0".to_string()),
            ip_address: Some("203.0.113.9".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let old = h.store.get(tokens.refresh.token_id).await.unwrap();
    let new = h.store.get(rotated.refresh.token_id).await.unwrap();
    assert!(old.is_revoked);
    assert!(old.revoked_at.is_some());
    assert!(!new.is_revoked);
    assert_eq!(new.user_agent.as_deref(), Some("Mozilla/5.0"));
    assert_eq!(new.ip_address.as_deref(), Some("203.0.113.9"));
}

#[tokio::test]
async fn test_replayed_refresh_token_is_a_security_violation() {
    let h = harness();
    let tokens = h.auth.register(alice()).await.unwrap();

    h.auth.refresh(refresh_request(&tokens)).await.unwrap();
    let err = h.auth.refresh(refresh_request(&tokens)).await.unwrap_err();

    assert!(matches!(err, AuthError::SecurityViolation(_)));
    assert_eq!(h.store.sessions().len(), 2);
}

#[tokio::test]
async fn test_report_policy_leaves_other_sessions_alive() {
    let h = harness();
    let first = h.auth.register(alice()).await.unwrap();
    let second = h
        .auth
        .login(Credentials {
            email: "alice@example.com".to_string(),
            password: "Abcdefg1".to_string(),
        })
        .await
        .unwrap();

    h.auth.refresh(refresh_request(&first)).await.unwrap();
    assert!(h.auth.refresh(refresh_request(&first)).await.is_err());

    h.auth
        .refresh(refresh_request(&second))
        .await
        .expect("unrelated session should still rotate");
}

#[tokio::test]
async fn test_revoke_all_policy_revokes_every_session() {
    let h = harness_with(
        SessionConfig::ephemeral()
            .unwrap()
            .with_reuse_policy(ReusePolicy::RevokeAllSessions),
    );
    let first = h.auth.register(alice()).await.unwrap();
    let second = h
        .auth
        .login(Credentials {
            email: "alice@example.com".to_string(),
            password: "Abcdefg1".to_string(),
        })
        .await
        .unwrap();

    let rotated = h.auth.refresh(refresh_request(&first)).await.unwrap();
    let err = h.auth.refresh(refresh_request(&first)).await.unwrap_err();
    assert!(matches!(err, AuthError::SecurityViolation(_)));

    assert!(h.store.sessions().iter().all(|s| s.is_revoked));
    assert!(matches!(
        h.auth.refresh(refresh_request(&second)).await,
        Err(AuthError::SecurityViolation(_))
    ));
    assert!(matches!(
        h.auth.refresh(refresh_request(&rotated)).await,
        Err(AuthError::SecurityViolation(_))
    ));
}

#[tokio::test]
async fn test_held_lock_fails_fast_and_leaves_session_unrevoked() {
    let h = harness();
    let tokens = h.auth.register(alice()).await.unwrap();

    let mut holder = SessionRepository::begin(&h.store).await.unwrap();
    holder
        .find_session_for_update_nowait(tokens.refresh.token_id)
        .await
        .unwrap();

    let err = h.auth.refresh(refresh_request(&tokens)).await.unwrap_err();
    assert!(matches!(err, AuthError::SessionBusy));
    assert!(!h.store.get(tokens.refresh.token_id).await.unwrap().is_revoked);
    assert_eq!(h.store.sessions().len(), 1);

    drop(holder);
    h.auth
        .refresh(refresh_request(&tokens))
        .await
        .expect("retry after the lock is released should succeed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_refreshes_have_a_single_winner() {
    let h = harness();
    let tokens = h.auth.register(alice()).await.unwrap();

    let first = {
        let auth = Arc::clone(&h.auth);
        let request = refresh_request(&tokens);
        tokio::spawn(async move { auth.refresh(request).await })
    };
    let second = {
        let auth = Arc::clone(&h.auth);
        let request = refresh_request(&tokens);
        tokio::spawn(async move { auth.refresh(request).await })
    };

    let results = vec![first.await.unwrap(), second.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(e, AuthError::SessionBusy | AuthError::SecurityViolation(_)),
                "unexpected error: {e:?}"
            );
        }
    }
    assert_eq!(h.store.sessions().len(), 2);
}

#[tokio::test]
async fn test_token_from_foreign_key_is_invalid() {
    let h = harness();
    h.auth.register(alice()).await.unwrap();

    let foreign = SessionService::new(
        SessionConfig::ephemeral().unwrap(),
        Arc::new(MemoryStore::new()),
    );
    let tokens = foreign.create(NewSession::for_user(1, Default::default())).await.unwrap();

    let err = h.auth.refresh(refresh_request(&tokens)).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken(_)));
}

#[tokio::test]
async fn test_expired_refresh_token() {
    let h = harness_with(
        SessionConfig::ephemeral()
            .unwrap()
            .with_ttls(Duration::minutes(15), Duration::seconds(-30)),
    );
    let tokens = h.auth.register(alice()).await.unwrap();

    let err = h.auth.refresh(refresh_request(&tokens)).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenExpired));
    assert!(!h.store.get(tokens.refresh.token_id).await.unwrap().is_revoked);
}

struct BrokenSessions;

#[async_trait]
impl SessionManager for BrokenSessions {
    async fn create(&self, _hint: NewSession) -> strawberry_auth::Result<TokenPair> {
        Err(AuthError::Internal("signer unavailable".to_string()))
    }

    async fn create_in(
        &self,
        _tx: &mut dyn Transaction,
        _hint: NewSession,
    ) -> strawberry_auth::Result<TokenPair> {
        Err(AuthError::Internal("signer unavailable".to_string()))
    }

    async fn refresh(&self, _request: RefreshSession) -> strawberry_auth::Result<TokenPair> {
        Err(AuthError::Internal("signer unavailable".to_string()))
    }

    async fn verify_access_token(&self, _token: &str) -> strawberry_auth::Result<Claims> {
        Err(AuthError::InvalidToken("unsupported".to_string()))
    }

    async fn verify_refresh_token(&self, _token: &str) -> strawberry_auth::Result<Claims> {
        Err(AuthError::InvalidToken("unsupported".to_string()))
    }
}

#[tokio::test]
async fn test_failed_session_creation_rolls_back_registration() {
    let store = MemoryStore::new();
    let auth = AuthService::new(
        Arc::new(store.clone()),
        Arc::new(BrokenSessions),
        Arc::new(BcryptHasher::new(4).unwrap()),
        Arc::new(NoMailExchange),
    );

    let err = auth.register(alice()).await.unwrap_err();
    assert!(matches!(err, AuthError::Internal(_)));
    assert!(store.users().is_empty());
    assert!(store.sessions().is_empty());
}

#[derive(Clone, Copy)]
enum FailAt {
    CreateSession,
    Commit,
}

/// Session storage whose transactions break after the old row is revoked.
struct FailingRotation {
    inner: MemoryStore,
    fail_at: FailAt,
}

struct FailingTransaction {
    inner: Box<dyn Transaction>,
    fail_at: FailAt,
}

#[async_trait]
impl UserStore for FailingTransaction {
    async fn save_user(&mut self, new_user: &NewUser) -> strawberry_database::Result<UserId> {
        self.inner.save_user(new_user).await
    }
}

#[async_trait]
impl SessionStore for FailingTransaction {
    async fn create_session(&mut self, record: &NewSessionRecord) -> strawberry_database::Result<i64> {
        match self.fail_at {
            FailAt::CreateSession => Err(DatabaseError::Other("insert failed".to_string())),
            FailAt::Commit => self.inner.create_session(record).await,
        }
    }

    async fn find_session_for_update_nowait(
        &mut self,
        token_id: Uuid,
    ) -> strawberry_database::Result<Session> {
        self.inner.find_session_for_update_nowait(token_id).await
    }

    async fn update_session(&mut self, session: &Session) -> strawberry_database::Result<()> {
        self.inner.update_session(session).await
    }
}

#[async_trait]
impl Transaction for FailingTransaction {
    async fn commit(self: Box<Self>) -> strawberry_database::Result<()> {
        match self.fail_at {
            FailAt::Commit => Err(DatabaseError::Other("commit failed".to_string())),
            FailAt::CreateSession => self.inner.commit().await,
        }
    }
}

#[async_trait]
impl SessionRepository for FailingRotation {
    async fn create(&self, record: &NewSessionRecord) -> strawberry_database::Result<i64> {
        self.inner.create(record).await
    }

    async fn get(&self, token_id: Uuid) -> strawberry_database::Result<Session> {
        self.inner.get(token_id).await
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> strawberry_database::Result<u64> {
        self.inner.revoke_all_for_user(user_id).await
    }

    async fn begin(&self) -> strawberry_database::Result<Box<dyn Transaction>> {
        Ok(Box::new(FailingTransaction {
            inner: SessionRepository::begin(&self.inner).await?,
            fail_at: self.fail_at,
        }))
    }
}

#[tokio::test]
async fn test_failed_rotation_never_leaves_a_revoked_unreplaced_session() {
    for fail_at in [FailAt::CreateSession, FailAt::Commit] {
        let config = SessionConfig::ephemeral().unwrap();
        let h = harness_with(config.clone());
        let tokens = h.auth.register(alice()).await.unwrap();

        let sessions = SessionService::new(
            config,
            Arc::new(FailingRotation {
                inner: h.store.clone(),
                fail_at,
            }),
        );

        let err = sessions.refresh(refresh_request(&tokens)).await.unwrap_err();
        assert!(matches!(err, AuthError::Database(_)));

        let old = h.store.get(tokens.refresh.token_id).await.unwrap();
        assert!(!old.is_revoked);
        assert!(old.revoked_at.is_none());
        assert_eq!(h.store.sessions().len(), 1);

        // The untouched token still rotates once storage recovers
        h.auth
            .refresh(refresh_request(&tokens))
            .await
            .expect("rotation should succeed after the failure");
    }
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_registration_logs_user_id_not_email() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = harness();
    h.auth.register(alice()).await.unwrap();

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("User registered"));
    assert!(output.contains("user_id=1"));
    assert!(!output.contains("alice@example.com"));
}
