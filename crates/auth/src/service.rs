use crate::email::EmailVerifier;
use crate::error::{AuthError, Result};
use crate::password::PasswordHasher;
use crate::policy::{is_valid_email_format, AuthConfig, PasswordPolicy};
use crate::session::SessionManager;
use crate::token::{Claims, TokenPair};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strawberry_database::{DatabaseError, Transaction, UserRepository, UserStore};
use strawberry_models::{Credentials, NewSession, NewUser, RefreshSession, Role, User};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

pub struct AuthService {
    config: AuthConfig,
    password_policy: PasswordPolicy,
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionManager>,
    hasher: Arc<dyn PasswordHasher>,
    email_verifier: Arc<dyn EmailVerifier>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionManager>,
        hasher: Arc<dyn PasswordHasher>,
        email_verifier: Arc<dyn EmailVerifier>,
    ) -> Self {
        Self {
            config: AuthConfig::default(),
            password_policy: PasswordPolicy::default(),
            users,
            sessions,
            hasher,
            email_verifier,
        }
    }

    pub fn with_config(mut self, config: AuthConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    /// Create an account and its first session in one transaction.
    #[tracing::instrument(skip(self, request), fields(user_id = tracing::field::Empty))]
    pub async fn register(&self, request: RegisterRequest) -> Result<TokenPair> {
        // Fail fast before paying for validation and hashing
        match self.users.get_by_email(&request.email).await {
            Ok(_) => return Err(AuthError::DuplicateEmail),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.validate_registration(&request).await?;

        let password_hash = self.hasher.hash(&request.password).await?;
        let new_user = NewUser {
            name: request.name,
            email: request.email,
            password_hash,
            is_store: false,
        };

        let mut tx = self.users.begin().await?;
        let user_id = match tx.save_user(&new_user).await {
            Ok(id) => id,
            Err(DatabaseError::DuplicateEntry(_)) => return Err(AuthError::DuplicateEmail),
            Err(e) => return Err(e.into()),
        };
        tracing::Span::current().record("user_id", user_id);

        let tokens = self
            .sessions
            .create_in(&mut *tx, NewSession::for_user(user_id, Role::Customer))
            .await?;

        match tx.commit().await {
            Ok(()) => {}
            Err(DatabaseError::DuplicateEntry(_)) => return Err(AuthError::DuplicateEmail),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id, "User registered");
        Ok(tokens)
    }

    /// Exchange credentials for a new session.
    ///
    /// Unknown emails and wrong passwords fail identically.
    #[tracing::instrument(skip(self, credentials))]
    pub async fn login(&self, credentials: Credentials) -> Result<TokenPair> {
        let user = match self.users.get_by_email(&credentials.email).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => User::default(),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self
            .hasher
            .compare(&user.password_hash, &credentials.password)
            .await
        {
            tracing::debug!(error = %e, "Login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self
            .sessions
            .create(NewSession::for_user(user.id, user.role()))
            .await?;

        tracing::info!(user_id = user.id, "User logged in");
        Ok(tokens)
    }

    pub async fn refresh(&self, request: RefreshSession) -> Result<TokenPair> {
        self.sessions.refresh(request).await
    }

    pub async fn verify_access_token(&self, token: &str) -> Result<Claims> {
        self.sessions.verify_access_token(token).await
    }

    async fn validate_registration(&self, request: &RegisterRequest) -> Result<()> {
        if self.config.check_password {
            let details = self.password_policy.violations(&request.password);
            if !details.is_empty() {
                return Err(AuthError::bad_request("Password is too weak", details));
            }
        }

        if self.config.check_email_format && !is_valid_email_format(&request.email) {
            return Err(AuthError::bad_request(
                "Email has invalid format",
                vec!["Email has invalid format".to_string()],
            ));
        }

        if self.config.check_email_mx {
            if let Err(e) = self
                .email_verifier
                .verify_domain_has_mail_exchange(&request.email)
                .await
            {
                return Err(AuthError::bad_request(
                    "Email domain cannot receive mail",
                    vec![e.to_string()],
                ));
            }
        }

        Ok(())
    }
}
