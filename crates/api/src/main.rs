// Strawberry API Server
// Entry point for the registration, login and token refresh REST API

mod config;
mod handlers;
mod middleware;
mod routes;

use anyhow::{bail, Context};
use config::{Config, HasherKind, LogFormat};
use dotenvy::dotenv;
use std::sync::Arc;
use strawberry_auth::{
    Argon2Hasher, AuthService, BcryptHasher, DnsEmailVerifier, PasswordHasher, PasswordPolicy,
    SessionConfig, SessionService, SigningKeys,
};
use strawberry_database::{
    Database, MemoryStore, PgSessionRepository, PgUserRepository, SessionRepository,
    UserRepository,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

pub struct AppState {
    pub auth_service: AuthService,
    /// `None` when running against the in-process store.
    pub database: Option<Database>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,strawberry_api=debug,tower_http=debug"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Persistent key when configured, otherwise a per-process key outside production.
fn signing_keys(pem: Option<&str>, name: &str, production: bool) -> anyhow::Result<SigningKeys> {
    match pem {
        Some(pem) => SigningKeys::from_pkcs8_pem(pem).with_context(|| format!("Invalid {}", name)),
        None if production => bail!("{} must be set in production", name),
        None => {
            tracing::warn!(
                "{} not set, generating an ephemeral key. Issued tokens will not survive a restart",
                name
            );
            SigningKeys::generate().context("Failed to generate signing key")
        }
    }
}

async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let mut database = None;
    let (users, sessions): (Arc<dyn UserRepository>, Arc<dyn SessionRepository>) =
        match &config.database {
            Some(db_config) => {
                tracing::info!("Connecting to database...");
                let db = Database::new(db_config.clone())
                    .await
                    .context("Failed to connect to database")?;
                db.ping().await.context("Database ping failed")?;
                db.migrate().await.context("Database migration failed")?;
                tracing::info!("Database connected");

                let pool = db.pool().clone();
                database = Some(db);
                (
                    Arc::new(PgUserRepository::new(pool.clone())),
                    Arc::new(PgSessionRepository::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL=memory, data is kept in process memory only");
                let store = MemoryStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
        };

    let production = config.is_production();
    let session_config = SessionConfig::new(
        signing_keys(config.access_key_pem.as_deref(), "ACCESS_TOKEN_PRIVATE_KEY", production)?,
        signing_keys(config.refresh_key_pem.as_deref(), "REFRESH_TOKEN_PRIVATE_KEY", production)?,
    )
    .with_ttls(config.access_token_ttl, config.refresh_token_ttl)
    .with_reuse_policy(config.reuse_policy);
    let session_manager = Arc::new(SessionService::new(session_config, sessions));

    let hasher: Arc<dyn PasswordHasher> = match config.password_hasher {
        HasherKind::Argon2 => Arc::new(Argon2Hasher::new()),
        HasherKind::Bcrypt => Arc::new(
            BcryptHasher::new(config.bcrypt_cost).context("Invalid BCRYPT_COST")?,
        ),
    };

    let auth_service = AuthService::new(
        users,
        session_manager,
        hasher,
        Arc::new(DnsEmailVerifier::new()),
    )
    .with_config(config.auth.clone())
    .with_password_policy(PasswordPolicy {
        min_length: config.password_min_length,
        ..PasswordPolicy::default()
    });
    tracing::info!(policy = ?config.reuse_policy, "Auth service initialized");

    Ok(Arc::new(AppState {
        auth_service,
        database,
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);

    tracing::info!("Starting Strawberry API Server");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    let state = build_state(&config).await?;

    let app = routes::create_router(state.clone())
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server ready at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(database) = &state.database {
        database.close().await;
        tracing::info!("Database connections closed");
    }

    Ok(())
}
