use anyhow::{bail, Context};
use std::str::FromStr;
use std::time::Duration;
use strawberry_auth::password::BCRYPT_DEFAULT_COST;
use strawberry_auth::policy::DEFAULT_MIN_PASSWORD_LENGTH;
use strawberry_auth::session::{DEFAULT_ACCESS_TTL_MINUTES, DEFAULT_REFRESH_TTL_DAYS};
use strawberry_auth::{AuthConfig, ReusePolicy};
use strawberry_database::DatabaseConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasherKind {
    Argon2,
    Bcrypt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    /// `None` runs against the in-process store.
    pub database: Option<DatabaseConfig>,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    pub access_key_pem: Option<String>,
    pub refresh_key_pem: Option<String>,
    pub reuse_policy: ReusePolicy,
    pub password_hasher: HasherKind,
    pub bcrypt_cost: u32,
    pub password_min_length: usize,
    pub auth: AuthConfig,
    pub request_timeout: Duration,
    pub log_format: LogFormat,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// PEM from `KEY`, or from the file named by `KEY_FILE`.
fn env_pem(key: &str) -> anyhow::Result<Option<String>> {
    if let Ok(pem) = std::env::var(key) {
        return Ok(Some(pem));
    }

    let file_key = format!("{}_FILE", key);
    match std::env::var(&file_key) {
        Ok(path) => std::fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("Failed to read {} from {}", file_key, path)),
        Err(_) => Ok(None),
    }
}

/// Token lifetimes are capped at ten years.
const MAX_TTL_MINUTES: i64 = 10 * 365 * 24 * 60;
const MAX_TTL_DAYS: i64 = 10 * 365;

fn ttl_minutes(key: &str, minutes: i64) -> anyhow::Result<chrono::Duration> {
    if !(1..=MAX_TTL_MINUTES).contains(&minutes) {
        bail!("{} must be between 1 and {}, got {}", key, MAX_TTL_MINUTES, minutes);
    }
    Ok(chrono::Duration::minutes(minutes))
}

fn ttl_days(key: &str, days: i64) -> anyhow::Result<chrono::Duration> {
    if !(1..=MAX_TTL_DAYS).contains(&days) {
        bail!("{} must be between 1 and {}, got {}", key, MAX_TTL_DAYS, days);
    }
    Ok(chrono::Duration::days(days))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = match std::env::var("DATABASE_URL") {
            Ok(url) if url == "memory" => None,
            _ => Some(DatabaseConfig::from_env()),
        };

        let password_hasher = match std::env::var("PASSWORD_HASHER")
            .unwrap_or_else(|_| "argon2".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "argon2" => HasherKind::Argon2,
            "bcrypt" => HasherKind::Bcrypt,
            other => bail!("Unknown PASSWORD_HASHER: {}", other),
        };

        let reuse_policy = match std::env::var("REFRESH_REUSE_POLICY") {
            Ok(value) => value.parse::<ReusePolicy>().map_err(anyhow::Error::msg)?,
            Err(_) => ReusePolicy::default(),
        };

        let log_format = match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let defaults = AuthConfig::default();

        Ok(Self {
            server_host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env_parse("SERVER_PORT", 8080),
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            database,
            access_token_ttl: ttl_minutes(
                "ACCESS_TOKEN_TTL_MINUTES",
                env_parse("ACCESS_TOKEN_TTL_MINUTES", DEFAULT_ACCESS_TTL_MINUTES),
            )?,
            refresh_token_ttl: ttl_days(
                "REFRESH_TOKEN_TTL_DAYS",
                env_parse("REFRESH_TOKEN_TTL_DAYS", DEFAULT_REFRESH_TTL_DAYS),
            )?,
            access_key_pem: env_pem("ACCESS_TOKEN_PRIVATE_KEY")?,
            refresh_key_pem: env_pem("REFRESH_TOKEN_PRIVATE_KEY")?,
            reuse_policy,
            password_hasher,
            bcrypt_cost: env_parse("BCRYPT_COST", BCRYPT_DEFAULT_COST),
            password_min_length: env_parse("PASSWORD_MIN_LENGTH", DEFAULT_MIN_PASSWORD_LENGTH),
            auth: AuthConfig {
                check_password: env_bool("CHECK_PASSWORD", defaults.check_password),
                check_email_format: env_bool("CHECK_EMAIL_FORMAT", defaults.check_email_format),
                check_email_mx: env_bool("CHECK_EMAIL_MX", defaults.check_email_mx),
            },
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 30)),
            log_format,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
