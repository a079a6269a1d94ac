//! Mail-exchange check for registration emails.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("malformed email address")]
    Malformed,

    #[error("failed to resolve email domain: {0}")]
    Resolution(String),

    #[error("domain has no MX records")]
    NoMailExchange,
}

#[async_trait]
pub trait EmailVerifier: Send + Sync {
    async fn verify_domain_has_mail_exchange(&self, email: &str) -> Result<(), EmailError>;
}

pub struct DnsEmailVerifier {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsEmailVerifier {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOOKUP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
            timeout,
        }
    }
}

impl Default for DnsEmailVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Domain part of an address; everything after the first `@`.
pub(crate) fn email_domain(email: &str) -> Option<&str> {
    email
        .split_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

#[async_trait]
impl EmailVerifier for DnsEmailVerifier {
    async fn verify_domain_has_mail_exchange(&self, email: &str) -> Result<(), EmailError> {
        let domain = email_domain(email).ok_or(EmailError::Malformed)?;

        let lookup = tokio::time::timeout(self.timeout, self.resolver.mx_lookup(domain))
            .await
            .map_err(|_| EmailError::Resolution("lookup timed out".to_string()))?
            .map_err(|e| EmailError::Resolution(e.to_string()))?;

        if lookup.iter().next().is_none() {
            return Err(EmailError::NoMailExchange);
        }

        tracing::debug!(domain, "Email domain has MX records");
        Ok(())
    }
}
