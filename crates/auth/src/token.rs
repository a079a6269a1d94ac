//! ES256 token issuance and verification.

use crate::error::{AuthError, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::SecretKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strawberry_models::{Role, UserId};
use uuid::Uuid;

pub const ISSUER: &str = "strawberry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub uid: UserId,
    pub rol: Role,
    pub typ: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// A signed token together with the identifiers the server tracks it by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub token: String,
    #[serde(rename = "jti")]
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: Token,
    pub refresh: Token,
}

/// P-256 key pair used to sign and verify one kind of token.
#[derive(Clone)]
pub struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeys").finish_non_exhaustive()
    }
}

impl SigningKeys {
    /// Fresh key pair that lives only as long as the process.
    pub fn generate() -> Result<Self> {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        Self::from_secret(&secret)
    }

    /// Load a persistent PKCS#8 private key; the public half is derived.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let secret = SecretKey::from_pkcs8_pem(pem)
            .map_err(|e| AuthError::Internal(format!("Invalid P-256 private key: {}", e)))?;
        Self::from_secret(&secret)
    }

    fn from_secret(secret: &SecretKey) -> Result<Self> {
        let private_pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::Internal(format!("Failed to encode private key: {}", e)))?;
        let public_pem = secret
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::Internal(format!("Failed to encode public key: {}", e)))?;

        let encoding = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Unusable private key: {}", e)))?;
        let decoding = DecodingKey::from_ec_pem(public_pem.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Unusable public key: {}", e)))?;

        Ok(Self { encoding, decoding })
    }
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub kind: TokenKind,
    pub ttl: Duration,
    pub keys: SigningKeys,
}

impl TokenConfig {
    pub fn new(kind: TokenKind, ttl: Duration, keys: SigningKeys) -> Self {
        Self { kind, ttl, keys }
    }

    /// Sign a token of this kind for `user_id`.
    pub fn issue(&self, user_id: UserId, role: Role) -> Result<Token> {
        let issued_at = Utc::now();
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AuthError::Internal(format!("{:?} token TTL out of range", self.kind)))?;
        let token_id = Uuid::now_v7();

        let claims = Claims {
            uid: user_id,
            rol: role,
            typ: self.kind,
            iss: ISSUER.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: token_id,
        };

        let token = encode(&Header::new(Algorithm::ES256), &claims, &self.keys.encoding)
            .map_err(|e| AuthError::Internal(format!("Failed to sign token: {}", e)))?;

        // Second precision, as carried in the claims
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or(expires_at);

        Ok(Token {
            token,
            token_id,
            expires_at,
        })
    }

    /// Check signature, algorithm, issuer, expiry and kind.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.keys.decoding, &validation)?.claims;

        if claims.typ != self.kind {
            return Err(AuthError::InvalidToken(format!(
                "Expected {:?} token, got {:?}",
                self.kind, claims.typ
            )));
        }

        Ok(claims)
    }
}

/// Hex SHA-256 of a token, as stored in the session row.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
