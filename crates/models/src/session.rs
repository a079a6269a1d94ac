use crate::user::{Role, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One link of a refresh-token lineage.
///
/// A row is created for every issued refresh token and is only ever mutated
/// to flip `is_revoked` when its token is rotated away. Rows are kept after
/// rotation so that a replayed token can be recognised.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: i64,
    pub user_id: UserId,
    pub token_id: Uuid,
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Session hint handed to the session manager when a lineage starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSession {
    pub user_id: UserId,
    #[serde(default)]
    pub role: Role,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
}

impl NewSession {
    /// Hint carrying only the identity, as issued on login.
    pub fn for_user(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            ..Default::default()
        }
    }
}

/// Row about to be inserted into `sessions`.
#[derive(Debug, Clone)]
pub struct NewSessionRecord {
    pub user_id: UserId,
    pub token_id: Uuid,
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Refresh request: the presented token plus the current caller's context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshSession {
    pub token: String,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
}
