use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type UserId = i64;

/// A registered account.
///
/// `Default` yields the "empty" user that login compares against when no
/// account matches the presented email.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,

    #[serde(skip_serializing, default)]
    pub password_hash: String,

    // Store owners publish offers; everyone else is a customer
    pub is_store: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Role {
        if self.is_store {
            Role::Store
        } else {
            Role::Customer
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub is_store: bool,
}

/// Email + cleartext password presented at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Role carried in issued tokens. Not enforced by the session engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Store,
}
