use super::{SessionStore, Transaction, UserStore};
use crate::error::{DatabaseError, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use strawberry_models::{NewSessionRecord, NewUser, Session, UserId};
use uuid::Uuid;

/// Postgres unit of work. Dropping it without `commit()` rolls back.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }
}

#[async_trait]
impl UserStore for PgTransaction {
    async fn save_user(&mut self, new_user: &NewUser) -> Result<UserId> {
        let (id,): (UserId,) = sqlx::query_as(
            r#"
            INSERT INTO users (name, email, password_hash, is_store)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(new_user.is_store)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| DatabaseError::classify(e, "User", &new_user.email))?;

        Ok(id)
    }
}

#[async_trait]
impl SessionStore for PgTransaction {
    async fn create_session(&mut self, record: &NewSessionRecord) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sessions (
                user_id, token_id, token_hash,
                user_agent, device, ip_address, location, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(record.user_id)
        .bind(record.token_id)
        .bind(&record.token_hash)
        .bind(&record.user_agent)
        .bind(&record.device)
        .bind(&record.ip_address)
        .bind(&record.location)
        .bind(record.expires_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| DatabaseError::classify(e, "Session", &record.token_id.to_string()))?;

        Ok(id)
    }

    async fn find_session_for_update_nowait(&mut self, token_id: Uuid) -> Result<Session> {
        sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE token_id = $1 FOR UPDATE NOWAIT",
        )
        .bind(token_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| DatabaseError::classify(e, "Session", &token_id.to_string()))
    }

    async fn update_session(&mut self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions
            SET is_revoked = $2, revoked_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(session.is_revoked)
        .bind(session.revoked_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let PgTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
