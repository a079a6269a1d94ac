use super::{SessionRepository, Transaction};
use crate::error::{DatabaseError, Result};
use crate::repositories::transaction::PgTransaction;
use async_trait::async_trait;
use sqlx::PgPool;
use strawberry_models::{NewSessionRecord, Session, UserId};
use uuid::Uuid;

pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create(&self, record: &NewSessionRecord) -> Result<i64> {
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
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::classify(e, "Session", &record.token_id.to_string()))?;

        Ok(id)
    }

    async fn get(&self, token_id: Uuid) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Session", &token_id.to_string()))?;

        Ok(session)
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET is_revoked = TRUE, revoked_at = NOW(), updated_at = NOW()
            WHERE user_id = $1 AND is_revoked = FALSE
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(PgTransaction::begin(&self.pool).await?))
    }
}
