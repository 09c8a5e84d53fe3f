//! `PostgreSQL` saga ledger.
//!
//! Both authorities may share a database; each reads and writes only the
//! rows tagged with its own authority name.

use crate::store::db;
use async_trait::async_trait;
use shipkafka_core::BookingId;
use shipkafka_core::saga::{SagaEntry, SagaLog, SagaStep};
use shipkafka_core::store::StoreError;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Saga ledger of one authority.
#[derive(Clone)]
pub struct PostgresSagaLog {
    pool: PgPool,
    authority: String,
}

impl PostgresSagaLog {
    /// Ledger for `authority` (e.g. `"booking"`, `"capacity"`).
    #[must_use]
    pub fn new(pool: PgPool, authority: impl Into<String>) -> Self {
        Self {
            pool,
            authority: authority.into(),
        }
    }
}

#[async_trait]
impl SagaLog for PostgresSagaLog {
    async fn append(&self, entry: SagaEntry) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&entry.step)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO saga_log (authority, booking_id, step, is_final, payload, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(&self.authority)
        .bind(entry.booking_id.as_uuid())
        .bind(entry.step.name())
        .bind(entry.step.is_final())
        .bind(payload)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        tracing::debug!(
            authority = %self.authority,
            booking_id = %entry.booking_id,
            step = entry.step.name(),
            "Saga step recorded"
        );
        Ok(())
    }

    async fn history(&self, booking_id: BookingId) -> Result<Vec<SagaEntry>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT payload, recorded_at FROM saga_log
            WHERE authority = $1 AND booking_id = $2
            ORDER BY seq
            ",
        )
        .bind(&self.authority)
        .bind(booking_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get("payload").map_err(db)?;
                let step: SagaStep = serde_json::from_value(payload)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(SagaEntry::new(
                    booking_id,
                    step,
                    row.try_get("recorded_at").map_err(db)?,
                ))
            })
            .collect()
    }

    async fn in_flight(&self) -> Result<Vec<BookingId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r"
            SELECT booking_id FROM (
                SELECT DISTINCT ON (booking_id) booking_id, is_final, seq
                FROM saga_log
                WHERE authority = $1
                ORDER BY booking_id, seq DESC
            ) latest
            WHERE NOT is_final
            ORDER BY seq
            ",
        )
        .bind(&self.authority)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(ids.into_iter().map(BookingId::from_uuid).collect())
    }
}
