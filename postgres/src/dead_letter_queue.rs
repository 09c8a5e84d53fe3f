//! Dead Letter Queue for messages that exhausted their redeliveries.
//!
//! Provides persistent storage and management of messages whose listener
//! gave up on them. Entries are recorded before the dead-letter handler
//! runs; a failed compensation leaves its entry pending for an operator.

use async_trait::async_trait;
use shipkafka_core::dead_letter::{DeadLetter, DeadLetterStatus, DeadLetterStore, NewDeadLetter};
use shipkafka_core::event::SerializedEvent;
use shipkafka_core::store::StoreError;
use sqlx::{PgPool, Row};

use crate::store::db;

const COLUMNS: &str = r"
    id, topic, group_id, event_type, event_key, event_data, metadata,
    error_message, attempts, first_failed_at, last_failed_at, status,
    resolved_at, resolved_by, resolution_notes
";

/// `PostgreSQL`-based Dead Letter Queue.
///
/// # Example
///
/// ```no_run
/// use shipkafka_postgres::DeadLetterQueue;
/// use shipkafka_core::dead_letter::DeadLetterStore;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
///
/// let pending = dlq.list_pending(100).await?;
/// println!("Pending dead letters: {}", pending.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a new Dead Letter Queue with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get count of pending dead letters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(db)?;
        Ok(count)
    }

    async fn close(
        &self,
        id: i64,
        status: DeadLetterStatus,
        resolved_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r"
            UPDATE dead_letters
            SET status = $1,
                resolved_at = NOW(),
                resolved_by = $2,
                resolution_notes = $3
            WHERE id = $4 AND status = 'pending'
            ",
        )
        .bind(status.as_str())
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Database(format!(
                "Dead letter {id} not found or already handled"
            )));
        }

        tracing::info!(dlq_id = id, status = status.as_str(), "Dead letter closed");
        Ok(())
    }

    fn row_to_dead_letter(row: &sqlx::postgres::PgRow) -> Result<DeadLetter, StoreError> {
        let status: String = row.try_get("status").map_err(db)?;
        let attempts: i32 = row.try_get("attempts").map_err(db)?;

        Ok(DeadLetter {
            id: row.try_get("id").map_err(db)?,
            topic: row.try_get("topic").map_err(db)?,
            group_id: row.try_get("group_id").map_err(db)?,
            event: SerializedEvent::new(
                row.try_get("event_type").map_err(db)?,
                row.try_get("event_key").map_err(db)?,
                row.try_get("event_data").map_err(db)?,
                row.try_get("metadata").map_err(db)?,
            ),
            error_message: row.try_get("error_message").map_err(db)?,
            attempts: u32::try_from(attempts)
                .map_err(|_| StoreError::Serialization(format!("attempts {attempts} out of range")))?,
            first_failed_at: row.try_get("first_failed_at").map_err(db)?,
            last_failed_at: row.try_get("last_failed_at").map_err(db)?,
            status: status.parse()?,
            resolved_at: row.try_get("resolved_at").map_err(db)?,
            resolved_by: row.try_get("resolved_by").map_err(db)?,
            resolution_notes: row.try_get("resolution_notes").map_err(db)?,
        })
    }
}

#[async_trait]
impl DeadLetterStore for DeadLetterQueue {
    async fn add_entry(&self, entry: NewDeadLetter) -> Result<i64, StoreError> {
        let attempts = i32::try_from(entry.attempts)
            .map_err(|_| StoreError::Serialization(format!("attempts {} out of range", entry.attempts)))?;

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO dead_letters (
                topic, group_id, event_type, event_key, event_data, metadata,
                error_message, attempts, first_failed_at, last_failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            ",
        )
        .bind(&entry.topic)
        .bind(&entry.group_id)
        .bind(&entry.event.event_type)
        .bind(&entry.event.key)
        .bind(&entry.event.data)
        .bind(&entry.event.metadata)
        .bind(&entry.error_message)
        .bind(attempts)
        .bind(entry.first_failed_at)
        .bind(entry.last_failed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;

        tracing::warn!(
            dlq_id = id,
            topic = %entry.topic,
            group = %entry.group_id,
            event_type = %entry.event.event_type,
            error = %entry.error_message,
            attempts = entry.attempts,
            "Message added to Dead Letter Queue"
        );

        Ok(id)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let query = format!(
            "SELECT {COLUMNS} FROM dead_letters WHERE status = 'pending' ORDER BY first_failed_at, id LIMIT $1"
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.iter().map(Self::row_to_dead_letter).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<DeadLetter>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM dead_letters WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(Self::row_to_dead_letter).transpose()
    }

    async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        self.close(id, DeadLetterStatus::Resolved, Some(resolved_by), notes)
            .await?;
        metrics::counter!("shipkafka_dead_letters_resolved_total").increment(1);
        Ok(())
    }

    async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        self.close(id, DeadLetterStatus::Discarded, None, Some(reason))
            .await?;
        tracing::warn!(dlq_id = id, reason, "Dead letter discarded");
        metrics::counter!("shipkafka_dead_letters_discarded_total").increment(1);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dead_letter_status_roundtrip() {
        for status in [
            DeadLetterStatus::Pending,
            DeadLetterStatus::Resolved,
            DeadLetterStatus::Discarded,
        ] {
            let parsed: DeadLetterStatus = status.as_str().parse().expect("valid status should parse");
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn dead_letter_status_invalid() {
        assert!("processing".parse::<DeadLetterStatus>().is_err());
    }
}
