//! `PostgreSQL` record stores for both authorities.
//!
//! Concurrency tokens live in a `version` column. A record with token `0`
//! is inserted only if its id is unused; any other record is updated only if
//! the stored token still matches. Either way the stored token becomes
//! `held + 1`.

use async_trait::async_trait;
use shipkafka_core::store::{BookingRepository, Reservation, ShipRepository, StoreError};
use shipkafka_core::{Booking, BookingId, BookingStatus, Customer, CustomerId, Ship, ShipId};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

pub(crate) fn db(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn to_i32(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Serialization(format!("{what} {value} out of range")))
}

fn to_u32(value: i32, what: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Serialization(format!("{what} {value} out of range")))
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("version {value} out of range")))
}

fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Serialization(format!("version {value} out of range")))
}

/// Both authorities' stores on one connection pool.
///
/// # Example
///
/// ```no_run
/// use shipkafka_postgres::PostgresStore;
///
/// # async fn example() -> Result<(), shipkafka_core::store::StoreError> {
/// let store = PostgresStore::connect("postgres://localhost/shipkafka", 10).await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with at most `max_connections` pooled connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Use an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_booking(row: &PgRow) -> Result<Booking, StoreError> {
        let status: String = row.try_get("status").map_err(db)?;
        let status = status
            .parse::<BookingStatus>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Booking::restore(
            BookingId::from_uuid(row.try_get("id").map_err(db)?),
            ShipId::from_uuid(row.try_get("ship_id").map_err(db)?),
            to_u32(row.try_get("container_count").map_err(db)?, "container count")?,
            status,
            row.try_get("created_on").map_err(db)?,
            row.try_get("last_updated_on").map_err(db)?,
            to_u64(row.try_get("version").map_err(db)?)?,
        ))
    }

    fn row_to_ship(row: &PgRow) -> Result<Ship, StoreError> {
        Ok(Ship {
            id: ShipId::from_uuid(row.try_get("id").map_err(db)?),
            name: row.try_get("name").map_err(db)?,
            available_containers: to_u32(
                row.try_get("available_containers").map_err(db)?,
                "available containers",
            )?,
            damaged: row.try_get("damaged").map_err(db)?,
            version: to_u64(row.try_get("version").map_err(db)?)?,
        })
    }

    async fn booking_ids_of(&self, customer: CustomerId) -> Result<Vec<BookingId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM bookings WHERE customer_id = $1 ORDER BY created_on, id",
        )
        .bind(customer.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(ids.into_iter().map(BookingId::from_uuid).collect())
    }

    async fn stored_version(
        &self,
        table: &'static str,
        id: &Uuid,
    ) -> Result<u64, StoreError> {
        let query = format!("SELECT version FROM {table} WHERE id = $1");
        let version: Option<i64> = sqlx::query_scalar(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        version.map_or(Ok(0), to_u64)
    }

    async fn write_booking(
        tx: &mut Transaction<'_, Postgres>,
        booking: &Booking,
        customer: Option<CustomerId>,
    ) -> Result<bool, StoreError> {
        let next = to_i64(booking.version + 1)?;
        let written = if booking.version == 0 {
            sqlx::query(
                r"
                INSERT INTO bookings (
                    id, customer_id, ship_id, container_count, status,
                    created_on, last_updated_on, version
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(booking.id.as_uuid())
            .bind(customer.map(|c| *c.as_uuid()))
            .bind(booking.ship_id.as_uuid())
            .bind(to_i32(booking.container_count, "container count")?)
            .bind(booking.status().as_str())
            .bind(booking.created_on)
            .bind(booking.last_updated_on)
            .bind(next)
            .execute(&mut **tx)
            .await
            .map_err(db)?
        } else {
            sqlx::query(
                r"
                UPDATE bookings
                SET ship_id = $2, container_count = $3, status = $4,
                    last_updated_on = $5, version = $6
                WHERE id = $1 AND version = $7
                ",
            )
            .bind(booking.id.as_uuid())
            .bind(booking.ship_id.as_uuid())
            .bind(to_i32(booking.container_count, "container count")?)
            .bind(booking.status().as_str())
            .bind(booking.last_updated_on)
            .bind(next)
            .bind(to_i64(booking.version)?)
            .execute(&mut **tx)
            .await
            .map_err(db)?
        };
        Ok(written.rows_affected() == 1)
    }

    async fn write_ship(tx: &mut Transaction<'_, Postgres>, ship: &Ship) -> Result<bool, StoreError> {
        let next = to_i64(ship.version + 1)?;
        let available = to_i32(ship.available_containers, "available containers")?;

        let written = if ship.version == 0 {
            sqlx::query(
                r"
                INSERT INTO ships (id, name, available_containers, damaged, version)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(ship.id.as_uuid())
            .bind(&ship.name)
            .bind(available)
            .bind(ship.damaged)
            .bind(next)
            .execute(&mut **tx)
            .await
            .map_err(db)?
        } else {
            sqlx::query(
                r"
                UPDATE ships
                SET name = $2, available_containers = $3, damaged = $4, version = $5
                WHERE id = $1 AND version = $6
                ",
            )
            .bind(ship.id.as_uuid())
            .bind(&ship.name)
            .bind(available)
            .bind(ship.damaged)
            .bind(next)
            .bind(to_i64(ship.version)?)
            .execute(&mut **tx)
            .await
            .map_err(db)?
        };
        Ok(written.rows_affected() == 1)
    }

    async fn ship_conflict(&self, ship: &Ship) -> StoreError {
        match self.stored_version("ships", ship.id.as_uuid()).await {
            Ok(actual) => StoreError::conflict("ship", ship.id, ship.version, actual),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl BookingRepository for PostgresStore {
    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query("SELECT id, first_name, last_name FROM customers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Customer {
            id,
            first_name: row.try_get("first_name").map_err(db)?,
            last_name: row.try_get("last_name").map_err(db)?,
            bookings: self.booking_ids_of(id).await?,
        }))
    }

    async fn find_all_customers(&self) -> Result<Vec<Customer>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, first_name, last_name FROM customers ORDER BY last_name, first_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let owned = sqlx::query(
            "SELECT id, customer_id FROM bookings WHERE customer_id IS NOT NULL ORDER BY created_on, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        let mut by_customer: HashMap<Uuid, Vec<BookingId>> = HashMap::new();
        for row in &owned {
            let customer: Uuid = row.try_get("customer_id").map_err(db)?;
            let booking: Uuid = row.try_get("id").map_err(db)?;
            by_customer
                .entry(customer)
                .or_default()
                .push(BookingId::from_uuid(booking));
        }

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(db)?;
                Ok(Customer {
                    id: CustomerId::from_uuid(id),
                    first_name: row.try_get("first_name").map_err(db)?,
                    last_name: row.try_get("last_name").map_err(db)?,
                    bookings: by_customer.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn save_customer(&self, customer: Customer) -> Result<Customer, StoreError> {
        sqlx::query(
            r"
            INSERT INTO customers (id, first_name, last_name) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name
            ",
        )
        .bind(customer.id.as_uuid())
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(customer)
    }

    async fn delete_customer(&self, id: CustomerId) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM customers WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn save_customer_with_booking(
        &self,
        customer: Customer,
        mut booking: Booking,
    ) -> Result<Booking, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let owner: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM customers WHERE id = $1 FOR UPDATE")
                .bind(customer.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db)?;
        if owner.is_none() {
            tx.rollback().await.map_err(db)?;
            return Err(StoreError::conflict("customer", customer.id, 1, 0));
        }

        if !Self::write_booking(&mut tx, &booking, Some(customer.id)).await? {
            tx.rollback().await.map_err(db)?;
            let actual = self.stored_version("bookings", booking.id.as_uuid()).await?;
            return Err(StoreError::conflict("booking", booking.id, booking.version, actual));
        }

        tx.commit().await.map_err(db)?;
        booking.version += 1;
        Ok(booking)
    }

    async fn find_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, ship_id, container_count, status, created_on, last_updated_on, version
            FROM bookings WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(Self::row_to_booking).transpose()
    }

    async fn find_bookings(&self, ids: &[BookingId]) -> Result<Vec<Booking>, StoreError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query(
            r"
            SELECT id, ship_id, container_count, status, created_on, last_updated_on, version
            FROM bookings WHERE id = ANY($1)
            ",
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut found: HashMap<BookingId, Booking> = rows
            .iter()
            .map(|row| Self::row_to_booking(row).map(|b| (b.id, b)))
            .collect::<Result<_, _>>()?;
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    async fn find_all_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, ship_id, container_count, status, created_on, last_updated_on, version
            FROM bookings ORDER BY created_on, id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(Self::row_to_booking).collect()
    }

    async fn save_booking(&self, mut booking: Booking) -> Result<Booking, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        if !Self::write_booking(&mut tx, &booking, None).await? {
            tx.rollback().await.map_err(db)?;
            let actual = self.stored_version("bookings", booking.id.as_uuid()).await?;
            return Err(StoreError::conflict("booking", booking.id, booking.version, actual));
        }
        tx.commit().await.map_err(db)?;
        booking.version += 1;
        Ok(booking)
    }

    async fn find_confirmed_bookings(
        &self,
        customer: CustomerId,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, ship_id, container_count, status, created_on, last_updated_on, version
            FROM bookings
            WHERE customer_id = $1 AND status = $2
            ORDER BY created_on, id
            ",
        )
        .bind(customer.as_uuid())
        .bind(BookingStatus::Confirmed.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(Self::row_to_booking).collect()
    }

    async fn find_bookings_by_ship(&self, ship: ShipId) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, ship_id, container_count, status, created_on, last_updated_on, version
            FROM bookings WHERE ship_id = $1
            ORDER BY created_on, id
            ",
        )
        .bind(ship.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(Self::row_to_booking).collect()
    }
}

#[async_trait]
impl ShipRepository for PostgresStore {
    async fn find_ship(&self, id: ShipId) -> Result<Option<Ship>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, available_containers, damaged, version FROM ships WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.as_ref().map(Self::row_to_ship).transpose()
    }

    async fn find_all_ships(&self) -> Result<Vec<Ship>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, available_containers, damaged, version FROM ships ORDER BY name, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(Self::row_to_ship).collect()
    }

    async fn save_ship(&self, mut ship: Ship) -> Result<Ship, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        if !Self::write_ship(&mut tx, &ship).await? {
            tx.rollback().await.map_err(db)?;
            return Err(self.ship_conflict(&ship).await);
        }
        tx.commit().await.map_err(db)?;

        ship.version += 1;
        Ok(ship)
    }

    async fn reserve(&self, mut ship: Ship, reservation: Reservation) -> Result<Ship, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        if !Self::write_ship(&mut tx, &ship).await? {
            tx.rollback().await.map_err(db)?;
            return Err(self.ship_conflict(&ship).await);
        }

        let held = sqlx::query(
            r"
            INSERT INTO ship_reservations (booking_id, ship_id, containers)
            VALUES ($1, $2, $3)
            ON CONFLICT (booking_id) DO NOTHING
            ",
        )
        .bind(reservation.booking_id.as_uuid())
        .bind(reservation.ship_id.as_uuid())
        .bind(to_i32(reservation.containers, "containers")?)
        .execute(&mut *tx)
        .await
        .map_err(db)?;
        if held.rows_affected() != 1 {
            tx.rollback().await.map_err(db)?;
            return Err(StoreError::conflict("reservation", reservation.booking_id, 0, 1));
        }

        tx.commit().await.map_err(db)?;
        ship.version += 1;
        Ok(ship)
    }

    async fn release(&self, mut ship: Ship, booking_id: BookingId) -> Result<Ship, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        if !Self::write_ship(&mut tx, &ship).await? {
            tx.rollback().await.map_err(db)?;
            return Err(self.ship_conflict(&ship).await);
        }

        let dropped = sqlx::query("DELETE FROM ship_reservations WHERE booking_id = $1")
            .bind(booking_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        if dropped.rows_affected() != 1 {
            tx.rollback().await.map_err(db)?;
            return Err(StoreError::conflict("reservation", booking_id, 1, 0));
        }

        tx.commit().await.map_err(db)?;
        ship.version += 1;
        Ok(ship)
    }

    async fn find_reservation(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(
            "SELECT booking_id, ship_id, containers FROM ship_reservations WHERE booking_id = $1",
        )
        .bind(booking_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(|row| {
            Ok(Reservation {
                booking_id: BookingId::from_uuid(row.try_get("booking_id").map_err(db)?),
                ship_id: ShipId::from_uuid(row.try_get("ship_id").map_err(db)?),
                containers: to_u32(row.try_get("containers").map_err(db)?, "containers")?,
            })
        })
        .transpose()
    }

    async fn delete_ship(&self, id: ShipId) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM ships WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(deleted.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_counts_are_rejected() {
        assert!(matches!(
            to_u32(-1, "available containers"),
            Err(StoreError::Serialization(_))
        ));
        assert!(matches!(to_u64(-5), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn counts_round_trip_within_range() {
        assert_eq!(to_i32(42, "container count").ok(), Some(42));
        assert_eq!(to_u32(42, "container count").ok(), Some(42));
        assert_eq!(to_i64(7).ok(), Some(7));
    }
}
