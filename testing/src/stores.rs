//! In-memory record stores with the same optimistic-write contract as the
//! Postgres ones.

use async_trait::async_trait;
use chrono::Utc;
use shipkafka_core::dead_letter::{DeadLetter, DeadLetterStatus, DeadLetterStore, NewDeadLetter};
use shipkafka_core::saga::{SagaEntry, SagaLog};
use shipkafka_core::store::{BookingRepository, Reservation, ShipRepository, StoreError};
use shipkafka_core::{Booking, BookingId, BookingStatus, Customer, CustomerId, Ship, ShipId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, RwLock};

/// Counts down injected conflicts. Each call to `take` consumes one.
#[derive(Debug, Default)]
struct ConflictBudget(AtomicU32);

impl ConflictBudget {
    fn set(&self, count: u32) {
        self.0.store(count, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn check_version(
    entity: &'static str,
    id: impl ToString,
    stored: Option<u64>,
    held: u64,
) -> Result<(), StoreError> {
    let actual = stored.unwrap_or(0);
    if actual == held {
        Ok(())
    } else {
        Err(StoreError::conflict(entity, id, held, actual))
    }
}

/// Booking authority store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryBookingRepository {
    customers: RwLock<HashMap<CustomerId, Customer>>,
    bookings: RwLock<HashMap<BookingId, Booking>>,
    owners: RwLock<HashMap<BookingId, CustomerId>>,
    conflicts: ConflictBudget,
}

impl InMemoryBookingRepository {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` booking writes fail with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.conflicts.set(count);
    }

    /// Number of stored bookings.
    pub async fn booking_count(&self) -> usize {
        self.bookings.read().await.len()
    }
}

/// `customer` with its booking list rebuilt from ownership, oldest first.
fn with_bookings(
    mut customer: Customer,
    owners: &HashMap<BookingId, CustomerId>,
    bookings: &HashMap<BookingId, Booking>,
) -> Customer {
    let mut owned: Vec<&Booking> = owners
        .iter()
        .filter(|(_, owner)| **owner == customer.id)
        .filter_map(|(id, _)| bookings.get(id))
        .collect();
    owned.sort_by_key(|b| (b.created_on, *b.id.as_uuid()));
    customer.bookings = owned.into_iter().map(|b| b.id).collect();
    customer
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        let customers = self.customers.read().await;
        let bookings = self.bookings.read().await;
        let owners = self.owners.read().await;
        Ok(customers
            .get(&id)
            .cloned()
            .map(|c| with_bookings(c, &owners, &bookings)))
    }

    async fn find_all_customers(&self) -> Result<Vec<Customer>, StoreError> {
        let customers = self.customers.read().await;
        let bookings = self.bookings.read().await;
        let owners = self.owners.read().await;
        let mut all: Vec<Customer> = customers
            .values()
            .cloned()
            .map(|c| with_bookings(c, &owners, &bookings))
            .collect();
        all.sort_by(|a, b| (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name)));
        Ok(all)
    }

    async fn save_customer(&self, customer: Customer) -> Result<Customer, StoreError> {
        let mut stored = customer.clone();
        stored.bookings.clear();
        self.customers.write().await.insert(customer.id, stored);
        Ok(customer)
    }

    async fn delete_customer(&self, id: CustomerId) -> Result<bool, StoreError> {
        let mut customers = self.customers.write().await;
        let mut bookings = self.bookings.write().await;
        let mut owners = self.owners.write().await;
        if customers.remove(&id).is_none() {
            return Ok(false);
        }
        owners.retain(|booking, owner| {
            if *owner == id {
                bookings.remove(booking);
                false
            } else {
                true
            }
        });
        Ok(true)
    }

    async fn save_customer_with_booking(
        &self,
        customer: Customer,
        mut booking: Booking,
    ) -> Result<Booking, StoreError> {
        let customers = self.customers.write().await;
        let mut bookings = self.bookings.write().await;
        let mut owners = self.owners.write().await;

        if self.conflicts.take() {
            return Err(StoreError::conflict("booking", booking.id, booking.version, booking.version + 1));
        }
        if !customers.contains_key(&customer.id) {
            return Err(StoreError::conflict("customer", customer.id, 1, 0));
        }
        check_version(
            "booking",
            booking.id,
            bookings.get(&booking.id).map(|b| b.version),
            booking.version,
        )?;

        booking.version += 1;
        bookings.insert(booking.id, booking.clone());
        owners.insert(booking.id, customer.id);
        Ok(booking)
    }

    async fn find_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.read().await.get(&id).cloned())
    }

    async fn find_bookings(&self, ids: &[BookingId]) -> Result<Vec<Booking>, StoreError> {
        let bookings = self.bookings.read().await;
        Ok(ids.iter().filter_map(|id| bookings.get(id).cloned()).collect())
    }

    async fn find_all_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        let mut bookings: Vec<Booking> = self.bookings.read().await.values().cloned().collect();
        bookings.sort_by_key(|b| b.created_on);
        Ok(bookings)
    }

    async fn save_booking(&self, mut booking: Booking) -> Result<Booking, StoreError> {
        let mut bookings = self.bookings.write().await;

        if self.conflicts.take() {
            return Err(StoreError::conflict("booking", booking.id, booking.version, booking.version + 1));
        }
        check_version(
            "booking",
            booking.id,
            bookings.get(&booking.id).map(|b| b.version),
            booking.version,
        )?;

        booking.version += 1;
        bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn find_confirmed_bookings(
        &self,
        customer: CustomerId,
    ) -> Result<Vec<Booking>, StoreError> {
        let bookings = self.bookings.read().await;
        let owners = self.owners.read().await;
        let mut confirmed: Vec<Booking> = owners
            .iter()
            .filter(|(_, owner)| **owner == customer)
            .filter_map(|(id, _)| bookings.get(id))
            .filter(|b| b.status() == BookingStatus::Confirmed)
            .cloned()
            .collect();
        confirmed.sort_by_key(|b| (b.created_on, *b.id.as_uuid()));
        Ok(confirmed)
    }

    async fn find_bookings_by_ship(&self, ship: ShipId) -> Result<Vec<Booking>, StoreError> {
        let mut found: Vec<Booking> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.ship_id == ship)
            .cloned()
            .collect();
        found.sort_by_key(|b| b.created_on);
        Ok(found)
    }
}

/// Capacity authority store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryShipRepository {
    ships: RwLock<HashMap<ShipId, Ship>>,
    reservations: RwLock<HashMap<BookingId, Reservation>>,
    conflicts: ConflictBudget,
}

impl InMemoryShipRepository {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` ship writes fail with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.conflicts.set(count);
    }
}

#[async_trait]
impl ShipRepository for InMemoryShipRepository {
    async fn find_ship(&self, id: ShipId) -> Result<Option<Ship>, StoreError> {
        Ok(self.ships.read().await.get(&id).cloned())
    }

    async fn find_all_ships(&self) -> Result<Vec<Ship>, StoreError> {
        let mut ships: Vec<Ship> = self.ships.read().await.values().cloned().collect();
        ships.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ships)
    }

    async fn save_ship(&self, mut ship: Ship) -> Result<Ship, StoreError> {
        let mut ships = self.ships.write().await;

        if self.conflicts.take() {
            return Err(StoreError::conflict("ship", ship.id, ship.version, ship.version + 1));
        }
        check_version("ship", ship.id, ships.get(&ship.id).map(|s| s.version), ship.version)?;

        ship.version += 1;
        ships.insert(ship.id, ship.clone());
        Ok(ship)
    }

    async fn delete_ship(&self, id: ShipId) -> Result<bool, StoreError> {
        let mut ships = self.ships.write().await;
        let mut reservations = self.reservations.write().await;
        reservations.retain(|_, r| r.ship_id != id);
        Ok(ships.remove(&id).is_some())
    }

    async fn reserve(&self, mut ship: Ship, reservation: Reservation) -> Result<Ship, StoreError> {
        let mut ships = self.ships.write().await;
        let mut reservations = self.reservations.write().await;

        if self.conflicts.take() {
            return Err(StoreError::conflict("ship", ship.id, ship.version, ship.version + 1));
        }
        check_version("ship", ship.id, ships.get(&ship.id).map(|s| s.version), ship.version)?;
        if reservations.contains_key(&reservation.booking_id) {
            return Err(StoreError::conflict("reservation", reservation.booking_id, 0, 1));
        }

        ship.version += 1;
        ships.insert(ship.id, ship.clone());
        reservations.insert(reservation.booking_id, reservation);
        Ok(ship)
    }

    async fn release(&self, mut ship: Ship, booking_id: BookingId) -> Result<Ship, StoreError> {
        let mut ships = self.ships.write().await;
        let mut reservations = self.reservations.write().await;

        if self.conflicts.take() {
            return Err(StoreError::conflict("ship", ship.id, ship.version, ship.version + 1));
        }
        check_version("ship", ship.id, ships.get(&ship.id).map(|s| s.version), ship.version)?;
        if !reservations.contains_key(&booking_id) {
            return Err(StoreError::conflict("reservation", booking_id, 1, 0));
        }

        ship.version += 1;
        ships.insert(ship.id, ship.clone());
        reservations.remove(&booking_id);
        Ok(ship)
    }

    async fn find_reservation(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.read().await.get(&booking_id).copied())
    }
}

/// Dead-letter store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    entries: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry, whatever its status.
    pub async fn all(&self) -> Vec<DeadLetter> {
        self.entries.lock().await.clone()
    }

    async fn set_status(
        &self,
        id: i64,
        status: DeadLetterStatus,
        by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id && e.status == DeadLetterStatus::Pending)
            .ok_or_else(|| StoreError::Database(format!("Dead letter {id} not found or already handled")))?;
        entry.status = status;
        entry.resolved_at = Some(Utc::now());
        entry.resolved_by = by.map(str::to_string);
        entry.resolution_notes = notes.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn add_entry(&self, entry: NewDeadLetter) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock().await;
        let id = i64::try_from(entries.len()).map_err(|e| StoreError::Database(e.to_string()))? + 1;
        entries.push(DeadLetter {
            id,
            topic: entry.topic,
            group_id: entry.group_id,
            event: entry.event,
            error_message: entry.error_message,
            attempts: entry.attempts,
            first_failed_at: entry.first_failed_at,
            last_failed_at: entry.last_failed_at,
            status: DeadLetterStatus::Pending,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        });
        Ok(id)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| e.status == DeadLetterStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, id: i64) -> Result<Option<DeadLetter>, StoreError> {
        Ok(self.entries.lock().await.iter().find(|e| e.id == id).cloned())
    }

    async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        self.set_status(id, DeadLetterStatus::Resolved, Some(resolved_by), notes)
            .await
    }

    async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        self.set_status(id, DeadLetterStatus::Discarded, None, Some(reason))
            .await
    }
}

/// Saga ledger kept in memory.
#[derive(Debug, Default)]
pub struct InMemorySagaLog {
    entries: RwLock<Vec<SagaEntry>>,
}

impl InMemorySagaLog {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded entry, oldest first.
    pub async fn entries(&self) -> Vec<SagaEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl SagaLog for InMemorySagaLog {
    async fn append(&self, entry: SagaEntry) -> Result<(), StoreError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn history(&self, booking_id: BookingId) -> Result<Vec<SagaEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn in_flight(&self) -> Result<Vec<BookingId>, StoreError> {
        let entries = self.entries.read().await;
        let mut order: Vec<BookingId> = Vec::new();
        let mut latest: HashMap<BookingId, bool> = HashMap::new();
        for entry in entries.iter() {
            if !latest.contains_key(&entry.booking_id) {
                order.push(entry.booking_id);
            }
            latest.insert(entry.booking_id, entry.step.is_final());
        }
        Ok(order
            .into_iter()
            .filter(|id| latest.get(id).is_some_and(|is_final| !is_final))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use shipkafka_core::saga::SagaStep;

    #[tokio::test]
    async fn stale_ship_write_is_rejected() {
        let repo = InMemoryShipRepository::new();
        let saved = repo.save_ship(Ship::new("Aachen", 2, false)).await.unwrap();
        assert_eq!(saved.version, 1);

        let mut first = saved.clone();
        let mut second = saved;
        first.reserve(1);
        second.damaged = true;

        repo.save_ship(first).await.unwrap();
        let err = repo.save_ship(second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, actual: 2, .. }));
    }

    #[tokio::test]
    async fn unsaved_booking_must_start_at_version_zero() {
        let repo = InMemoryBookingRepository::new();
        let mut booking = Booking::new(ShipId::new(), 1, Utc::now());
        booking.version = 3;

        let err = repo.save_booking(booking).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 3, actual: 0, .. }));
    }

    #[tokio::test]
    async fn deleting_a_customer_deletes_its_bookings() {
        let repo = InMemoryBookingRepository::new();
        let mut customer = repo.save_customer(Customer::new("Max", "Muster")).await.unwrap();
        let booking = Booking::new(ShipId::new(), 2, Utc::now());
        customer.add_booking(booking.id);
        repo.save_customer_with_booking(customer.clone(), booking.clone())
            .await
            .unwrap();

        assert!(repo.delete_customer(customer.id).await.unwrap());
        assert!(repo.find_booking(booking.id).await.unwrap().is_none());
        assert!(!repo.delete_customer(customer.id).await.unwrap());
    }

    #[tokio::test]
    async fn racing_bookings_both_stay_with_the_customer() {
        let repo = InMemoryBookingRepository::new();
        let customer = repo.save_customer(Customer::new("Max", "Muster")).await.unwrap();
        let id = customer.id;

        // Both writers start from the same stale copy of the customer.
        let mut first = customer.clone();
        let mut second = customer.clone();
        let a = Booking::new(ShipId::new(), 1, Utc::now());
        let b = Booking::new(ShipId::new(), 2, Utc::now());
        first.add_booking(a.id);
        second.add_booking(b.id);
        let (left, right) = tokio::join!(
            repo.save_customer_with_booking(first, a.clone()),
            repo.save_customer_with_booking(second, b.clone()),
        );
        left.unwrap();
        right.unwrap();

        // A rename from a copy that predates both bookings drops nothing.
        let mut renamed = customer;
        renamed.last_name = "Mustermann".to_string();
        repo.save_customer(renamed).await.unwrap();

        let stored = repo.find_customer(id).await.unwrap().unwrap();
        assert_eq!(stored.last_name, "Mustermann");
        assert_eq!(stored.bookings.len(), 2);
        assert!(stored.owns(&a.id));
        assert!(stored.owns(&b.id));
    }

    #[tokio::test]
    async fn booking_for_a_deleted_customer_is_refused() {
        let repo = InMemoryBookingRepository::new();
        let mut customer = repo.save_customer(Customer::new("Jane", "Doe")).await.unwrap();
        assert!(repo.delete_customer(customer.id).await.unwrap());

        let booking = Booking::new(ShipId::new(), 1, Utc::now());
        customer.add_booking(booking.id);
        let err = repo
            .save_customer_with_booking(customer.clone(), booking.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict { entity: "customer", .. }));
        assert!(repo.find_customer(customer.id).await.unwrap().is_none());
        assert!(repo.find_booking(booking.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let repo = InMemoryShipRepository::new();
        repo.inject_conflicts(1);
        assert!(repo.save_ship(Ship::new("Berlin", 5, false)).await.is_err());
        assert!(repo.save_ship(Ship::new("Berlin", 5, false)).await.is_ok());
    }

    #[tokio::test]
    async fn reservation_is_written_with_the_ship() {
        let repo = InMemoryShipRepository::new();
        let mut ship = repo.save_ship(Ship::new("Celle", 10, false)).await.unwrap();
        let reservation = Reservation {
            booking_id: BookingId::new(),
            ship_id: ship.id,
            containers: 3,
        };

        ship.reserve(3);
        let ship = repo.reserve(ship, reservation).await.unwrap();
        assert_eq!(repo.find_reservation(reservation.booking_id).await.unwrap(), Some(reservation));

        // A second hold for the same booking changes nothing.
        let mut again = ship.clone();
        again.reserve(3);
        let err = repo.reserve(again, reservation).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { entity: "reservation", .. }));
        assert_eq!(repo.find_ship(ship.id).await.unwrap().unwrap().available_containers, 7);

        let mut back = ship;
        back.release(3);
        let back = repo.release(back, reservation.booking_id).await.unwrap();
        assert_eq!(back.available_containers, 10);
        assert!(repo.find_reservation(reservation.booking_id).await.unwrap().is_none());
        assert!(repo.release(back, reservation.booking_id).await.is_err());
    }

    #[tokio::test]
    async fn deleting_a_ship_drops_its_reservations() {
        let repo = InMemoryShipRepository::new();
        let mut ship = repo.save_ship(Ship::new("Dessau", 4, false)).await.unwrap();
        let booking_id = BookingId::new();
        ship.reserve(1);
        let ship = repo
            .reserve(
                ship.clone(),
                Reservation {
                    booking_id,
                    ship_id: ship.id,
                    containers: 1,
                },
            )
            .await
            .unwrap();

        assert!(repo.delete_ship(ship.id).await.unwrap());
        assert!(repo.find_reservation(booking_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_flight_ignores_finished_sagas() {
        let log = InMemorySagaLog::new();
        let done = BookingId::new();
        let open = BookingId::new();
        log.append(SagaEntry::new(done, SagaStep::Requested, Utc::now())).await.unwrap();
        log.append(SagaEntry::new(open, SagaStep::Requested, Utc::now())).await.unwrap();
        log.append(SagaEntry::new(
            done,
            SagaStep::OutcomeApplied {
                status: BookingStatus::Confirmed,
            },
            Utc::now(),
        ))
        .await
        .unwrap();

        assert_eq!(log.in_flight().await.unwrap(), vec![open]);
    }

    #[tokio::test]
    async fn resolved_dead_letters_leave_the_pending_list() {
        let store = InMemoryDeadLetterStore::new();
        let event = shipkafka_core::event::SerializedEvent::new("T.v1".to_string(), None, vec![], None);
        let id = store
            .add_entry(NewDeadLetter {
                topic: "ship-damaged".to_string(),
                group_id: "booking".to_string(),
                event,
                error_message: "boom".to_string(),
                attempts: 3,
                first_failed_at: Utc::now(),
                last_failed_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(store.list_pending(10).await.unwrap().len(), 1);
        store.mark_resolved(id, "operator", Some("replayed")).await.unwrap();
        assert!(store.list_pending(10).await.unwrap().is_empty());
        assert!(store.mark_discarded(id, "late").await.is_err());
    }
}
