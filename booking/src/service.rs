//! Booking authority logic.
//!
//! Owns customers and their bookings. Creating a booking publishes
//! `booking-created`; the capacity authority answers on `booking-outcome`,
//! which [`BookingService::process_booking`] applies to the local copy.
//! A `ship-damaged` broadcast cancels every booking on that ship.

use crate::error::BookingError;
use metrics::counter;
use shipkafka_core::environment::Clock;
use shipkafka_core::saga::{SagaEntry, SagaLog, SagaStep};
use shipkafka_core::store::BookingRepository;
use shipkafka_core::{Booking, BookingId, BookingStatus, Customer, CustomerId, ShipId, ShippingEvent};
use shipkafka_runtime::Publisher;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The booking authority.
#[derive(Clone)]
pub struct BookingService {
    repository: Arc<dyn BookingRepository>,
    saga: Arc<dyn SagaLog>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
}

impl BookingService {
    /// Create the authority over its own store and ledger.
    #[must_use]
    pub fn new(
        repository: Arc<dyn BookingRepository>,
        saga: Arc<dyn SagaLog>,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            saga,
            publisher,
            clock,
        }
    }

    async fn load_customer(&self, id: CustomerId) -> Result<Customer, BookingError> {
        self.repository
            .find_customer(id)
            .await?
            .ok_or(BookingError::CustomerNotFound(id))
    }

    async fn record(&self, booking_id: BookingId, step: SagaStep) -> Result<(), BookingError> {
        self.saga
            .append(SagaEntry::new(booking_id, step, self.clock.now()))
            .await?;
        Ok(())
    }

    async fn announce(&self, booking: &Booking) -> Result<(), BookingError> {
        self.publisher
            .publish(&ShippingEvent::BookingCreated(booking.clone()))
            .await?;
        self.record(booking.id, SagaStep::Announced).await
    }

    /// Create a booking for `customer_id` and ask for a capacity decision.
    ///
    /// The customer and the new booking are stored together, then
    /// `booking-created` is published keyed by the booking id.
    ///
    /// # Errors
    ///
    /// - [`BookingError::CustomerNotFound`]: nothing is written
    /// - [`BookingError::Store`]: nothing is written
    /// - [`BookingError::Bus`] / [`BookingError::Event`]: the booking is
    ///   stored but the capacity authority was not told;
    ///   [`BookingService::resume_requested`] announces it later
    pub async fn add_booking(
        &self,
        customer_id: CustomerId,
        ship_id: ShipId,
        container_count: u32,
    ) -> Result<Booking, BookingError> {
        let mut customer = self.load_customer(customer_id).await?;

        let booking = Booking::new(ship_id, container_count, self.clock.now());
        customer.add_booking(booking.id);
        let booking = self
            .repository
            .save_customer_with_booking(customer, booking)
            .await?;
        self.record(booking.id, SagaStep::Requested).await?;
        self.announce(&booking).await?;

        info!(
            booking_id = %booking.id,
            customer_id = %customer_id,
            ship_id = %ship_id,
            container_count,
            "Booking requested"
        );
        Ok(booking)
    }

    /// Cancel every booking on `ship_id`.
    ///
    /// Bookings already canceled are left alone, so running this again
    /// after a partial failure finishes the job. No bookings is not an
    /// error. Returns the bookings this call canceled.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`] if a booking cannot be loaded or
    /// saved; bookings saved before the failure stay canceled.
    pub async fn cancel_bookings(&self, ship_id: ShipId) -> Result<Vec<Booking>, BookingError> {
        let bookings = self.repository.find_bookings_by_ship(ship_id).await?;
        if bookings.is_empty() {
            debug!(ship_id = %ship_id, "No bookings on damaged ship");
            return Ok(Vec::new());
        }

        let mut canceled = Vec::new();
        for mut booking in bookings {
            if booking.status().is_terminal() {
                continue;
            }
            booking.update_status(BookingStatus::Canceled, self.clock.now())?;
            let booking = self.repository.save_booking(booking).await?;
            self.record(
                booking.id,
                SagaStep::Compensated {
                    status: BookingStatus::Canceled,
                    reason: format!("ship {ship_id} damaged"),
                },
            )
            .await?;
            counter!("shipkafka_bookings_canceled_total", "reason" => "ship_damaged").increment(1);
            canceled.push(booking);
        }

        info!(ship_id = %ship_id, canceled = canceled.len(), "Bookings canceled for damaged ship");
        Ok(canceled)
    }

    /// Apply a capacity decision to the local booking.
    ///
    /// # Errors
    ///
    /// - [`BookingError::BookingNotFound`] if the booking is not stored here
    /// - [`BookingError::IllegalTransition`] if the decision was already
    ///   applied or the booking moved on
    /// - [`BookingError::Store`] on a failed or conflicting write
    pub async fn process_booking(&self, incoming: &Booking) -> Result<Booking, BookingError> {
        let mut booking = self
            .repository
            .find_booking(incoming.id)
            .await?
            .ok_or(BookingError::BookingNotFound(incoming.id))?;

        let status = booking.update_status(incoming.status(), self.clock.now())?;
        let booking = self.repository.save_booking(booking).await?;
        self.record(booking.id, SagaStep::OutcomeApplied { status })
            .await?;

        info!(booking_id = %booking.id, %status, "Booking outcome applied");
        Ok(booking)
    }

    /// Bookings of a customer, optionally only the confirmed ones.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::CustomerNotFound`] or [`BookingError::Store`].
    pub async fn get_bookings(
        &self,
        customer_id: CustomerId,
        only_confirmed: bool,
    ) -> Result<Vec<Booking>, BookingError> {
        let customer = self.load_customer(customer_id).await?;
        let bookings = if only_confirmed {
            self.repository.find_confirmed_bookings(customer_id).await?
        } else {
            self.repository.find_bookings(&customer.bookings).await?
        };
        Ok(bookings)
    }

    /// A single booking.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::BookingNotFound`] or [`BookingError::Store`].
    pub async fn get_booking(&self, id: BookingId) -> Result<Booking, BookingError> {
        self.repository
            .find_booking(id)
            .await?
            .ok_or(BookingError::BookingNotFound(id))
    }

    /// Every booking.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`].
    pub async fn get_all_bookings(&self) -> Result<Vec<Booking>, BookingError> {
        Ok(self.repository.find_all_bookings().await?)
    }

    /// Register a customer.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`].
    pub async fn add_customer(
        &self,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Result<Customer, BookingError> {
        let customer = self
            .repository
            .save_customer(Customer::new(first_name, last_name))
            .await?;
        info!(customer_id = %customer.id, "Customer added");
        Ok(customer)
    }

    /// Every customer.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`].
    pub async fn get_customers(&self) -> Result<Vec<Customer>, BookingError> {
        Ok(self.repository.find_all_customers().await?)
    }

    /// A single customer.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::CustomerNotFound`] or [`BookingError::Store`].
    pub async fn get_customer(&self, id: CustomerId) -> Result<Customer, BookingError> {
        self.load_customer(id).await
    }

    /// Change a customer's last name; the first name is fixed.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::CustomerNotFound`] or [`BookingError::Store`].
    pub async fn update_customer(
        &self,
        id: CustomerId,
        last_name: Option<String>,
    ) -> Result<Customer, BookingError> {
        let mut customer = self.load_customer(id).await?;
        if let Some(last_name) = last_name {
            customer.last_name = last_name;
        }
        Ok(self.repository.save_customer(customer).await?)
    }

    /// Remove a customer together with its bookings.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::CustomerNotFound`] or [`BookingError::Store`].
    pub async fn delete_customer(&self, id: CustomerId) -> Result<(), BookingError> {
        if !self.repository.delete_customer(id).await? {
            return Err(BookingError::CustomerNotFound(id));
        }
        info!(customer_id = %id, "Customer deleted");
        Ok(())
    }

    /// Publish `booking-created` for every stored booking that is still
    /// `REQUESTED` and was never announced.
    ///
    /// Covers bookings whose ledger append or publish failed after the
    /// booking was stored. Returns the bookings announced by this call.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`], [`BookingError::Bus`] or
    /// [`BookingError::Event`]; bookings announced before the failure stay
    /// announced and a later run picks up the rest.
    pub async fn resume_requested(&self) -> Result<Vec<BookingId>, BookingError> {
        let mut announced = Vec::new();
        for booking in self.repository.find_all_bookings().await? {
            if booking.status() != BookingStatus::Requested {
                continue;
            }
            let history = self.saga.history(booking.id).await?;
            if history.iter().any(|e| e.step == SagaStep::Announced) {
                continue;
            }
            if history.is_empty() {
                self.record(booking.id, SagaStep::Requested).await?;
            }
            self.announce(&booking).await?;
            warn!(booking_id = %booking.id, "Unannounced booking republished");
            announced.push(booking.id);
        }
        Ok(announced)
    }

    /// Bookings whose saga has not reached an applied outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`].
    pub async fn in_flight(&self) -> Result<Vec<BookingId>, BookingError> {
        Ok(self.saga.in_flight().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use shipkafka_core::Topic;
    use shipkafka_testing::mocks::{
        InMemoryBookingRepository, InMemoryEventBus, InMemorySagaLog, test_clock,
    };

    fn service() -> (BookingService, Arc<InMemoryBookingRepository>, InMemoryEventBus) {
        let repository = Arc::new(InMemoryBookingRepository::new());
        let bus = InMemoryEventBus::new();
        let service = BookingService::new(
            repository.clone(),
            Arc::new(InMemorySagaLog::new()),
            Publisher::new(Arc::new(bus.clone())),
            Arc::new(test_clock()),
        );
        (service, repository, bus)
    }

    #[tokio::test]
    async fn update_customer_only_touches_last_name() {
        let (service, _, _) = service();
        let customer = service.add_customer("Jane", "Doe").await.unwrap();

        let updated = service
            .update_customer(customer.id, Some("Roe".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.first_name, "Jane");
        assert_eq!(updated.last_name, "Roe");

        let unchanged = service.update_customer(customer.id, None).await.unwrap();
        assert_eq!(unchanged.last_name, "Roe");
    }

    #[tokio::test]
    async fn deleting_unknown_customer_fails() {
        let (service, _, _) = service();
        let id = CustomerId::new();
        assert!(matches!(
            service.delete_customer(id).await,
            Err(BookingError::CustomerNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn failed_announcement_is_resumed() {
        let (service, repository, bus) = service();
        let customer = service.add_customer("Max", "Muster").await.unwrap();
        bus.fail_publishes("broker down");

        let result = service.add_booking(customer.id, ShipId::new(), 2).await;
        assert!(matches!(result, Err(BookingError::Bus(_))));
        assert_eq!(repository.booking_count().await, 1);
        assert!(bus.published(Topic::BookingCreated.name()).is_empty());

        bus.restore_publishes();
        let resumed = service.resume_requested().await.unwrap();

        assert_eq!(resumed.len(), 1);
        let published = bus.published_events(Topic::BookingCreated.name());
        assert_eq!(published.len(), 1);
        assert!(matches!(&published[0], ShippingEvent::BookingCreated(b) if b.id == resumed[0]));

        // Announced bookings are left alone on the next run.
        assert!(service.resume_requested().await.unwrap().is_empty());
        assert_eq!(bus.published(Topic::BookingCreated.name()).len(), 1);
    }
}
