use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Booking, DeviceType, Flight, FlightFilter, PassengerContact, PushDevice};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
    #[error("transaction timed out")]
    Timeout,
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One consistent unit of work against the seat ledger.
///
/// Dropping a transaction without calling [`LedgerTx::commit`] rolls it back.
/// `lock_flight` must be called before any booking write for that flight so
/// that concurrent writers of the same flight serialize on its row.
#[async_trait]
pub trait LedgerTx: Send {
    async fn passenger_exists(&mut self, passenger_id: Uuid) -> StoreResult<bool>;

    async fn airport_exists(&mut self, airport_id: Uuid) -> StoreResult<bool>;

    /// Load a flight and hold a write lock on it until commit or rollback.
    async fn lock_flight(&mut self, flight_id: Uuid) -> StoreResult<Option<Flight>>;

    async fn insert_flight(&mut self, flight: &Flight) -> StoreResult<()>;

    async fn save_flight(&mut self, flight: &Flight) -> StoreResult<()>;

    /// Removes the flight together with its bookings. Returns `false` when
    /// the flight no longer exists.
    async fn delete_flight(&mut self, flight_id: Uuid) -> StoreResult<bool>;

    async fn booking(&mut self, booking_id: Uuid) -> StoreResult<Option<Booking>>;

    async fn booking_for_passenger(
        &mut self,
        flight_id: Uuid,
        passenger_id: Uuid,
    ) -> StoreResult<Option<Booking>>;

    async fn booking_for_seat(
        &mut self,
        flight_id: Uuid,
        seat_number: &str,
    ) -> StoreResult<Option<Booking>>;

    async fn count_bookings(&mut self, flight_id: Uuid) -> StoreResult<i64>;

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()>;

    /// Returns `false` when the booking no longer exists.
    async fn update_booking_seat(&mut self, booking_id: Uuid, seat_number: &str) -> StoreResult<bool>;

    /// Returns `false` when the booking no longer exists.
    async fn delete_booking(&mut self, booking_id: Uuid) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Entry point to the seat ledger plus the plain reads that need no transaction.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>>;

    async fn get_flight(&self, flight_id: Uuid) -> StoreResult<Option<Flight>>;

    /// One page of matching flights by departure time, and the match count.
    async fn list_flights(&self, filter: &FlightFilter, offset: i64, limit: i64) -> StoreResult<(Vec<Flight>, i64)>;

    async fn get_booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>>;

    /// Returns one page of bookings and the total number of bookings.
    async fn list_bookings(&self, offset: i64, limit: i64) -> StoreResult<(Vec<Booking>, i64)>;

    /// Newest first.
    async fn bookings_for_passenger(&self, passenger_id: Uuid) -> StoreResult<Vec<Booking>>;
}

/// Read-only lookups owned by passenger/account management.
#[async_trait]
pub trait AudienceDirectory: Send + Sync {
    /// Every passenger with an active booking on the flight.
    async fn passengers_on_flight(&self, flight_id: Uuid) -> StoreResult<Vec<PassengerContact>>;

    async fn push_devices_for_users(&self, user_ids: &[Uuid]) -> StoreResult<Vec<PushDevice>>;
}

#[async_trait]
pub trait PushDeviceRegistry: Send + Sync {
    /// Tokens are globally unique; registering a known token moves it to `user_id`.
    async fn register_device(
        &self,
        user_id: Uuid,
        token: &str,
        device_type: DeviceType,
    ) -> StoreResult<PushDevice>;
}
