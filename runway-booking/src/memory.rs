use async_trait::async_trait;
use chrono::Utc;
use runway_core::models::{Booking, DeviceType, Flight, FlightFilter, PassengerContact, PushDevice};
use runway_core::repository::{
    AudienceDirectory, LedgerStore, LedgerTx, PushDeviceRegistry, StoreError, StoreResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct AirportRecord {
    name: String,
    city: Option<String>,
}

#[derive(Debug, Clone)]
struct PassengerRecord {
    user_id: Uuid,
    email: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    airports: HashMap<Uuid, AirportRecord>,
    passengers: HashMap<Uuid, PassengerRecord>,
    flights: HashMap<Uuid, Flight>,
    bookings: HashMap<Uuid, Booking>,
    devices: Vec<PushDevice>,
}

impl LedgerState {
    fn flight_bookings(&self, flight_id: Uuid) -> impl Iterator<Item = &Booking> {
        self.bookings.values().filter(move |b| b.flight_id == flight_id)
    }

    fn check_flight_number(&self, flight: &Flight) -> StoreResult<()> {
        let taken = self
            .flights
            .values()
            .any(|f| f.id != flight.id && f.flight_number == flight.flight_number);
        if taken {
            return Err(unique("flights_flight_number_key"));
        }
        Ok(())
    }

    fn check_booking(&self, booking: &Booking) -> StoreResult<()> {
        for existing in self.flight_bookings(booking.flight_id).filter(|b| b.id != booking.id) {
            if existing.seat_number == booking.seat_number {
                return Err(unique("bookings_flight_seat_key"));
            }
            if existing.passenger_id == booking.passenger_id {
                return Err(unique("bookings_flight_passenger_key"));
            }
        }
        Ok(())
    }
}

fn unique(constraint: &str) -> StoreError {
    StoreError::UniqueViolation { constraint: constraint.to_string() }
}

/// Seat ledger kept in process memory.
///
/// Transactions are fully serialized: `begin` takes an exclusive lock on the
/// whole ledger and works on a copy that replaces the shared state on commit.
/// Uniqueness constraints mirror the Postgres schema.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    #[cfg(test)]
    stale_reads: Arc<std::sync::atomic::AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_airport(&self, airport_id: Uuid) {
        self.state.lock().await.airports.insert(airport_id, AirportRecord::default());
    }

    pub async fn add_named_airport(&self, airport_id: Uuid, name: &str, city: Option<&str>) {
        self.state.lock().await.airports.insert(
            airport_id,
            AirportRecord { name: name.to_string(), city: city.map(str::to_string) },
        );
    }

    pub async fn add_passenger(&self, passenger_id: Uuid, user_id: Uuid, email: Option<&str>) {
        self.state.lock().await.passengers.insert(
            passenger_id,
            PassengerRecord { user_id, email: email.map(str::to_string) },
        );
    }

    /// Seat lookups inside transactions miss every booking, as if another
    /// transaction committed between the check and the insert.
    #[cfg(test)]
    pub(crate) fn simulate_stale_reads(&self, on: bool) {
        self.stale_reads.store(on, std::sync::atomic::Ordering::SeqCst);
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
    stale_reads: bool,
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn passenger_exists(&mut self, passenger_id: Uuid) -> StoreResult<bool> {
        Ok(self.working.passengers.contains_key(&passenger_id))
    }

    async fn airport_exists(&mut self, airport_id: Uuid) -> StoreResult<bool> {
        Ok(self.working.airports.contains_key(&airport_id))
    }

    async fn lock_flight(&mut self, flight_id: Uuid) -> StoreResult<Option<Flight>> {
        Ok(self.working.flights.get(&flight_id).cloned())
    }

    async fn insert_flight(&mut self, flight: &Flight) -> StoreResult<()> {
        self.working.check_flight_number(flight)?;
        self.working.flights.insert(flight.id, flight.clone());
        Ok(())
    }

    async fn save_flight(&mut self, flight: &Flight) -> StoreResult<()> {
        self.working.check_flight_number(flight)?;
        self.working.flights.insert(flight.id, flight.clone());
        Ok(())
    }

    async fn delete_flight(&mut self, flight_id: Uuid) -> StoreResult<bool> {
        if self.working.flights.remove(&flight_id).is_none() {
            return Ok(false);
        }
        self.working.bookings.retain(|_, b| b.flight_id != flight_id);
        Ok(true)
    }

    async fn booking(&mut self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.working.bookings.get(&booking_id).cloned())
    }

    async fn booking_for_passenger(&mut self, flight_id: Uuid, passenger_id: Uuid) -> StoreResult<Option<Booking>> {
        if self.stale_reads {
            return Ok(None);
        }
        Ok(self
            .working
            .flight_bookings(flight_id)
            .find(|b| b.passenger_id == passenger_id)
            .cloned())
    }

    async fn booking_for_seat(&mut self, flight_id: Uuid, seat_number: &str) -> StoreResult<Option<Booking>> {
        if self.stale_reads {
            return Ok(None);
        }
        Ok(self
            .working
            .flight_bookings(flight_id)
            .find(|b| b.seat_number == seat_number)
            .cloned())
    }

    async fn count_bookings(&mut self, flight_id: Uuid) -> StoreResult<i64> {
        Ok(self.working.flight_bookings(flight_id).count() as i64)
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        self.working.check_booking(booking)?;
        self.working.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking_seat(&mut self, booking_id: Uuid, seat_number: &str) -> StoreResult<bool> {
        let Some(mut booking) = self.working.bookings.get(&booking_id).cloned() else {
            return Ok(false);
        };
        booking.seat_number = seat_number.to_string();
        self.working.check_booking(&booking)?;
        self.working.bookings.insert(booking_id, booking);
        Ok(true)
    }

    async fn delete_booking(&mut self, booking_id: Uuid) -> StoreResult<bool> {
        Ok(self.working.bookings.remove(&booking_id).is_some())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTx { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        #[cfg(test)]
        let stale_reads = self.stale_reads.load(std::sync::atomic::Ordering::SeqCst);
        #[cfg(not(test))]
        let stale_reads = false;
        Ok(Box::new(InMemoryTx { guard, working, stale_reads }))
    }

    async fn get_flight(&self, flight_id: Uuid) -> StoreResult<Option<Flight>> {
        Ok(self.state.lock().await.flights.get(&flight_id).cloned())
    }

    async fn list_flights(&self, filter: &FlightFilter, offset: i64, limit: i64) -> StoreResult<(Vec<Flight>, i64)> {
        let state = self.state.lock().await;
        let mut matching: Vec<Flight> = state
            .flights
            .values()
            .filter(|f| {
                let destination = state.airports.get(&f.destination_airport_id).cloned().unwrap_or_default();
                filter.matches(f, &destination.name, destination.city.as_deref())
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.departure_time.cmp(&b.departure_time).then(a.id.cmp(&b.id)));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.state.lock().await.bookings.get(&booking_id).cloned())
    }

    async fn list_bookings(&self, offset: i64, limit: i64) -> StoreResult<(Vec<Booking>, i64)> {
        let state = self.state.lock().await;
        let mut all: Vec<Booking> = state.bookings.values().cloned().collect();
        all.sort_by(|a, b| a.booked_at.cmp(&b.booked_at).then(a.id.cmp(&b.id)));
        let total = all.len() as i64;
        let page = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn bookings_for_passenger(&self, passenger_id: Uuid) -> StoreResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.passenger_id == passenger_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.booked_at.cmp(&a.booked_at));
        Ok(bookings)
    }
}

#[async_trait]
impl AudienceDirectory for InMemoryLedger {
    async fn passengers_on_flight(&self, flight_id: Uuid) -> StoreResult<Vec<PassengerContact>> {
        let state = self.state.lock().await;
        Ok(state
            .flight_bookings(flight_id)
            .filter_map(|b| {
                state.passengers.get(&b.passenger_id).map(|p| PassengerContact {
                    passenger_id: b.passenger_id,
                    user_id: p.user_id,
                    email: p.email.clone(),
                })
            })
            .collect())
    }

    async fn push_devices_for_users(&self, user_ids: &[Uuid]) -> StoreResult<Vec<PushDevice>> {
        let state = self.state.lock().await;
        Ok(state
            .devices
            .iter()
            .filter(|d| user_ids.contains(&d.user_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PushDeviceRegistry for InMemoryLedger {
    async fn register_device(&self, user_id: Uuid, token: &str, device_type: DeviceType) -> StoreResult<PushDevice> {
        let mut state = self.state.lock().await;
        if let Some(device) = state.devices.iter_mut().find(|d| d.token == token) {
            device.user_id = user_id;
            return Ok(device.clone());
        }
        let device = PushDevice {
            id: Uuid::new_v4(),
            user_id,
            token: token.to_string(),
            device_type,
            created_at: Utc::now(),
        };
        state.devices.push(device.clone());
        Ok(device)
    }
}
