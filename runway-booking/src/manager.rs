use runway_core::models::Booking;
use runway_core::pagination::{Page, PageRequest};
use runway_core::repository::LedgerStore;
use runway_core::{Caller, ConflictKind, CoreError, CoreResult};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct BookFlightInput {
    pub passenger_id: Uuid,
    pub flight_id: Uuid,
    pub seat_number: String,
}

/// Owns every write to the seat ledger.
///
/// Each operation runs in one ledger transaction: the flight row is locked
/// first, the invariant checks read inside the same transaction, and the
/// booking write plus the seat-counter write commit together or not at all.
pub struct BookingManager {
    store: Arc<dyn LedgerStore>,
}

impl BookingManager {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Reserve `seat_number` on a flight for a passenger.
    pub async fn book_flight(&self, caller: &Caller, input: BookFlightInput) -> CoreResult<Booking> {
        let seat_number = normalize_seat(&input.seat_number)?;
        let mut tx = self.store.begin().await?;

        if !tx.passenger_exists(input.passenger_id).await? {
            return Err(CoreError::not_found("Passenger", input.passenger_id));
        }
        let mut flight = tx
            .lock_flight(input.flight_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Flight", input.flight_id))?;

        if tx.booking_for_passenger(flight.id, input.passenger_id).await?.is_some() {
            return Err(CoreError::Conflict(ConflictKind::AlreadyBooked));
        }
        if tx.booking_for_seat(flight.id, &seat_number).await?.is_some() {
            return Err(CoreError::Conflict(ConflictKind::SeatTaken));
        }

        let booked = tx.count_bookings(flight.id).await?;
        if booked >= i64::from(flight.capacity) || flight.available_seats <= 0 {
            return Err(CoreError::Conflict(ConflictKind::FullyBooked));
        }

        let booking = Booking::new(flight.id, input.passenger_id, seat_number);
        tx.insert_booking(&booking).await?;

        flight.available_seats = remaining_seats(flight.capacity, booked + 1);
        tx.save_flight(&flight).await?;
        tx.commit().await?;

        tracing::info!(
            booking_id = %booking.id,
            flight_id = %flight.id,
            by = %caller.user_id,
            "Seat {} booked, {} seat(s) left",
            booking.seat_number,
            flight.available_seats
        );
        Ok(booking)
    }

    /// Change the seat on an existing booking. Passing the current seat (or
    /// none) leaves the booking untouched.
    pub async fn update_booking(
        &self,
        caller: &Caller,
        booking_id: Uuid,
        seat_number: Option<String>,
    ) -> CoreResult<Booking> {
        let mut tx = self.store.begin().await?;
        let mut booking = tx
            .booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Booking", booking_id))?;

        let Some(requested) = seat_number else {
            return Ok(booking);
        };
        let requested = normalize_seat(&requested)?;
        if requested == booking.seat_number {
            return Ok(booking);
        }

        tx.lock_flight(booking.flight_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Flight", booking.flight_id))?;
        if tx.booking_for_seat(booking.flight_id, &requested).await?.is_some() {
            return Err(CoreError::Conflict(ConflictKind::SeatTaken));
        }
        if !tx.update_booking_seat(booking_id, &requested).await? {
            return Err(CoreError::not_found("Booking", booking_id));
        }
        tx.commit().await?;

        tracing::info!(
            booking_id = %booking_id,
            by = %caller.user_id,
            "Seat changed from {} to {}",
            booking.seat_number,
            requested
        );
        booking.seat_number = requested;
        Ok(booking)
    }

    /// Cancel a booking and return its seat to the flight.
    pub async fn delete_booking(&self, caller: &Caller, booking_id: Uuid) -> CoreResult<Booking> {
        let mut tx = self.store.begin().await?;
        let booking = tx
            .booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Booking", booking_id))?;

        let mut flight = tx
            .lock_flight(booking.flight_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Flight", booking.flight_id))?;
        if !tx.delete_booking(booking_id).await? {
            return Err(CoreError::not_found("Booking", booking_id));
        }

        let booked = tx.count_bookings(flight.id).await?;
        flight.available_seats = remaining_seats(flight.capacity, booked);
        tx.save_flight(&flight).await?;
        tx.commit().await?;

        tracing::info!(
            booking_id = %booking_id,
            flight_id = %flight.id,
            by = %caller.user_id,
            "Booking cancelled, seat {} released",
            booking.seat_number
        );
        Ok(booking)
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Booking", booking_id))
    }

    pub async fn list_bookings(&self, request: PageRequest) -> CoreResult<Page<Booking>> {
        let request = request.normalized();
        let (items, total) = self.store.list_bookings(request.offset(), request.limit).await?;
        Ok(Page::new(items, total, request))
    }

    pub async fn bookings_for_passenger(&self, passenger_id: Uuid) -> CoreResult<Vec<Booking>> {
        Ok(self.store.bookings_for_passenger(passenger_id).await?)
    }
}

fn normalize_seat(raw: &str) -> CoreResult<String> {
    let seat = raw.trim();
    if seat.is_empty() {
        return Err(CoreError::ValidationError("Seat number is required.".to_string()));
    }
    Ok(seat.to_uppercase())
}

fn remaining_seats(capacity: i32, booked: i64) -> i32 {
    let booked = i32::try_from(booked).unwrap_or(i32::MAX);
    capacity.saturating_sub(booked).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;
    use chrono::{Duration, Utc};
    use runway_core::models::{Flight, FlightStatus};
    use runway_core::Role;

    struct Fixture {
        ledger: InMemoryLedger,
        manager: Arc<BookingManager>,
        flight: Flight,
    }

    fn admin() -> Caller {
        Caller::new(Uuid::new_v4(), Role::Admin)
    }

    async fn fixture(capacity: i32) -> Fixture {
        let ledger = InMemoryLedger::new();
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.add_airport(from).await;
        ledger.add_airport(to).await;

        let flight = Flight {
            id: Uuid::new_v4(),
            flight_number: format!("RW{}", capacity),
            airline: "Runway Air".into(),
            departure_time: Utc::now() + Duration::hours(4),
            arrival_time: Utc::now() + Duration::hours(6),
            capacity,
            available_seats: capacity,
            status: FlightStatus::OnTime,
            status_version: 0,
            departure_airport_id: from,
            destination_airport_id: to,
        };
        let mut tx = ledger.begin().await.unwrap();
        tx.insert_flight(&flight).await.unwrap();
        tx.commit().await.unwrap();

        let manager = Arc::new(BookingManager::new(Arc::new(ledger.clone())));
        Fixture { ledger, manager, flight }
    }

    async fn passenger(ledger: &InMemoryLedger) -> Uuid {
        let id = Uuid::new_v4();
        ledger.add_passenger(id, Uuid::new_v4(), None).await;
        id
    }

    fn input(passenger_id: Uuid, flight_id: Uuid, seat: &str) -> BookFlightInput {
        BookFlightInput { passenger_id, flight_id, seat_number: seat.to_string() }
    }

    async fn available(fx: &Fixture) -> i32 {
        fx.ledger.get_flight(fx.flight.id).await.unwrap().unwrap().available_seats
    }

    #[tokio::test]
    async fn test_booking_decrements_available_seats() {
        let fx = fixture(3).await;
        let pax = passenger(&fx.ledger).await;

        let booking = fx.manager.book_flight(&admin(), input(pax, fx.flight.id, "12a")).await.unwrap();
        assert_eq!(booking.seat_number, "12A");
        assert_eq!(available(&fx).await, 2);
    }

    #[tokio::test]
    async fn test_missing_passenger_and_flight() {
        let fx = fixture(3).await;
        let pax = passenger(&fx.ledger).await;

        let err = fx.manager.book_flight(&admin(), input(Uuid::new_v4(), fx.flight.id, "1A")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "Passenger", .. }));

        let err = fx.manager.book_flight(&admin(), input(pax, Uuid::new_v4(), "1A")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { entity: "Flight", .. }));
    }

    #[tokio::test]
    async fn test_passenger_cannot_hold_two_seats() {
        let fx = fixture(5).await;
        let pax = passenger(&fx.ledger).await;

        fx.manager.book_flight(&admin(), input(pax, fx.flight.id, "1A")).await.unwrap();
        let err = fx.manager.book_flight(&admin(), input(pax, fx.flight.id, "1B")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::AlreadyBooked)));
        assert_eq!(available(&fx).await, 4);
    }

    #[tokio::test]
    async fn test_seat_taken_then_fully_booked() {
        let fx = fixture(1).await;
        let a = passenger(&fx.ledger).await;
        let b = passenger(&fx.ledger).await;

        fx.manager.book_flight(&admin(), input(a, fx.flight.id, "12A")).await.unwrap();

        let err = fx.manager.book_flight(&admin(), input(b, fx.flight.id, "12A")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::SeatTaken)));

        let err = fx.manager.book_flight(&admin(), input(b, fx.flight.id, "12B")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::FullyBooked)));
        assert_eq!(available(&fx).await, 0);
    }

    #[tokio::test]
    async fn test_last_seat_has_exactly_one_winner() {
        let fx = fixture(1).await;
        let mut handles = Vec::new();
        for i in 0..16 {
            let pax = passenger(&fx.ledger).await;
            let manager = fx.manager.clone();
            let flight_id = fx.flight.id;
            handles.push(tokio::spawn(async move {
                manager.book_flight(&admin(), input(pax, flight_id, &format!("{}C", i + 1))).await
            }));
        }

        let mut won = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(CoreError::Conflict(ConflictKind::FullyBooked)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(available(&fx).await, 0);
    }

    #[tokio::test]
    async fn test_same_seat_race_has_exactly_one_winner() {
        let fx = fixture(50).await;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let pax = passenger(&fx.ledger).await;
            let manager = fx.manager.clone();
            let flight_id = fx.flight.id;
            handles.push(tokio::spawn(async move {
                manager.book_flight(&admin(), input(pax, flight_id, "7F")).await
            }));
        }

        let results: Vec<_> = futures_util::future::join_all(handles).await;
        let winners = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(CoreError::Conflict(ConflictKind::SeatTaken)))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(available(&fx).await, 49);
    }

    #[tokio::test]
    async fn test_storage_unique_violation_maps_to_conflict() {
        let fx = fixture(5).await;
        let a = passenger(&fx.ledger).await;
        let b = passenger(&fx.ledger).await;
        fx.manager.book_flight(&admin(), input(a, fx.flight.id, "3C")).await.unwrap();

        fx.ledger.simulate_stale_reads(true);
        let err = fx.manager.book_flight(&admin(), input(b, fx.flight.id, "3C")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::SeatTaken)));

        let err = fx.manager.book_flight(&admin(), input(a, fx.flight.id, "4C")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::AlreadyBooked)));
        fx.ledger.simulate_stale_reads(false);

        // Nothing leaked from the rejected attempts.
        assert_eq!(available(&fx).await, 4);
        assert_eq!(fx.manager.bookings_for_passenger(b).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_delete_returns_seat() {
        let fx = fixture(1).await;
        let a = passenger(&fx.ledger).await;
        let b = passenger(&fx.ledger).await;

        let booking = fx.manager.book_flight(&admin(), input(a, fx.flight.id, "12A")).await.unwrap();
        assert_eq!(available(&fx).await, 0);

        let deleted = fx.manager.delete_booking(&admin(), booking.id).await.unwrap();
        assert_eq!(deleted.id, booking.id);
        assert_eq!(available(&fx).await, 1);

        fx.manager.book_flight(&admin(), input(b, fx.flight.id, "12A")).await.unwrap();

        let err = fx.manager.delete_booking(&admin(), booking.id).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_booking_revalidates_seat() {
        let fx = fixture(5).await;
        let a = passenger(&fx.ledger).await;
        let b = passenger(&fx.ledger).await;
        let first = fx.manager.book_flight(&admin(), input(a, fx.flight.id, "1A")).await.unwrap();
        fx.manager.book_flight(&admin(), input(b, fx.flight.id, "1B")).await.unwrap();

        let err = fx.manager.update_booking(&admin(), first.id, Some("1B".into())).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::SeatTaken)));

        let same = fx.manager.update_booking(&admin(), first.id, Some("1A".into())).await.unwrap();
        assert_eq!(same.seat_number, "1A");

        let moved = fx.manager.update_booking(&admin(), first.id, Some("2A".into())).await.unwrap();
        assert_eq!(moved.seat_number, "2A");
        assert_eq!(fx.manager.get_booking(first.id).await.unwrap().seat_number, "2A");
        assert_eq!(available(&fx).await, 3);
    }

    #[tokio::test]
    async fn test_empty_seat_rejected() {
        let fx = fixture(5).await;
        let a = passenger(&fx.ledger).await;
        let err = fx.manager.book_flight(&admin(), input(a, fx.flight.id, "  ")).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_list_bookings_paginates() {
        let fx = fixture(30).await;
        for i in 0..12 {
            let pax = passenger(&fx.ledger).await;
            fx.manager.book_flight(&admin(), input(pax, fx.flight.id, &format!("{}A", i + 1))).await.unwrap();
        }

        let page = fx.manager.list_bookings(PageRequest { page: 2, limit: 5 }).await.unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.total_items, 12);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next_page);
    }
}
