use runway_core::models::{Flight, FlightFilter, FlightPatch, FlightStatus, NewFlight};
use runway_core::pagination::{Page, PageRequest};
use runway_core::repository::{LedgerStore, LedgerTx};
use runway_core::{Caller, CoreError, CoreResult};
use std::sync::Arc;
use uuid::Uuid;

use crate::fanout::{FanoutReport, StatusFanout};

pub struct FlightService {
    store: Arc<dyn LedgerStore>,
    fanout: Arc<StatusFanout>,
}

impl FlightService {
    pub fn new(store: Arc<dyn LedgerStore>, fanout: Arc<StatusFanout>) -> Self {
        Self { store, fanout }
    }

    pub async fn create_flight(&self, caller: &Caller, input: NewFlight) -> CoreResult<Flight> {
        if input.flight_number.trim().is_empty() {
            return Err(CoreError::ValidationError("Flight number is required".to_string()));
        }
        if input.capacity <= 0 {
            return Err(CoreError::ValidationError("Capacity must be positive".to_string()));
        }

        let flight = Flight {
            id: Uuid::new_v4(),
            flight_number: input.flight_number.trim().to_string(),
            airline: input.airline,
            departure_time: input.departure_time,
            arrival_time: input.arrival_time,
            capacity: input.capacity,
            available_seats: input.capacity,
            status: input.status.unwrap_or(FlightStatus::OnTime),
            status_version: 0,
            departure_airport_id: input.departure_airport_id,
            destination_airport_id: input.destination_airport_id,
        };
        validate_schedule(&flight)?;

        let mut tx = self.store.begin().await?;
        ensure_airport(&mut *tx, flight.departure_airport_id, "Departure airport").await?;
        ensure_airport(&mut *tx, flight.destination_airport_id, "Destination airport").await?;
        tx.insert_flight(&flight).await?;
        tx.commit().await?;

        tracing::info!(flight_id = %flight.id, by = %caller.user_id, "Flight {} created", flight.flight_number);
        Ok(flight)
    }

    pub async fn get_flight(&self, flight_id: Uuid) -> CoreResult<Flight> {
        self.store
            .get_flight(flight_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Flight", flight_id))
    }

    pub async fn list_flights(&self, page: PageRequest, filter: FlightFilter) -> CoreResult<Page<Flight>> {
        if let (Some(after), Some(before)) = (filter.departure_after, filter.departure_before) {
            if after > before {
                return Err(CoreError::ValidationError(
                    "departureAfter must not be later than departureBefore".to_string(),
                ));
            }
        }
        let page = page.normalized();
        let (items, total) = self.store.list_flights(&filter, page.offset(), page.limit).await?;
        Ok(Page::new(items, total, page))
    }

    /// Apply a patch and, only when the status actually changed, fan the
    /// change out to passengers and live subscribers.
    ///
    /// `authorize` runs against the locked row, so the caller is judged on
    /// the flight as it is when the change lands.
    ///
    /// The fanout starts after the commit and runs on its own task, so it
    /// completes even if the caller stops waiting for this future.
    pub async fn update_flight<F>(
        &self,
        caller: &Caller,
        flight_id: Uuid,
        patch: FlightPatch,
        authorize: F,
    ) -> CoreResult<Flight>
    where
        F: FnOnce(&Flight) -> CoreResult<()> + Send,
    {
        let (previous, updated) = self.apply_patch(flight_id, patch, authorize).await?;

        tracing::info!(flight_id = %flight_id, by = %caller.user_id, "Flight {} updated", updated.flight_number);

        if previous.status_version != updated.status_version {
            tracing::info!(
                flight_id = %flight_id,
                version = updated.status_version,
                "Flight status changed: {} -> {}",
                previous.status,
                updated.status
            );
            let fanout = self.fanout.clone();
            let flight = updated.clone();
            let handle = tokio::spawn(async move { fanout.dispatch(&flight).await });
            match handle.await {
                Ok(report) => log_report(flight_id, &report),
                Err(e) => tracing::error!(flight_id = %flight_id, "Status fanout task failed: {}", e),
            }
        }

        Ok(updated)
    }

    /// Delete a flight and every booking on it.
    pub async fn delete_flight<F>(&self, caller: &Caller, flight_id: Uuid, authorize: F) -> CoreResult<Flight>
    where
        F: FnOnce(&Flight) -> CoreResult<()> + Send,
    {
        let mut tx = self.store.begin().await?;
        let flight = tx
            .lock_flight(flight_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Flight", flight_id))?;
        authorize(&flight)?;

        let dropped = tx.count_bookings(flight_id).await?;
        if !tx.delete_flight(flight_id).await? {
            return Err(CoreError::not_found("Flight", flight_id));
        }
        tx.commit().await?;

        tracing::info!(
            flight_id = %flight_id,
            by = %caller.user_id,
            "Flight {} deleted with {} booking(s)",
            flight.flight_number,
            dropped
        );
        Ok(flight)
    }

    async fn apply_patch<F>(&self, flight_id: Uuid, patch: FlightPatch, authorize: F) -> CoreResult<(Flight, Flight)>
    where
        F: FnOnce(&Flight) -> CoreResult<()> + Send,
    {
        let mut tx = self.store.begin().await?;
        let previous = tx
            .lock_flight(flight_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Flight", flight_id))?;
        authorize(&previous)?;

        let mut flight = previous.clone();
        if let Some(number) = patch.flight_number {
            let number = number.trim().to_string();
            if number.is_empty() {
                return Err(CoreError::ValidationError("Flight number is required".to_string()));
            }
            flight.flight_number = number;
        }
        if let Some(airline) = patch.airline {
            flight.airline = airline;
        }
        if let Some(departure) = patch.departure_time {
            flight.departure_time = departure;
        }
        if let Some(arrival) = patch.arrival_time {
            flight.arrival_time = arrival;
        }
        if let Some(status) = patch.status {
            if status != previous.status {
                flight.status = status;
                flight.status_version += 1;
            }
        }
        if let Some(airport_id) = patch.departure_airport_id {
            ensure_airport(&mut *tx, airport_id, "Departure airport").await?;
            flight.departure_airport_id = airport_id;
        }
        if let Some(airport_id) = patch.destination_airport_id {
            ensure_airport(&mut *tx, airport_id, "Destination airport").await?;
            flight.destination_airport_id = airport_id;
        }
        validate_schedule(&flight)?;

        if let Some(capacity) = patch.capacity {
            if capacity <= 0 {
                return Err(CoreError::ValidationError("Capacity must be positive".to_string()));
            }
            let booked = tx.count_bookings(flight_id).await?;
            if i64::from(capacity) < booked {
                return Err(CoreError::ValidationError(format!(
                    "Capacity {} is below the {} seat(s) already booked",
                    capacity, booked
                )));
            }
            flight.capacity = capacity;
            flight.available_seats = capacity - booked as i32;
        }

        tx.save_flight(&flight).await?;
        tx.commit().await?;
        Ok((previous, flight))
    }
}

async fn ensure_airport(tx: &mut dyn LedgerTx, airport_id: Uuid, what: &'static str) -> CoreResult<()> {
    if tx.airport_exists(airport_id).await? {
        Ok(())
    } else {
        Err(CoreError::not_found(what, airport_id))
    }
}

fn validate_schedule(flight: &Flight) -> CoreResult<()> {
    if flight.departure_airport_id == flight.destination_airport_id {
        return Err(CoreError::ValidationError(
            "Departure and destination airports cannot be the same".to_string(),
        ));
    }
    if flight.arrival_time <= flight.departure_time {
        return Err(CoreError::ValidationError("Arrival must be after departure".to_string()));
    }
    Ok(())
}

fn log_report(flight_id: Uuid, report: &FanoutReport) {
    if report.enqueue_failures > 0 || !report.published {
        tracing::warn!(flight_id = %flight_id, ?report, "Status fanout partially failed");
    } else {
        tracing::info!(
            flight_id = %flight_id,
            "Status fanout queued {} email job(s), {} push job(s)",
            report.email_jobs,
            report.push_jobs
        );
    }
}
