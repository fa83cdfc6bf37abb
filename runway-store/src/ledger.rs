use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runway_core::models::{Booking, DeviceType, Flight, FlightFilter, FlightStatus, PassengerContact, PushDevice};
use runway_core::repository::{
    AudienceDirectory, LedgerStore, LedgerTx, PushDeviceRegistry, StoreError, StoreResult,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// SQLSTATEs raised when `statement_timeout` or `lock_timeout` fires.
const QUERY_CANCELED: &str = "57014";
const LOCK_NOT_AVAILABLE: &str = "55P03";

const FLIGHT_COLUMNS: &str = "id, flight_number, airline, departure_time, arrival_time, capacity, \
     available_seats, status, status_version, departure_airport_id, destination_airport_id";

/// Shared by the flight listing's count and page queries. Unset filters bind NULL.
const FLIGHT_FILTER: &str = r#"
    ($1::text IS NULL OR airline ILIKE $1)
    AND ($2::text IS NULL OR destination_airport_id IN (
        SELECT id FROM airports WHERE name ILIKE $2 OR city ILIKE $2
    ))
    AND ($3::timestamptz IS NULL OR departure_time >= $3)
    AND ($4::timestamptz IS NULL OR departure_time <= $4)
"#;

/// `%needle%` with LIKE metacharacters in the needle escaped.
fn contains_pattern(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

const BOOKING_COLUMNS: &str = "id, flight_id, passenger_id, seat_number, booked_at";

pub(crate) fn store_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                };
            }
            match db_err.code().as_deref() {
                Some(QUERY_CANCELED) | Some(LOCK_NOT_AVAILABLE) => StoreError::Timeout,
                _ => StoreError::Backend(err.to_string()),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        _ => StoreError::Backend(err.to_string()),
    }
}

#[derive(sqlx::FromRow)]
struct FlightRow {
    id: Uuid,
    flight_number: String,
    airline: String,
    departure_time: DateTime<Utc>,
    arrival_time: DateTime<Utc>,
    capacity: i32,
    available_seats: i32,
    status: String,
    status_version: i64,
    departure_airport_id: Uuid,
    destination_airport_id: Uuid,
}

impl TryFrom<FlightRow> for Flight {
    type Error = StoreError;

    fn try_from(row: FlightRow) -> Result<Self, Self::Error> {
        let status: FlightStatus = row.status.parse().map_err(StoreError::Backend)?;
        Ok(Flight {
            id: row.id,
            flight_number: row.flight_number,
            airline: row.airline,
            departure_time: row.departure_time,
            arrival_time: row.arrival_time,
            capacity: row.capacity,
            available_seats: row.available_seats,
            status,
            status_version: row.status_version,
            departure_airport_id: row.departure_airport_id,
            destination_airport_id: row.destination_airport_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    flight_id: Uuid,
    passenger_id: Uuid,
    seat_number: String,
    booked_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.id,
            flight_id: row.flight_id,
            passenger_id: row.passenger_id,
            seat_number: row.seat_number,
            booked_at: row.booked_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ContactRow {
    passenger_id: Uuid,
    user_id: Uuid,
    email: Option<String>,
}

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    user_id: Uuid,
    token: String,
    device_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeviceRow> for PushDevice {
    type Error = StoreError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        let device_type: DeviceType = row.device_type.parse().map_err(StoreError::Backend)?;
        Ok(PushDevice {
            id: row.id,
            user_id: row.user_id,
            token: row.token,
            device_type,
            created_at: row.created_at,
        })
    }
}

/// Postgres-backed seat ledger. Each [`LedgerTx`] is a real database
/// transaction bounded by `statement_timeout` and `lock_timeout`.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    transaction_timeout_ms: u64,
}

impl PgLedger {
    pub fn new(pool: PgPool, transaction_timeout_ms: u64) -> Self {
        Self { pool, transaction_timeout_ms }
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn passenger_exists(&mut self, passenger_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM passengers WHERE id = $1)")
            .bind(passenger_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(store_err)
    }

    async fn airport_exists(&mut self, airport_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM airports WHERE id = $1)")
            .bind(airport_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(store_err)
    }

    async fn lock_flight(&mut self, flight_id: Uuid) -> StoreResult<Option<Flight>> {
        let sql = format!("SELECT {} FROM flights WHERE id = $1 FOR UPDATE", FLIGHT_COLUMNS);
        let row = sqlx::query_as::<_, FlightRow>(&sql)
            .bind(flight_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?;
        row.map(Flight::try_from).transpose()
    }

    async fn insert_flight(&mut self, flight: &Flight) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO flights (id, flight_number, airline, departure_time, arrival_time, capacity,
                                 available_seats, status, status_version, departure_airport_id,
                                 destination_airport_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(flight.id)
        .bind(&flight.flight_number)
        .bind(&flight.airline)
        .bind(flight.departure_time)
        .bind(flight.arrival_time)
        .bind(flight.capacity)
        .bind(flight.available_seats)
        .bind(flight.status.as_str())
        .bind(flight.status_version)
        .bind(flight.departure_airport_id)
        .bind(flight.destination_airport_id)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn save_flight(&mut self, flight: &Flight) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE flights
            SET flight_number = $2, airline = $3, departure_time = $4, arrival_time = $5, capacity = $6,
                available_seats = $7, status = $8, status_version = $9, departure_airport_id = $10,
                destination_airport_id = $11, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(flight.id)
        .bind(&flight.flight_number)
        .bind(&flight.airline)
        .bind(flight.departure_time)
        .bind(flight.arrival_time)
        .bind(flight.capacity)
        .bind(flight.available_seats)
        .bind(flight.status.as_str())
        .bind(flight.status_version)
        .bind(flight.departure_airport_id)
        .bind(flight.destination_airport_id)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn delete_flight(&mut self, flight_id: Uuid) -> StoreResult<bool> {
        // bookings.flight_id cascades
        let result = sqlx::query("DELETE FROM flights WHERE id = $1")
            .bind(flight_id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn booking(&mut self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(row.map(Booking::from))
    }

    async fn booking_for_passenger(&mut self, flight_id: Uuid, passenger_id: Uuid) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE flight_id = $1 AND passenger_id = $2", BOOKING_COLUMNS);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(flight_id)
            .bind(passenger_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(row.map(Booking::from))
    }

    async fn booking_for_seat(&mut self, flight_id: Uuid, seat_number: &str) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE flight_id = $1 AND seat_number = $2", BOOKING_COLUMNS);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(flight_id)
            .bind(seat_number)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(row.map(Booking::from))
    }

    async fn count_bookings(&mut self, flight_id: Uuid) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM bookings WHERE flight_id = $1")
            .bind(flight_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(store_err)
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, flight_id, passenger_id, seat_number, booked_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(booking.id)
        .bind(booking.flight_id)
        .bind(booking.passenger_id)
        .bind(&booking.seat_number)
        .bind(booking.booked_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_booking_seat(&mut self, booking_id: Uuid, seat_number: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE bookings SET seat_number = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(seat_number)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_booking(&mut self, booking_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(store_err)
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // SET does not take bind parameters; the value is a plain integer.
        for setting in ["statement_timeout", "lock_timeout"] {
            let sql = format!("SET LOCAL {} = {}", setting, self.transaction_timeout_ms);
            sqlx::query(&sql).execute(&mut *tx).await.map_err(store_err)?;
        }

        Ok(Box::new(PgTx { tx }))
    }

    async fn get_flight(&self, flight_id: Uuid) -> StoreResult<Option<Flight>> {
        let sql = format!("SELECT {} FROM flights WHERE id = $1", FLIGHT_COLUMNS);
        let row = sqlx::query_as::<_, FlightRow>(&sql)
            .bind(flight_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.map(Flight::try_from).transpose()
    }

    async fn list_flights(&self, filter: &FlightFilter, offset: i64, limit: i64) -> StoreResult<(Vec<Flight>, i64)> {
        let airline = filter.airline.as_deref().map(contains_pattern);
        let destination = filter.destination.as_deref().map(contains_pattern);

        let count_sql = format!("SELECT COUNT(*) FROM flights WHERE {}", FLIGHT_FILTER);
        let total = sqlx::query_scalar::<_, i64>(&count_sql)
            .bind(&airline)
            .bind(&destination)
            .bind(filter.departure_after)
            .bind(filter.departure_before)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        let sql = format!(
            "SELECT {} FROM flights WHERE {} ORDER BY departure_time, id LIMIT $5 OFFSET $6",
            FLIGHT_COLUMNS, FLIGHT_FILTER
        );
        let rows = sqlx::query_as::<_, FlightRow>(&sql)
            .bind(&airline)
            .bind(&destination)
            .bind(filter.departure_after)
            .bind(filter.departure_before)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let flights = rows.into_iter().map(Flight::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok((flights, total))
    }

    async fn get_booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(Booking::from))
    }

    async fn list_bookings(&self, offset: i64, limit: i64) -> StoreResult<(Vec<Booking>, i64)> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM bookings")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        let sql = format!(
            "SELECT {} FROM bookings ORDER BY booked_at, id LIMIT $1 OFFSET $2",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        Ok((rows.into_iter().map(Booking::from).collect(), total))
    }

    async fn bookings_for_passenger(&self, passenger_id: Uuid) -> StoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE passenger_id = $1 ORDER BY booked_at DESC",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(passenger_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(Booking::from).collect())
    }
}

#[async_trait]
impl AudienceDirectory for PgLedger {
    async fn passengers_on_flight(&self, flight_id: Uuid) -> StoreResult<Vec<PassengerContact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT p.id AS passenger_id, p.user_id, u.email
            FROM bookings b
            JOIN passengers p ON p.id = b.passenger_id
            JOIN users u ON u.id = p.user_id
            WHERE b.flight_id = $1
            "#,
        )
        .bind(flight_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|r| PassengerContact { passenger_id: r.passenger_id, user_id: r.user_id, email: r.email })
            .collect())
    }

    async fn push_devices_for_users(&self, user_ids: &[Uuid]) -> StoreResult<Vec<PushDevice>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, user_id, token, device_type, created_at FROM push_devices WHERE user_id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(PushDevice::try_from).collect()
    }
}

#[async_trait]
impl PushDeviceRegistry for PgLedger {
    async fn register_device(&self, user_id: Uuid, token: &str, device_type: DeviceType) -> StoreResult<PushDevice> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            INSERT INTO push_devices (id, user_id, token, device_type)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (token) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING id, user_id, token, device_type, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token)
        .bind(device_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        PushDevice::try_from(row)
    }
}
