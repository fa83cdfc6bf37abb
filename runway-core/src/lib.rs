pub mod models;
pub mod identity;
pub mod repository;
pub mod events;
pub mod pagination;
pub mod pii;

pub use models::{
    Booking, DeviceType, Flight, FlightFilter, FlightPatch, FlightStatus, NewFlight, PassengerContact, PushDevice,
};
pub use identity::{Caller, Role};
pub use repository::{StoreError, StoreResult};

use std::fmt;

/// The specific reason a mutation was rejected because of existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    SeatTaken,
    AlreadyBooked,
    FullyBooked,
    FlightNumberTaken,
}

impl ConflictKind {
    /// Maps a storage-level unique constraint back onto the conflict it guards.
    pub fn from_constraint(constraint: &str) -> Option<Self> {
        match constraint {
            "bookings_flight_seat_key" => Some(Self::SeatTaken),
            "bookings_flight_passenger_key" => Some(Self::AlreadyBooked),
            "flights_flight_number_key" => Some(Self::FlightNumberTaken),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ConflictKind::SeatTaken => "seat taken",
            ConflictKind::AlreadyBooked => "already booked",
            ConflictKind::FullyBooked => "fully booked",
            ConflictKind::FlightNumberTaken => "flight number taken",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} with ID \"{id}\" not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Conflict(ConflictKind),
    #[error("Validation failed: {0}")]
    ValidationError(String),
    /// The caller lost the right to act on the row it locked.
    #[error("{0}")]
    Forbidden(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound { entity, id: id.to_string() }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { ref constraint } => match ConflictKind::from_constraint(constraint) {
                Some(kind) => CoreError::Conflict(kind),
                None => CoreError::InternalError(err.to_string()),
            },
            other => CoreError::InternalError(other.to_string()),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
