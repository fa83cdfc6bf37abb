use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use runway_booking::BookFlightInput;
use runway_core::pagination::{Page, PageRequest};
use runway_core::Booking;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::policy;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    /// Defaults to the caller's own passenger profile.
    #[serde(default, alias = "passenger_id")]
    pub passenger_id: Option<Uuid>,
    #[serde(alias = "flight_id")]
    pub flight_id: Uuid,
    #[serde(alias = "seat_number")]
    pub seat_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingRequest {
    #[serde(default, alias = "seat_number")]
    pub seat_number: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", get(list_bookings).post(create_booking))
        .route(
            "/v1/bookings/{id}",
            get(get_booking).patch(update_booking).delete(delete_booking),
        )
        .route("/v1/passengers/{id}/bookings", get(passenger_bookings))
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let passenger_id = policy::booking_passenger(&claims, req.passenger_id)?;

    let booking = state
        .bookings
        .book_flight(
            &claims.caller(),
            BookFlightInput { passenger_id, flight_id: req.flight_id, seat_number: req.seat_number },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<PageRequest>,
) -> Result<Json<Page<Booking>>, AppError> {
    policy::require_admin(&claims)?;
    Ok(Json(state.bookings.list_bookings(page).await?))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.bookings.get_booking(id).await?;
    policy::require_booking_access(&claims, &booking)?;
    Ok(Json(booking))
}

async fn update_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateBookingRequest>,
) -> Result<Json<Booking>, AppError> {
    // A booking's passenger never changes, so this read cannot go stale.
    let existing = state.bookings.get_booking(id).await?;
    policy::require_booking_access(&claims, &existing)?;

    let booking = state.bookings.update_booking(&claims.caller(), id, req.seat_number).await?;
    Ok(Json(booking))
}

async fn delete_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    // Same as above: ownership is fixed at booking time.
    let existing = state.bookings.get_booking(id).await?;
    policy::require_booking_access(&claims, &existing)?;

    let deleted = state.bookings.delete_booking(&claims.caller(), id).await?;
    Ok(Json(deleted))
}

async fn passenger_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(passenger_id): Path<Uuid>,
) -> Result<Json<Vec<Booking>>, AppError> {
    policy::require_passenger_access(&claims, passenger_id)?;
    Ok(Json(state.bookings.bookings_for_passenger(passenger_id).await?))
}
