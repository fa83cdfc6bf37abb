use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use futures_util::{Stream, StreamExt};
use runway_core::events::FLIGHT_STATUS_UPDATED;
use runway_core::pagination::{Page, PageRequest};
use runway_core::{CoreError, Flight, FlightFilter, FlightPatch, NewFlight};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;
use crate::policy;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/flights", get(list_flights).post(create_flight))
        .route("/v1/flights/{id}", get(get_flight).patch(update_flight).delete(delete_flight))
        .route("/v1/flights/{id}/status/stream", get(status_stream))
}

async fn create_flight(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NewFlight>,
) -> Result<(StatusCode, Json<Flight>), AppError> {
    policy::require_admin(&claims)?;
    let flight = state.flights.create_flight(&claims.caller(), req).await?;
    Ok((StatusCode::CREATED, Json(flight)))
}

async fn list_flights(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(page): Query<PageRequest>,
    Query(filter): Query<FlightFilter>,
) -> Result<Json<Page<Flight>>, AppError> {
    policy::require_admin(&claims)?;
    Ok(Json(state.flights.list_flights(page, filter).await?))
}

async fn get_flight(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Flight>, AppError> {
    Ok(Json(state.flights.get_flight(id).await?))
}

async fn update_flight(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(patch): Json<FlightPatch>,
) -> Result<Json<Flight>, AppError> {
    let flight = state
        .flights
        .update_flight(&claims.caller(), id, patch, |locked| manages(&claims, locked))
        .await?;
    Ok(Json(flight))
}

async fn delete_flight(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Flight>, AppError> {
    policy::require_admin(&claims)?;
    let deleted = state
        .flights
        .delete_flight(&claims.caller(), id, |locked| manages(&claims, locked))
        .await?;
    Ok(Json(deleted))
}

/// Management rights checked against the row as locked by the write.
fn manages(claims: &Claims, flight: &Flight) -> Result<(), CoreError> {
    policy::require_flight_manager(claims, flight).map_err(|e| CoreError::Forbidden(e.to_string()))
}

// ============================================================================
// Realtime status (SSE)
// ============================================================================

async fn status_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    state.flights.get_flight(id).await?;

    tracing::debug!(flight_id = %id, "Status stream subscriber connected");
    let stream = state
        .status_hub
        .subscribe(id)
        .map(|event| Event::default().event(FLIGHT_STATUS_UPDATED).json_data(event));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
