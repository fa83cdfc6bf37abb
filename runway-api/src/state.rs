use prometheus::Registry;
use runway_booking::{BookingManager, FlightService};
use runway_core::repository::PushDeviceRegistry;
use runway_notify::StatusHub;
use runway_store::RedisClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    /// Shared HS256 secret of the account service that issues tokens.
    pub secret: String,
}

#[derive(Clone)]
pub struct RateLimitConfig {
    pub redis: Arc<RedisClient>,
    pub requests: i64,
    pub window_seconds: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingManager>,
    pub flights: Arc<FlightService>,
    pub devices: Arc<dyn PushDeviceRegistry>,
    pub status_hub: StatusHub,
    pub registry: Registry,
    pub auth: AuthConfig,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
}
