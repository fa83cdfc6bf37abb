use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    OnTime,
    Delayed,
    Canceled,
}

impl FlightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightStatus::OnTime => "ON_TIME",
            FlightStatus::Delayed => "DELAYED",
            FlightStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlightStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON_TIME" => Ok(FlightStatus::OnTime),
            "DELAYED" => Ok(FlightStatus::Delayed),
            "CANCELED" => Ok(FlightStatus::Canceled),
            other => Err(format!("unknown flight status: {}", other)),
        }
    }
}

/// A scheduled flight. `available_seats` is kept equal to
/// `capacity - active bookings` by every writer of the seat ledger.
///
/// `status_version` is bumped in the same transaction as every committed
/// status change, so each change has its own number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flight {
    pub id: Uuid,
    pub flight_number: String,
    pub airline: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub capacity: i32,
    pub available_seats: i32,
    pub status: FlightStatus,
    pub status_version: i64,
    pub departure_airport_id: Uuid,
    pub destination_airport_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFlight {
    pub flight_number: String,
    pub airline: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub capacity: i32,
    pub status: Option<FlightStatus>,
    pub departure_airport_id: Uuid,
    pub destination_airport_id: Uuid,
}

/// Partial update of a flight. Every field is independently optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightPatch {
    pub flight_number: Option<String>,
    pub airline: Option<String>,
    pub departure_time: Option<DateTime<Utc>>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub capacity: Option<i32>,
    pub status: Option<FlightStatus>,
    pub departure_airport_id: Option<Uuid>,
    pub destination_airport_id: Option<Uuid>,
}

/// Optional narrowing of a flight listing. Text filters match substrings,
/// ignoring case; `destination` matches the airport name or city.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightFilter {
    #[serde(default)]
    pub airline: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default, alias = "departure_after")]
    pub departure_after: Option<DateTime<Utc>>,
    #[serde(default, alias = "departure_before")]
    pub departure_before: Option<DateTime<Utc>>,
}

impl FlightFilter {
    pub fn matches(&self, flight: &Flight, destination_name: &str, destination_city: Option<&str>) -> bool {
        if let Some(airline) = &self.airline {
            if !contains_ignore_case(&flight.airline, airline) {
                return false;
            }
        }
        if let Some(destination) = &self.destination {
            let city_hit = destination_city.is_some_and(|city| contains_ignore_case(city, destination));
            if !contains_ignore_case(destination_name, destination) && !city_hit {
                return false;
            }
        }
        if self.departure_after.is_some_and(|after| flight.departure_time < after) {
            return false;
        }
        if self.departure_before.is_some_and(|before| flight.departure_time > before) {
            return false;
        }
        true
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub flight_id: Uuid,
    pub passenger_id: Uuid,
    pub seat_number: String,
    pub booked_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(flight_id: Uuid, passenger_id: Uuid, seat_number: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            flight_id,
            passenger_id,
            seat_number,
            booked_at: Utc::now(),
        }
    }
}

/// Notification-relevant view of a passenger holding a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassengerContact {
    pub passenger_id: Uuid,
    pub user_id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    #[default]
    Web,
    Ios,
    Android,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Web => "WEB",
            DeviceType::Ios => "IOS",
            DeviceType::Android => "ANDROID",
        }
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WEB" => Ok(DeviceType::Web),
            "IOS" => Ok(DeviceType::Ios),
            "ANDROID" => Ok(DeviceType::Android),
            other => Err(format!("unknown device type: {}", other)),
        }
    }
}

/// A push subscription registered to a user account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub device_type: DeviceType,
    pub created_at: DateTime<Utc>,
}
