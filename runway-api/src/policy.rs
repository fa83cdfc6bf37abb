//! Capability checks run before each core operation. Core services trust
//! the caller they are given, so every handler must pass through here first.

use runway_core::{Booking, Flight, Role};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::Claims;

fn forbidden(msg: &str) -> AppError {
    AppError::Forbidden(msg.to_string())
}

pub fn require_admin(claims: &Claims) -> Result<(), AppError> {
    match claims.role {
        Role::Admin => Ok(()),
        _ => Err(forbidden("Admin access required")),
    }
}

/// Decide which passenger a booking is made for. Passengers may only book for
/// themselves and default to their own profile; admins must name one.
pub fn booking_passenger(claims: &Claims, requested: Option<Uuid>) -> Result<Uuid, AppError> {
    match claims.role {
        Role::Admin => requested.ok_or_else(|| AppError::Validation("passengerId is required".to_string())),
        Role::Passenger => {
            let own = claims
                .passenger_id
                .ok_or_else(|| forbidden("No passenger profile linked to this account"))?;
            match requested {
                Some(id) if id != own => Err(forbidden("Passengers can only book for themselves")),
                _ => Ok(own),
            }
        }
        Role::Staff => Err(forbidden("Staff cannot create bookings")),
    }
}

pub fn require_passenger_access(claims: &Claims, passenger_id: Uuid) -> Result<(), AppError> {
    match claims.role {
        Role::Admin => Ok(()),
        Role::Passenger if claims.passenger_id == Some(passenger_id) => Ok(()),
        _ => Err(forbidden("Not allowed to access this passenger's bookings")),
    }
}

pub fn require_booking_access(claims: &Claims, booking: &Booking) -> Result<(), AppError> {
    require_passenger_access(claims, booking.passenger_id)
        .map_err(|_| forbidden("Not allowed to access this booking"))
}

/// Admins manage flights departing from their airport; staff manage the
/// flights they are assigned to.
pub fn require_flight_manager(claims: &Claims, flight: &Flight) -> Result<(), AppError> {
    let allowed = match claims.role {
        Role::Admin => claims.airport_id == Some(flight.departure_airport_id),
        Role::Staff => claims.flights.contains(&flight.id),
        Role::Passenger => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(forbidden("Not allowed to manage this flight"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use runway_core::FlightStatus;

    fn claims(role: Role) -> Claims {
        Claims::new(Uuid::new_v4(), role, 60)
    }

    fn flight() -> Flight {
        Flight {
            id: Uuid::new_v4(),
            flight_number: "RW100".into(),
            airline: "Runway Air".into(),
            departure_time: Utc::now(),
            arrival_time: Utc::now(),
            capacity: 10,
            available_seats: 10,
            status: FlightStatus::OnTime,
            status_version: 0,
            departure_airport_id: Uuid::new_v4(),
            destination_airport_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_passenger_books_only_for_self() {
        let mut p = claims(Role::Passenger);
        let own = Uuid::new_v4();
        p.passenger_id = Some(own);

        assert_eq!(booking_passenger(&p, None).unwrap(), own);
        assert_eq!(booking_passenger(&p, Some(own)).unwrap(), own);
        assert!(matches!(booking_passenger(&p, Some(Uuid::new_v4())), Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_admin_must_name_passenger() {
        let admin = claims(Role::Admin);
        let target = Uuid::new_v4();
        assert_eq!(booking_passenger(&admin, Some(target)).unwrap(), target);
        assert!(matches!(booking_passenger(&admin, None), Err(AppError::Validation(_))));
        assert!(booking_passenger(&claims(Role::Staff), Some(target)).is_err());
    }

    #[test]
    fn test_booking_ownership() {
        let mut p = claims(Role::Passenger);
        p.passenger_id = Some(Uuid::new_v4());
        let mine = Booking::new(Uuid::new_v4(), p.passenger_id.unwrap(), "1A".into());
        let theirs = Booking::new(Uuid::new_v4(), Uuid::new_v4(), "1B".into());

        assert!(require_booking_access(&p, &mine).is_ok());
        assert!(require_booking_access(&p, &theirs).is_err());
        assert!(require_booking_access(&claims(Role::Admin), &theirs).is_ok());
        assert!(require_booking_access(&claims(Role::Staff), &theirs).is_err());
    }

    #[test]
    fn test_flight_manager_scope() {
        let f = flight();

        let mut home_admin = claims(Role::Admin);
        home_admin.airport_id = Some(f.departure_airport_id);
        assert!(require_flight_manager(&home_admin, &f).is_ok());

        let mut other_admin = claims(Role::Admin);
        other_admin.airport_id = Some(f.destination_airport_id);
        assert!(require_flight_manager(&other_admin, &f).is_err());

        let mut staff = claims(Role::Staff);
        assert!(require_flight_manager(&staff, &f).is_err());
        staff.flights.push(f.id);
        assert!(require_flight_manager(&staff, &f).is_ok());

        assert!(require_flight_manager(&claims(Role::Passenger), &f).is_err());
    }
}
