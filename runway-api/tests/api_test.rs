use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use futures_util::StreamExt;
use prometheus::Registry;
use jsonwebtoken::{encode, EncodingKey, Header};
use runway_api::middleware::auth::Claims;
use runway_api::state::{AppState, AuthConfig};
use runway_api::app;
use runway_booking::{AudienceResolver, BookingManager, FlightService, InMemoryLedger, StatusFanout};
use runway_core::{Caller, Flight, NewFlight, Role};
use runway_notify::metrics::DELIVERED;
use runway_notify::{Channel, DispatchMetrics, InMemoryJobQueue, StatusHub};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test-secret";
const TOKEN_TTL_SECS: u64 = 3600;

struct TestApp {
    router: Router,
    state: AppState,
    ledger: InMemoryLedger,
    email: Arc<InMemoryJobQueue>,
    push: Arc<InMemoryJobQueue>,
    metrics: DispatchMetrics,
    origin: Uuid,
    destination: Uuid,
}

async fn test_app() -> TestApp {
    let ledger = InMemoryLedger::new();
    let email = Arc::new(InMemoryJobQueue::new());
    let push = Arc::new(InMemoryJobQueue::new());
    let hub = StatusHub::default();
    let registry = Registry::new();
    let metrics = DispatchMetrics::new(&registry).unwrap();

    let fanout = Arc::new(StatusFanout::new(
        AudienceResolver::new(Arc::new(ledger.clone())),
        email.clone(),
        push.clone(),
        Arc::new(hub.clone()),
    ));

    let state = AppState {
        bookings: Arc::new(BookingManager::new(Arc::new(ledger.clone()))),
        flights: Arc::new(FlightService::new(Arc::new(ledger.clone()), fanout)),
        devices: Arc::new(ledger.clone()),
        status_hub: hub,
        registry,
        auth: AuthConfig { secret: SECRET.into() },
        rate_limit: None,
    };

    let (origin, destination) = (Uuid::new_v4(), Uuid::new_v4());
    ledger.add_airport(origin).await;
    ledger.add_airport(destination).await;

    TestApp {
        router: app(state.clone()),
        state,
        ledger,
        email,
        push,
        metrics,
        origin,
        destination,
    }
}

impl TestApp {
    fn token(&self, claims: Claims) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn claims(&self, role: Role) -> Claims {
        Claims::new(Uuid::new_v4(), role, TOKEN_TTL_SECS)
    }

    fn home_admin(&self) -> String {
        let mut claims = self.claims(Role::Admin);
        claims.airport_id = Some(self.origin);
        self.token(claims)
    }

    /// A passenger account with a linked profile, plus its bearer token.
    async fn passenger(&self, email: Option<&str>) -> (Uuid, Uuid, String) {
        let passenger_id = Uuid::new_v4();
        let mut claims = self.claims(Role::Passenger);
        claims.passenger_id = Some(passenger_id);
        self.ledger.add_passenger(passenger_id, claims.sub, email).await;
        (passenger_id, claims.sub, self.token(claims))
    }

    async fn flight(&self, number: &str, capacity: i32) -> Flight {
        self.state
            .flights
            .create_flight(
                &Caller::system(),
                NewFlight {
                    flight_number: number.into(),
                    airline: "Runway Air".into(),
                    departure_time: Utc::now() + Duration::hours(3),
                    arrival_time: Utc::now() + Duration::hours(6),
                    capacity,
                    status: None,
                    departure_airport_id: self.origin,
                    destination_airport_id: self.destination,
                },
            )
            .await
            .unwrap()
    }

    async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
        (status, value)
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let app = test_app().await;
    let (status, body) = app.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let app = test_app().await;
    let (status, body) = app.send("GET", "/v1/bookings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app.send("GET", "/v1/bookings", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_last_seat_scenario_over_http() {
    let app = test_app().await;
    let flight = app.flight("RW100", 1).await;
    let (_, _, alice) = app.passenger(Some("alice@example.com")).await;
    let (_, _, bob) = app.passenger(Some("bob@example.com")).await;

    let (status, booking) = app
        .send("POST", "/v1/bookings", Some(&alice), Some(json!({ "flightId": flight.id, "seatNumber": "12A" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["seat_number"], "12A");

    let (status, body) = app
        .send("POST", "/v1/bookings", Some(&bob), Some(json!({ "flightId": flight.id, "seatNumber": "12A" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "seat taken");

    let (status, body) = app
        .send("POST", "/v1/bookings", Some(&bob), Some(json!({ "flightId": flight.id, "seatNumber": "12B" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "fully booked");

    let (_, flight) = app.send("GET", &format!("/v1/flights/{}", flight.id), Some(&alice), None).await;
    assert_eq!(flight["available_seats"], 0);
}

#[tokio::test]
async fn test_passenger_cannot_book_for_someone_else() {
    let app = test_app().await;
    let flight = app.flight("RW101", 5).await;
    let (_, _, alice) = app.passenger(None).await;
    let (bob_id, _, _) = app.passenger(None).await;

    let (status, _) = app
        .send(
            "POST",
            "/v1/bookings",
            Some(&alice),
            Some(json!({ "passengerId": bob_id, "flightId": flight.id, "seatNumber": "1A" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.home_admin();
    let (status, _) = app
        .send(
            "POST",
            "/v1/bookings",
            Some(&admin),
            Some(json!({ "passengerId": bob_id, "flightId": flight.id, "seatNumber": "1A" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_booking_lifecycle_and_ownership() {
    let app = test_app().await;
    let flight = app.flight("RW102", 2).await;
    let (alice_id, _, alice) = app.passenger(None).await;
    let (_, _, bob) = app.passenger(None).await;

    let (_, booking) = app
        .send("POST", "/v1/bookings", Some(&alice), Some(json!({ "flightId": flight.id, "seatNumber": "3c" })))
        .await;
    assert_eq!(booking["seat_number"], "3C");
    let uri = format!("/v1/bookings/{}", booking["id"].as_str().unwrap());

    let (status, _) = app.send("GET", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, updated) = app.send("PATCH", &uri, Some(&alice), Some(json!({ "seatNumber": "4D" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["seat_number"], "4D");

    let (status, mine) = app
        .send("GET", &format!("/v1/passengers/{}/bookings", alice_id), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (status, deleted) = app.send("DELETE", &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["id"], booking["id"]);

    let (status, _) = app.send("GET", &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, flight) = app.send("GET", &format!("/v1/flights/{}", flight.id), Some(&alice), None).await;
    assert_eq!(flight["available_seats"], 2);
}

#[tokio::test]
async fn test_list_bookings_is_admin_only() {
    let app = test_app().await;
    let flight = app.flight("RW103", 10).await;
    for seat in ["1A", "1B", "1C"] {
        let (_, _, token) = app.passenger(None).await;
        app.send("POST", "/v1/bookings", Some(&token), Some(json!({ "flightId": flight.id, "seatNumber": seat })))
            .await;
    }

    let (_, _, passenger) = app.passenger(None).await;
    let (status, _) = app.send("GET", "/v1/bookings", Some(&passenger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.home_admin();
    let (status, page) = app.send("GET", "/v1/bookings?page=2&limit=2", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_items"], 3);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["current_page"], 2);
    assert_eq!(page["has_next_page"], false);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_flight_requires_admin_and_valid_airports() {
    let app = test_app().await;
    let admin = app.home_admin();
    let body = json!({
        "flight_number": "RW200",
        "airline": "Runway Air",
        "departure_time": Utc::now() + Duration::hours(1),
        "arrival_time": Utc::now() + Duration::hours(2),
        "capacity": 120,
        "departure_airport_id": app.origin,
        "destination_airport_id": app.destination,
    });

    let staff = app.token(app.claims(Role::Staff));
    let (status, _) = app.send("POST", "/v1/flights", Some(&staff), Some(body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, flight) = app.send("POST", "/v1/flights", Some(&admin), Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(flight["available_seats"], 120);
    assert_eq!(flight["status"], "ON_TIME");

    let (status, body) = app.send("POST", "/v1/flights", Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "flight number taken");

    let same_airports = json!({
        "flight_number": "RW201",
        "airline": "Runway Air",
        "departure_time": Utc::now() + Duration::hours(1),
        "arrival_time": Utc::now() + Duration::hours(2),
        "capacity": 10,
        "departure_airport_id": app.origin,
        "destination_airport_id": app.origin,
    });
    let (status, _) = app.send("POST", "/v1/flights", Some(&admin), Some(same_airports)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_change_queues_notifications() {
    let app = test_app().await;
    let flight = app.flight("RW300", 10).await;

    let (_, alice_user, alice) = app.passenger(Some("alice@example.com")).await;
    let (_, _, bob) = app.passenger(None).await;
    for (token, seat) in [(&alice, "1A"), (&bob, "1B")] {
        let (status, _) = app
            .send("POST", "/v1/bookings", Some(token), Some(json!({ "flightId": flight.id, "seatNumber": seat })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    for device in ["tok-1", "tok-2"] {
        let (status, registered) = app
            .send("POST", "/v1/push-devices", Some(&alice), Some(json!({ "token": device, "deviceType": "IOS" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(registered["user_id"], alice_user.to_string());
    }

    let uri = format!("/v1/flights/{}", flight.id);

    let mut outsider = app.claims(Role::Admin);
    outsider.airport_id = Some(app.destination);
    let outsider = app.token(outsider);
    let (status, _) = app.send("PATCH", &uri, Some(&outsider), Some(json!({ "status": "DELAYED" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.home_admin();
    let (status, _) = app.send("PATCH", &uri, Some(&admin), Some(json!({ "airline": "Runway Express" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.email.pending().await.is_empty());
    assert!(app.push.pending().await.is_empty());

    let mut staff = app.claims(Role::Staff);
    staff.flights = vec![flight.id];
    let staff = app.token(staff);
    let (status, updated) = app.send("PATCH", &uri, Some(&staff), Some(json!({ "status": "DELAYED" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "DELAYED");

    assert_eq!(app.email.pending().await.len(), 1);
    assert_eq!(app.push.pending().await.len(), 2);
}

#[tokio::test]
async fn test_status_stream_delivers_matching_events() {
    let app = test_app().await;
    let watched = app.flight("RW400", 10).await;
    let other = app.flight("RW401", 10).await;
    let (_, _, viewer) = app.passenger(None).await;

    let request = Request::builder()
        .uri(format!("/v1/flights/{}/status/stream?access_token={}", watched.id, viewer))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    let mut body = response.into_body().into_data_stream();

    let admin = app.home_admin();
    for (flight, status) in [(&other, "CANCELED"), (&watched, "DELAYED")] {
        let (code, _) = app
            .send("PATCH", &format!("/v1/flights/{}", flight.id), Some(&admin), Some(json!({ "status": status })))
            .await;
        assert_eq!(code, StatusCode::OK);
    }

    let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), body.next())
        .await
        .expect("no event received")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("event: flightStatusUpdated"));
    assert!(text.contains(&watched.id.to_string()));
    assert!(text.contains("DELAYED"));
    assert!(!text.contains(&other.id.to_string()));
}

#[tokio::test]
async fn test_status_stream_for_unknown_flight_is_404() {
    let app = test_app().await;
    let (_, _, viewer) = app.passenger(None).await;
    let (status, _) = app
        .send("GET", &format!("/v1/flights/{}/status/stream", Uuid::new_v4()), Some(&viewer), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint_exports_job_counters() {
    let app = test_app().await;
    app.metrics.record(Channel::Email, DELIVERED);

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains(r#"runway_notification_jobs_total{channel="email",outcome="delivered"} 1"#));
}

#[tokio::test]
async fn test_list_flights_filters_for_admins() {
    let app = test_app().await;
    app.ledger.add_named_airport(app.destination, "Heathrow", Some("London")).await;
    for number in ["RW500", "RW501", "RW502"] {
        app.flight(number, 10).await;
    }
    let admin = app.home_admin();
    let (status, _) = app
        .send(
            "POST",
            "/v1/flights",
            Some(&admin),
            Some(json!({
                "flight_number": "SK1",
                "airline": "Skyline",
                "departure_time": Utc::now() + Duration::hours(1),
                "arrival_time": Utc::now() + Duration::hours(2),
                "capacity": 10,
                "departure_airport_id": app.origin,
                "destination_airport_id": app.destination,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, _, passenger) = app.passenger(None).await;
    let (status, _) = app.send("GET", "/v1/flights", Some(&passenger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, page) = app.send("GET", "/v1/flights?limit=2", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_items"], 4);
    assert_eq!(page["has_next_page"], true);
    // Earliest departure first.
    assert_eq!(page["items"][0]["flight_number"], "SK1");

    let (_, page) = app.send("GET", "/v1/flights?airline=SKY", Some(&admin), None).await;
    assert_eq!(page["total_items"], 1);

    let (_, page) = app.send("GET", "/v1/flights?destination=london", Some(&admin), None).await;
    assert_eq!(page["total_items"], 4);

    let (_, page) = app.send("GET", "/v1/flights?destination=paris", Some(&admin), None).await;
    assert_eq!(page["total_items"], 0);
}

#[tokio::test]
async fn test_delete_flight_requires_managing_admin() {
    let app = test_app().await;
    let flight = app.flight("RW600", 5).await;
    let (_, _, alice) = app.passenger(None).await;
    let (status, booking) = app
        .send("POST", "/v1/bookings", Some(&alice), Some(json!({ "flightId": flight.id, "seatNumber": "2A" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/v1/flights/{}", flight.id);
    let mut staff = app.claims(Role::Staff);
    staff.flights = vec![flight.id];
    let (status, _) = app.send("DELETE", &uri, Some(&app.token(staff)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut outsider = app.claims(Role::Admin);
    outsider.airport_id = Some(app.destination);
    let (status, _) = app.send("DELETE", &uri, Some(&app.token(outsider)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.home_admin();
    let (status, deleted) = app.send("DELETE", &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["id"], flight.id.to_string());

    let (status, _) = app.send("GET", &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let booking_uri = format!("/v1/bookings/{}", booking["id"].as_str().unwrap());
    let (status, _) = app.send("GET", &booking_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send("DELETE", &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
