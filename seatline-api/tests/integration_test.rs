use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use seatline_api::{app, AppState};
use seatline_core::memory::{CountingRefresh, MemoryFlightStore, MemorySeatStore, ScriptedLag};
use seatline_core::refresh::RefreshSettings;
use seatline_core::{FlightStatus, LagSample, RefreshCoordinator};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    seats: MemorySeatStore,
    flights: Arc<MemoryFlightStore>,
    trigger: Arc<CountingRefresh>,
}

fn test_app(seat_ids: &[i64]) -> TestApp {
    let seats = MemorySeatStore::with_seats(seat_ids.iter().copied());
    let flights = Arc::new(MemoryFlightStore::with_flights([7, 8]));
    let trigger = Arc::new(CountingRefresh::new(Duration::from_millis(100)));
    let refresh = RefreshCoordinator::spawn(
        Arc::new(ScriptedLag::constant(LagSample::Millis(50.0))),
        trigger.clone(),
        RefreshSettings::default(),
    );

    let state = AppState::new(Arc::new(seats.clone()), flights.clone(), refresh).unwrap();
    TestApp {
        router: app(state),
        seats,
        flights,
        trigger,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(router, method, uri, body).await;
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

fn booking(seat_ids: &[i64], price: i64) -> Value {
    json!({
        "seat_ids": seat_ids,
        "passenger_names": seat_ids.iter().map(|id| format!("Passenger {}", id)).collect::<Vec<_>>(),
        "prices": vec![price; seat_ids.len()],
    })
}

#[tokio::test]
async fn test_overlapping_booking_is_rejected_with_conflicting_seats() {
    let t = test_app(&[101, 102, 103]);

    let (status, body) = send_json(&t.router, "POST", "/v1/bookings", Some(booking(&[101, 102], 350))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CONFIRMED");
    assert_eq!(body["seat_ids"], json!([101, 102]));
    assert_eq!(body["total_price"], 700);

    let (status, body) = send_json(&t.router, "POST", "/v1/bookings", Some(booking(&[102, 103], 350))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["seat_ids"], json!([102]));

    let untouched = t.seats.seat(103).unwrap();
    assert!(untouched.is_available);
    assert_eq!(untouched.version, 0);
}

#[tokio::test]
async fn test_invalid_booking_is_a_bad_request() {
    let t = test_app(&[1, 2]);

    let body = json!({
        "seat_ids": [1, 2],
        "passenger_names": ["Only One"],
        "prices": [100, 100],
    });
    let (status, body) = send_json(&t.router, "POST", "/v1/bookings", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Validation failed"));
    assert_eq!(t.seats.transactions_begun(), 0);
}

#[tokio::test]
async fn test_supplied_booking_id_is_kept() {
    let t = test_app(&[5]);
    let booking_id = Uuid::new_v4();

    let mut body = booking(&[5], 120);
    body["booking_id"] = json!(booking_id);
    let (status, body) = send_json(&t.router, "POST", "/v1/bookings", Some(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking_id"], json!(booking_id));
    assert_eq!(t.seats.lines_for(booking_id).len(), 1);
}

#[tokio::test]
async fn test_storage_failure_hides_details() {
    let t = test_app(&[1]);
    t.seats.fail_next_insert();

    let (status, body) = send_json(&t.router, "POST", "/v1/bookings", Some(booking(&[1], 90))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Internal Server Error" }));
    assert!(t.seats.seat(1).unwrap().is_available);
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_booking_schedules_one_refresh() {
    let t = test_app(&[1, 2, 3]);

    for seat in [1, 2] {
        let (status, _) = send_json(&t.router, "POST", "/v1/bookings", Some(booking(&[seat], 10))).await;
        assert_eq!(status, StatusCode::OK);
    }
    // Conflicts do not count as writes
    let (status, _) = send_json(&t.router, "POST", "/v1/bookings", Some(booking(&[1], 10))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(t.trigger.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_conflict_alone_does_not_refresh() {
    let t = test_app(&[]);

    let (status, _) = send_json(&t.router, "POST", "/v1/bookings", Some(booking(&[404], 10))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(t.trigger.calls(), 0);
}

#[tokio::test]
async fn test_cancel_booking_flow() {
    let t = test_app(&[1, 2]);
    let booking_id = Uuid::new_v4();

    let mut body = booking(&[2, 1], 50);
    body["booking_id"] = json!(booking_id);
    let (status, _) = send_json(&t.router, "POST", "/v1/bookings", Some(body)).await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/v1/bookings/{}/cancel", booking_id);
    let (status, body) = send_json(&t.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");
    assert_eq!(body["released_seat_ids"], json!([1, 2]));
    assert!(t.seats.seat(1).unwrap().is_available);

    let (status, body) = send_json(&t.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released_seat_ids"], json!([]));

    let unknown = format!("/v1/bookings/{}/cancel", Uuid::new_v4());
    let (status, _) = send_json(&t.router, "POST", &unknown, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_flight_status_batch() {
    let t = test_app(&[]);

    let (status, _) = send_json(&t.router, "POST", "/v1/flights/status", Some(json!({ "changes": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let changes = json!({
        "changes": [
            { "flight_id": 7, "status": "DELAYED" },
            { "flight_id": 99, "status": "CANCELLED" },
        ]
    });
    let (status, body) = send_json(&t.router, "POST", "/v1/flights/status", Some(changes)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 1);
    assert_eq!(t.flights.status(7), Some(FlightStatus::Delayed));
    assert_eq!(t.flights.status(8), Some(FlightStatus::Scheduled));
}

#[tokio::test(start_paused = true)]
async fn test_manual_refresh_reports_wait_outcome() {
    let t = test_app(&[]);

    let (status, body) = send_json(&t.router, "POST", "/v1/admin/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["wait"]["outcome"], "caught_up");
    assert_eq!(body["refresh_ms"], 100);
    assert_eq!(body["follow_up_scheduled"], false);
    assert_eq!(t.trigger.calls(), 1);

    let (status, body) = send_json(&t.router, "GET", "/v1/admin/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["stats"]["runs"], 1);
    assert_eq!(body["stats"]["caught_up"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_manual_refresh_is_a_server_error() {
    let t = test_app(&[]);
    t.trigger.fail_next(1);

    let (status, _) = send_json(&t.router, "POST", "/v1/admin/refresh", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _) = send_json(&t.router, "POST", "/v1/admin/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let t = test_app(&[1]);

    let (status, body) = send_json(&t.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    send_json(&t.router, "POST", "/v1/bookings", Some(booking(&[1], 10))).await;
    send_json(&t.router, "POST", "/v1/bookings", Some(booking(&[1], 10))).await;

    let (status, bytes) = send(&t.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains(r#"seatline_reservations_total{outcome="confirmed"} 1"#));
    assert!(text.contains(r#"seatline_reservations_total{outcome="conflict"} 1"#));
    assert!(text.contains("seatline_refresh_events"));
}

#[tokio::test]
async fn test_malformed_bodies_are_json_bad_requests() {
    let t = test_app(&[1]);

    let missing_prices = json!({ "seat_ids": [1], "passenger_names": ["Ada"] });
    let (status, body) = send_json(&t.router, "POST", "/v1/bookings", Some(missing_prices)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("prices"), "{}", body);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/bookings")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = t.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());

    let (status, body) =
        send_json(&t.router, "POST", "/v1/flights/status", Some(json!({ "changes": [{ "flight_id": 7 }] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    assert_eq!(t.seats.transactions_begun(), 0);
}

#[tokio::test]
async fn test_overflowing_prices_are_rejected() {
    let t = test_app(&[1, 2]);

    let body = json!({
        "seat_ids": [1, 2],
        "passenger_names": ["Ada", "Bob"],
        "prices": [i64::MAX, 1],
    });
    let (status, body) = send_json(&t.router, "POST", "/v1/bookings", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("overflows"));
    assert!(t.seats.seat(1).unwrap().is_available);
}
