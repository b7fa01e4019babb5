use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header::AUTHORIZATION, header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::models::day_of_week_index;
use appointment_cell::store::{InMemoryStore, SeedData};
use appointment_cell::{appointment_routes, AppointmentState, AvailabilityWindow};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct TestApp {
    router: Router,
    config: TestConfig,
    doctor: Uuid,
    window: Uuid,
    date: NaiveDate,
    patients: Vec<Uuid>,
}

impl TestApp {
    /// One doctor open 10:00-11:20 a week from today, capacity 1.
    fn new() -> Self {
        let config = TestConfig::default();
        let date = (Utc::now() + Duration::days(7)).date_naive();
        let doctor = Uuid::new_v4();
        let patients: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let window = AvailabilityWindow {
            id: Uuid::new_v4(),
            doctor_id: doctor,
            day_of_week: Some(day_of_week_index(date)),
            specific_date: None,
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 20, 0).unwrap(),
            max_concurrent_appointments: 1,
            is_available: true,
        };
        let window_id = window.id;

        let store = InMemoryStore::from_seed(SeedData {
            doctors: vec![doctor],
            patients: patients.clone(),
            windows: vec![window],
        })
        .unwrap();
        let state = AppointmentState::with_store(config.to_arc(), store).unwrap();

        Self {
            router: appointment_routes(Arc::new(state)),
            config,
            doctor,
            window: window_id,
            date,
            patients,
        }
    }

    fn token_for(&self, id: Uuid, role: &str) -> String {
        JwtTestUtils::create_test_token(&TestUser::with_id(id, role), &self.config.jwt_secret, None)
    }

    fn slot(&self, h: u32, m: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.date.and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap()).and_utc();
        (start, start + Duration::minutes(40))
    }

    fn booking_body(&self, h: u32, m: u32) -> Value {
        let (start, end) = self.slot(h, m);
        json!({
            "doctor_id": self.doctor,
            "window_ref": self.window,
            "start": start,
            "end": end,
            "type": "OPD"
        })
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn book_as(&self, patient: Uuid, h: u32, m: u32) -> (StatusCode, Value) {
        let token = self.token_for(patient, "patient");
        self.send(Method::POST, "/book", Some(&token), Some(self.booking_body(h, m))).await
    }
}

#[tokio::test]
async fn availability_lists_bookable_slots() {
    let app = TestApp::new();
    let token = app.token_for(app.patients[0], "patient");

    let uri = format!("/availability/{}/{}", app.doctor, app.date.format("%Y-%m-%d"));
    let (status, body) = app.send(Method::GET, &uri, Some(&token), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Slots fetched successfully");
    let slots = body["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0]["display"], "10:00 - 10:40");
    assert_eq!(slots[1]["display"], "10:40 - 11:20");
    assert_eq!(slots[0]["window_ref"], json!(app.window));
}

#[tokio::test]
async fn availability_rejects_malformed_path_segments() {
    let app = TestApp::new();
    let token = app.token_for(app.patients[0], "patient");

    let (status, body) = app
        .send(Method::GET, "/availability/not-a-uuid/2030-01-07", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid Doctor ID format.");
    assert_eq!(body["code"], "validation_error");

    let uri = format!("/availability/{}/07-01-2030", app.doctor);
    let (status, body) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid date format.");

    let uri = format!("/availability/{}/{}", Uuid::new_v4(), app.date);
    let (status, body) = app.send(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn requests_without_a_valid_token_are_unauthorized() {
    let app = TestApp::new();

    let (status, _) = app.send(Method::POST, "/book", None, Some(app.booking_body(10, 0))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let user = TestUser::with_id(app.patients[0], "patient");
    let expired = JwtTestUtils::create_expired_token(&user, &app.config.jwt_secret);
    let (status, body) = app.send(Method::GET, "/appointments/mine", Some(&expired), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let forged = JwtTestUtils::create_invalid_signature_token(&user);
    let (status, _) = app.send(Method::GET, "/appointments/mine", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn booking_conflicts_map_to_409_with_distinct_codes() {
    let app = TestApp::new();

    let (status, body) = app.book_as(app.patients[0], 10, 0).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Appointment booked successfully!");
    assert_eq!(body["appointment"]["status"], "confirmed");
    assert_eq!(body["appointment"]["patient_id"], json!(app.patients[0]));

    let (status, body) = app.book_as(app.patients[1], 10, 0).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "slot_full");
    assert_eq!(body["error"], "This slot is now full. Please pick another one.");

    let (status, body) = app.book_as(app.patients[0], 10, 0).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "duplicate_booking");
}

#[tokio::test]
async fn invalid_booking_bodies_are_bad_requests() {
    let app = TestApp::new();
    let token = app.token_for(app.patients[0], "patient");

    let missing = json!({ "doctor_id": app.doctor });
    let (status, body) = app.send(Method::POST, "/book", Some(&token), Some(missing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let mut forged = app.booking_body(10, 0);
    forged["end"] = json!(app.slot(10, 0).0 + Duration::minutes(90));
    let (status, _) = app.send(Method::POST, "/book", Some(&token), Some(forged)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut unknown_window = app.booking_body(10, 0);
    unknown_window["window_ref"] = json!(Uuid::new_v4());
    let (status, _) = app.send(Method::POST, "/book", Some(&token), Some(unknown_window)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reschedule_cancel_and_lookup_flow() {
    let app = TestApp::new();
    let owner = app.patients[0];
    let owner_token = app.token_for(owner, "patient");
    let stranger_token = app.token_for(app.patients[2], "patient");

    let (_, booked) = app.book_as(owner, 10, 0).await;
    let id = booked["appointment"]["id"].as_str().unwrap().to_string();

    let (start, end) = app.slot(10, 40);
    let move_body = json!({ "window_ref": app.window, "start": start, "end": end });
    let reschedule_uri = format!("/appointments/{}/reschedule", id);

    let (status, body) = app
        .send(Method::PATCH, &reschedule_uri, Some(&stranger_token), Some(move_body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, body) = app
        .send(Method::PATCH, &reschedule_uri, Some(&owner_token), Some(move_body))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["id"], id.as_str());
    assert_eq!(body["appointment"]["start_time"], json!(start));

    // The vacated 10:00 slot is bookable again.
    let (status, _) = app.book_as(app.patients[1], 10, 0).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .send(Method::GET, &format!("/appointments/{}", id), Some(&owner_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");

    let cancel_uri = format!("/appointments/{}/cancel", id);
    let (status, body) = app
        .send(Method::POST, &cancel_uri, Some(&owner_token), Some(json!({ "reason": "Travelling" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "cancelled");
    assert_eq!(body["appointment"]["cancellation_reason"], "Travelling");

    let (status, _) = app.send(Method::POST, &cancel_uri, Some(&owner_token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.send(Method::GET, "/appointments/mine", Some(&owner_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, _) = app
        .send(Method::GET, &format!("/appointments/{}", Uuid::new_v4()), Some(&owner_token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admins_can_cancel_any_appointment() {
    let app = TestApp::new();
    let (_, booked) = app.book_as(app.patients[0], 10, 40).await;
    let id = booked["appointment"]["id"].as_str().unwrap().to_string();

    let admin_token = app.token_for(Uuid::new_v4(), "admin");
    let (status, body) = app
        .send(Method::POST, &format!("/appointments/{}/cancel", id), Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "cancelled");
    assert!(body["appointment"]["cancellation_reason"].is_null());
}
