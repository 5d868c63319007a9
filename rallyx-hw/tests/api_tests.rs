//! Integration tests for the rallyx-hw control API
//!
//! Tests cover:
//! - Health and status endpoints
//! - Manual timing injection
//! - Device address changes
//! - Recalculation triggers and event actions
//! - Next entrant and run corrections

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use helpers::*;
use rallyx_common::db::registry;
use rallyx_hw::watchdog::Liveness;
use rallyx_hw::{build_router, AppState, RFID_READER, TAG_HEUER};
use serde_json::{json, Value};
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot` method

/// Test helper: app over a fresh database, polling two devices
fn setup_app(db: &TestDb, liveness: Liveness) -> axum::Router {
    let state = AppState::new(
        context(&db.pool),
        liveness,
        vec![TAG_HEUER.to_string(), RFID_READER.to_string()],
        Duration::from_secs(5),
    );
    build_router(state)
}

fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, extract_json(response.into_body()).await)
}

async fn seed_run(pool: &sqlx::SqlitePool, event_id: i64, entry_id: i64) -> i64 {
    sqlx::query(
        "INSERT INTO runs (event_id, entry_id, start_time_ms, finish_time_ms, state) \
         VALUES (?, ?, 10000, 55000, 'finished')",
    )
    .bind(event_id)
    .bind(entry_id)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

// =============================================================================
// Health and status
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let db = TestDb::new().await;
    let app = setup_app(&db, Liveness::new());

    let (status, body) = send(&app, test_request("GET", "/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "rallyx-hw");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_status_reports_registry_and_devices() {
    let db = TestDb::new().await;
    let event_id = seed_event(&db.pool).await;
    registry::reg_set(&db.pool, &registry::device_address_key(TAG_HEUER), Some("/dev/ttyS0"))
        .await
        .unwrap();
    registry::reg_set(&db.pool, &registry::device_status_key(TAG_HEUER), Some("Open"))
        .await
        .unwrap();
    registry::reg_set(&db.pool, registry::DISABLE_FINISH, Some("1"))
        .await
        .unwrap();

    let liveness = Liveness::new();
    liveness.beat(TAG_HEUER);
    let app = setup_app(&db, liveness);

    let (status, body) = send(&app, test_request("GET", "/status")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_event_id"], event_id);
    assert_eq!(body["next_entry_id"], Value::Null);
    assert_eq!(body["disable_start"], false);
    assert_eq!(body["disable_finish"], true);

    let devices = body["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["name"], TAG_HEUER);
    assert_eq!(devices[0]["address"], "/dev/ttyS0");
    assert_eq!(devices[0]["status"], "Open");
    assert_eq!(devices[0]["alive"], true);
    assert_eq!(devices[1]["name"], RFID_READER);
    assert_eq!(devices[1]["status"], Value::Null);
    assert_eq!(devices[1]["alive"], false);

    assert_eq!(body["pending"]["runs"], 0);
}

// =============================================================================
// Timing injection
// =============================================================================

#[tokio::test]
async fn test_manual_start_and_finish() {
    let db = TestDb::new().await;
    let event_id = seed_event(&db.pool).await;
    let entry_id = seed_entry(&db.pool, event_id, None).await;
    let app = setup_app(&db, Liveness::new());

    let (status, _) = send(
        &app,
        json_request("POST", "/api/next-entrant", json!({ "entry_id": entry_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, started) = send(
        &app,
        json_request("POST", "/api/timing", json!({ "channel": "1", "time": "10:00:00.000" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["outcome"], "started");
    assert_eq!(started["entry_id"], entry_id);

    let (status, finished) = send(
        &app,
        json_request("POST", "/api/timing", json!({ "channel": "M2", "time_ms": 36_045_500 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(finished["outcome"], "finished");
    assert_eq!(finished["run_id"], started["run_id"]);
}

#[tokio::test]
async fn test_timing_requires_exactly_one_time() {
    let db = TestDb::new().await;
    seed_event(&db.pool).await;
    let app = setup_app(&db, Liveness::new());

    for body in [
        json!({ "channel": "1" }),
        json!({ "channel": "1", "time_ms": 1000, "time": "0:00:01.000" }),
        json!({ "channel": "1", "time_ms": 0 }),
        json!({ "channel": "1", "time": "99999999999999:00:00" }),
    ] {
        let (status, error) = send(&app, json_request("POST", "/api/timing", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["error"]["code"], "BAD_REQUEST");
    }
}

#[tokio::test]
async fn test_timing_without_active_event() {
    let db = TestDb::new().await;
    let app = setup_app(&db, Liveness::new());

    let (status, body) = send(
        &app,
        json_request("POST", "/api/timing", json!({ "channel": "1", "time_ms": 5000 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "no_active_event");
}

// =============================================================================
// Devices
// =============================================================================

#[tokio::test]
async fn test_set_device_address() {
    let db = TestDb::new().await;
    let app = setup_app(&db, Liveness::new());

    let (status, body) = send(
        &app,
        json_request(
            "PUT",
            "/api/devices/rfid_reader/address",
            json!({ "address": " tcp://10.0.0.5:4001 " }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], "tcp://10.0.0.5:4001");
    assert_eq!(
        reg(&db.pool, &registry::device_address_key(RFID_READER)).await.as_deref(),
        Some("tcp://10.0.0.5:4001")
    );

    // Blank address closes the link
    let (status, body) = send(
        &app,
        json_request("PUT", "/api/devices/rfid_reader/address", json!({ "address": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], Value::Null);
    assert_eq!(reg(&db.pool, &registry::device_address_key(RFID_READER)).await, None);
}

#[tokio::test]
async fn test_set_address_unknown_device() {
    let db = TestDb::new().await;
    let app = setup_app(&db, Liveness::new());

    let (status, body) = send(
        &app,
        json_request("PUT", "/api/devices/printer/address", json!({ "address": "/dev/lp0" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

// =============================================================================
// Recalculation triggers and event actions
// =============================================================================

#[tokio::test]
async fn test_mark_entity_dirty() {
    let db = TestDb::new().await;
    let event_id = seed_event(&db.pool).await;
    let entry_id = seed_entry(&db.pool, event_id, None).await;
    let app = setup_app(&db, Liveness::new());

    let uri = format!("/api/recalc/entry/{}", entry_id);

    let (status, body) = send(&app, test_request("POST", &uri)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["kind"], "entry");
    assert_eq!(body["id"], entry_id);

    let (_, body) = send(&app, test_request("GET", "/status")).await;
    assert_eq!(body["pending"]["entries"], 1);
}

#[tokio::test]
async fn test_mark_dirty_rejects_bad_targets() {
    let db = TestDb::new().await;
    let app = setup_app(&db, Liveness::new());

    let (status, _) = send(&app, test_request("POST", "/api/recalc/driver/1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, test_request("POST", "/api/recalc/run/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wake_accepted() {
    let db = TestDb::new().await;
    let app = setup_app(&db, Liveness::new());

    let response = app.oneshot(test_request("POST", "/api/recalc/wake")).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_event_recalc_and_finalize() {
    let db = TestDb::new().await;
    let event_id = seed_event(&db.pool).await;
    let entry_id = seed_entry(&db.pool, event_id, None).await;
    seed_run(&db.pool, event_id, entry_id).await;
    let app = setup_app(&db, Liveness::new());

    let uri = format!("/api/events/{}/recalc", event_id);

    let (status, marked) = send(&app, test_request("POST", &uri)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(marked["runs"], 1);
    assert_eq!(marked["entries"], 1);

    // One run recorded, four DNS runs fill the event
    let uri = format!("/api/events/{}/finalize", event_id);
    let (status, body) = send(&app, test_request("POST", &uri)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["event_id"], event_id);
    assert_eq!(body["inserted"], 4);

    let (status, _) = send(&app, test_request("POST", "/api/events/999/recalc")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_standings_by_class() {
    let db = TestDb::new().await;
    let event_id = seed_event(&db.pool).await;
    let entry_id = seed_entry(&db.pool, event_id, None).await;
    let app = setup_app(&db, Liveness::new());

    let uri = format!("/api/events/{}/standings", event_id);

    let (status, body) = send(&app, test_request("GET", &uri)).await;
    assert_eq!(status, StatusCode::OK);
    let standings = body.as_array().unwrap();
    assert_eq!(standings.len(), 1);
    assert_eq!(standings[0]["entry_id"], entry_id);
    assert_eq!(standings[0]["position"], 1);

    let (status, body) = send(
        &app,
        test_request("GET", &format!("/api/events/{}/standings?class=PF", event_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = send(&app, test_request("GET", "/api/events/999/standings")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Next entrant and run corrections
// =============================================================================

#[tokio::test]
async fn test_next_entrant_set_and_cleared() {
    let db = TestDb::new().await;
    let event_id = seed_event(&db.pool).await;
    let entry_id = seed_entry(&db.pool, event_id, None).await;
    let app = setup_app(&db, Liveness::new());

    let (status, body) = send(
        &app,
        json_request("POST", "/api/next-entrant", json!({ "entry_id": entry_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry_id"], entry_id);
    assert_eq!(
        registry::reg_get_i64(&db.pool, registry::NEXT_ENTRY_ID).await.unwrap(),
        Some(entry_id)
    );

    let (status, _) = send(
        &app,
        json_request("POST", "/api/next-entrant", json!({ "entry_id": null })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(registry::reg_get_i64(&db.pool, registry::NEXT_ENTRY_ID).await.unwrap(), None);

    let (status, _) = send(
        &app,
        json_request("POST", "/api/next-entrant", json!({ "entry_id": 999 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    sqlx::query("INSERT INTO events (name) VALUES ('Other')")
        .execute(&db.pool)
        .await
        .unwrap();
    let other_event = sqlx::query_scalar::<_, i64>("SELECT MAX(event_id) FROM events")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    let foreign = seed_entry(&db.pool, other_event, None).await;
    let (status, body) = send(
        &app,
        json_request("POST", "/api/next-entrant", json!({ "entry_id": foreign })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(registry::reg_get_i64(&db.pool, registry::NEXT_ENTRY_ID).await.unwrap(), None);
}

#[tokio::test]
async fn test_force_dns_and_dnf() {
    let db = TestDb::new().await;
    let event_id = seed_event(&db.pool).await;
    let entry_id = seed_entry(&db.pool, event_id, None).await;
    let run_id = seed_run(&db.pool, event_id, entry_id).await;
    let app = setup_app(&db, Liveness::new());

    let uri = format!("/api/runs/{}/dns", run_id);

    let (status, run) = send(&app, test_request("POST", &uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["start_time_ms"], 0);
    assert_eq!(run["finish_time_ms"], Value::Null);
    assert_eq!(run["state"], "scored");
    assert_eq!(run["recalc"], true);

    let uri = format!("/api/runs/{}/dnf", run_id);

    let (status, run) = send(&app, test_request("POST", &uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["start_time_ms"], Value::Null);
    assert_eq!(run["finish_time_ms"], 0);

    let (status, _) = send(&app, test_request("POST", "/api/runs/999/dns")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_edit_run() {
    let db = TestDb::new().await;
    let event_id = seed_event(&db.pool).await;
    let entry_id = seed_entry(&db.pool, event_id, None).await;
    let run_id = seed_run(&db.pool, event_id, entry_id).await;
    let app = setup_app(&db, Liveness::new());

    let (status, run) = send(
        &app,
        json_request("PATCH", &format!("/api/runs/{}", run_id), json!({ "cones": 2, "gates": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["cones"], 2);
    assert_eq!(run["gates"], 1);
    assert_eq!(run["start_time_ms"], 10000);

    let (status, body) = send(
        &app,
        json_request("PATCH", &format!("/api/runs/{}", run_id), json!({ "cones": -1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
