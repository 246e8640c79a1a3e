use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use drone_dispatch::api::rest::router;
use drone_dispatch::engine::EngineConfig;
use drone_dispatch::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(EngineConfig::default(), 1024));
    (router(state.clone()), state)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn register_drone(app: &axum::Router, lat: f64, lng: f64, battery: f64) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drones",
            json!({
                "location": { "lat": lat, "lng": lng },
                "battery_level": battery
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

async fn submit_order(app: &axum::Router, origin: (f64, f64), destination: (f64, f64)) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "origin": { "lat": origin.0, "lng": origin.1 },
                "destination": { "lat": destination.0, "lng": destination.1 },
                "weight_kg": 1.5
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["drones"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["handoffs"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let drone_id = register_drone(&app, 40.71, -74.0, 100.0).await;
    let _ = app
        .clone()
        .oneshot(post_empty(&format!("/drones/{drone_id}/reserve")))
        .await
        .unwrap();

    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("reservations_total"));
    assert!(body.contains("no_jobs"));
}

#[tokio::test]
async fn create_order_returns_pending() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "origin": { "lat": 40.71, "lng": -74.0 },
                "destination": { "lat": 40.75, "lng": -73.98 },
                "weight_kg": 2.0,
                "priority": "High"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "Pending");
    assert_eq!(body["priority"], "High");
    assert_eq!(body["handoff_count"], 0);
    assert!(body["assigned_drone"].is_null());
}

#[tokio::test]
async fn invalid_coordinates_are_rejected() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "origin": { "lat": 123.0, "lng": -74.0 },
                "destination": { "lat": 40.75, "lng": -73.98 },
                "weight_kg": 2.0
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("origin"));
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let (app, _state) = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reserve_with_empty_queue_returns_404() {
    let (app, _state) = setup();
    let drone_id = register_drone(&app, 40.71, -74.0, 100.0).await;

    let response = app
        .oneshot(post_empty(&format!("/drones/{drone_id}/reserve")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "no jobs available");
}

#[tokio::test]
async fn reserve_with_busy_drone_returns_400() {
    let (app, _state) = setup();
    let drone_id = register_drone(&app, 40.71, -74.0, 100.0).await;
    submit_order(&app, (40.71, -74.0), (40.72, -74.0)).await;

    let first = app
        .clone()
        .oneshot(post_empty(&format!("/drones/{drone_id}/reserve")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    submit_order(&app, (40.71, -74.0), (40.72, -74.0)).await;
    let second = app
        .oneshot(post_empty(&format!("/drones/{drone_id}/reserve")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn nearest_order_is_reserved() {
    let (app, _state) = setup();
    let near = submit_order(&app, (40.71, -74.00), (40.75, -74.05)).await;
    let far = submit_order(&app, (41.0, -75.0), (41.1, -75.1)).await;
    let drone_id = register_drone(&app, 40.71, -74.00, 100.0).await;

    let res = app
        .clone()
        .oneshot(post_empty(&format!("/drones/{drone_id}/reserve")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let reservation = body_json(res).await;
    assert_eq!(reservation["order"]["id"], near);
    assert_eq!(reservation["order"]["status"], "Reserved");
    assert_eq!(reservation["order"]["assigned_drone"], drone_id);
    // The drone is already at the pickup point.
    let eta: DateTime<Utc> = reservation["order"]["estimated_delivery_at"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(eta <= Utc::now());
    assert_eq!(reservation["drone"]["status"], "Busy");
    assert_eq!(reservation["drone"]["current_order"], near);

    let res = app
        .clone()
        .oneshot(get_request(&format!("/orders/{far}")))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["status"], "Pending");

    let res = app
        .oneshot(get_request(&format!("/drones/{drone_id}/order")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["id"], near);
}

#[tokio::test]
async fn low_battery_heartbeat_keeps_the_order() {
    let (app, _state) = setup();
    let order_id = submit_order(&app, (40.71, -74.00), (40.75, -74.00)).await;
    let drone_id = register_drone(&app, 40.71, -74.00, 100.0).await;
    let _ = app
        .clone()
        .oneshot(post_empty(&format!("/drones/{drone_id}/reserve")))
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/drones/{drone_id}/heartbeat"),
            json!({ "location": { "lat": 40.72, "lng": -74.00 }, "battery_level": 15 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let drone = body_json(res).await;
    assert_eq!(drone["status"], "Maintenance");
    assert_eq!(drone["current_order"], order_id);

    let res = app
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    let order = body_json(res).await;
    assert_eq!(order["status"], "Reserved");
    assert_eq!(order["assigned_drone"], drone_id);
    assert_eq!(order["current_location"]["lat"], 40.72);
}

#[tokio::test]
async fn out_of_range_battery_returns_400() {
    let (app, _state) = setup();
    let drone_id = register_drone(&app, 40.71, -74.00, 100.0).await;

    let res = app
        .oneshot(json_request(
            "POST",
            &format!("/drones/{drone_id}/heartbeat"),
            json!({ "location": { "lat": 40.72, "lng": -74.00 }, "battery_level": 140 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn broken_drone_is_rescued_by_nearest_charged_drone() {
    let (app, _state) = setup();
    let order_id = submit_order(&app, (40.71, -74.00), (40.78, -74.05)).await;
    let d1 = register_drone(&app, 40.71, -74.00, 100.0).await;
    let res = app
        .clone()
        .oneshot(post_empty(&format!("/drones/{d1}/reserve")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let d2 = register_drone(&app, 40.73, -74.02, 80.0).await;
    let d3 = register_drone(&app, 40.72, -74.01, 20.0).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/drones/{d1}/broken"),
            json!({ "location": { "lat": 40.72, "lng": -74.01 }, "reason": "motor failure" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report = body_json(res).await;
    assert_eq!(report["drone"]["status"], "Broken");
    assert_eq!(report["drone"]["last_error"], "motor failure");
    assert_eq!(report["handoff"]["status"], "Assigned");
    assert_eq!(report["handoff"]["rescue_drone"], d2);
    assert_eq!(report["handoff"]["broken_drone"], d1);
    assert_eq!(report["order"]["assigned_drone"], d2);
    assert_eq!(report["order"]["handoff_count"], 1);
    assert_eq!(report["order"]["original_drone"], d1);

    let res = app
        .clone()
        .oneshot(get_request(&format!("/drones/{d3}")))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["status"], "Available");

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/pickup"),
            json!({ "drone_id": d2 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/orders/{order_id}/complete"),
            json!({ "drone_id": d2, "outcome": "Delivered" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "Delivered");

    let res = app.oneshot(get_request("/handoffs")).await.unwrap();
    let handoffs = body_json(res).await;
    let list = handoffs.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["status"], "Completed");
}

#[tokio::test]
async fn backlogged_handoff_is_picked_up_by_retry() {
    let (app, _state) = setup();
    let order_id = submit_order(&app, (40.71, -74.00), (40.78, -74.05)).await;
    let d1 = register_drone(&app, 40.71, -74.00, 100.0).await;
    let _ = app
        .clone()
        .oneshot(post_empty(&format!("/drones/{d1}/reserve")))
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/drones/{d1}/broken"),
            json!({ "location": { "lat": 40.72, "lng": -74.01 } }),
        ))
        .await
        .unwrap();
    let report = body_json(res).await;
    assert_eq!(report["handoff"]["status"], "Pending");
    assert_eq!(report["order"]["status"], "HandoffPending");

    let res = app
        .clone()
        .oneshot(get_request("/health"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["pending_handoffs"], 1);

    let d2 = register_drone(&app, 40.73, -74.02, 90.0).await;
    let res = app
        .clone()
        .oneshot(post_empty("/handoffs/retry"))
        .await
        .unwrap();
    let retry = body_json(res).await;
    assert_eq!(retry["rescued"], 1);
    assert_eq!(retry["still_pending"], 0);

    let res = app
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    let order = body_json(res).await;
    assert_eq!(order["status"], "Reserved");
    assert_eq!(order["assigned_drone"], d2);
}

#[tokio::test]
async fn idle_drone_failure_and_repair() {
    let (app, _state) = setup();
    let drone_id = register_drone(&app, 40.71, -74.00, 100.0).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/drones/{drone_id}/broken"),
            json!({ "location": { "lat": 40.72, "lng": -74.01 } }),
        ))
        .await
        .unwrap();
    let report = body_json(res).await;
    assert!(report["handoff"].is_null());
    assert_eq!(report["drone"]["last_error"], "Reported broken");

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/drones/{drone_id}/status"),
            json!({ "status": "Available" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "Available");

    let res = app.oneshot(get_request("/handoffs")).await.unwrap();
    assert_eq!(body_json(res).await.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn withdrawn_orders_are_not_reserved() {
    let (app, _state) = setup();
    let order_id = submit_order(&app, (40.71, -74.00), (40.75, -74.00)).await;

    let res = app
        .clone()
        .oneshot(post_empty(&format!("/orders/{order_id}/withdraw")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "Withdrawn");

    let drone_id = register_drone(&app, 40.71, -74.00, 100.0).await;
    let res = app
        .oneshot(post_empty(&format!("/drones/{drone_id}/reserve")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn assignment_is_published_to_subscribers() {
    let (app, state) = setup();
    let mut events = state.events.subscribe();
    let order_id = submit_order(&app, (40.71, -74.00), (40.75, -74.00)).await;
    let drone_id = register_drone(&app, 40.71, -74.00, 100.0).await;

    let _ = app
        .oneshot(post_empty(&format!("/drones/{drone_id}/reserve")))
        .await
        .unwrap();

    let first = events.recv().await.unwrap();
    let value = serde_json::to_value(&first).unwrap();
    assert_eq!(value["key"]["scope"], "Order");
    assert_eq!(value["key"]["id"], order_id);
    assert_eq!(value["event"]["type"], "OrderAssigned");
    assert_eq!(value["event"]["drone_id"], drone_id);

    let second = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(second["key"]["scope"], "Fleet");
}
