use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::handoff::BrokenReport;
use crate::engine::matcher::Reservation;
use crate::error::AppError;
use crate::models::drone::{Drone, DroneStatus, GeoPoint};
use crate::models::order::DeliveryOrder;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drones", post(register_drone).get(list_drones))
        .route("/drones/:id", get(get_drone))
        .route("/drones/:id/status", patch(update_drone_status))
        .route("/drones/:id/reserve", post(reserve_job))
        .route("/drones/:id/heartbeat", post(heartbeat))
        .route("/drones/:id/broken", post(report_broken))
        .route("/drones/:id/order", get(current_order))
}

#[derive(Deserialize)]
pub struct RegisterDroneRequest {
    pub location: Option<GeoPoint>,
    pub battery_level: Option<f64>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DroneStatus,
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub location: GeoPoint,
    pub battery_level: f64,
}

#[derive(Deserialize)]
pub struct ReportBrokenRequest {
    pub location: GeoPoint,
    pub reason: Option<String>,
}

async fn register_drone(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDroneRequest>,
) -> Result<Json<Drone>, AppError> {
    let drone = state
        .engine
        .register_drone(payload.location, payload.battery_level)?;
    Ok(Json(drone))
}

async fn list_drones(State(state): State<Arc<AppState>>) -> Json<Vec<Drone>> {
    Json(state.engine.list_drones())
}

async fn get_drone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Drone>, AppError> {
    Ok(Json(state.engine.drone(id)?))
}

async fn update_drone_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Drone>, AppError> {
    Ok(Json(state.engine.set_drone_status(id, payload.status)?))
}

async fn reserve_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.engine.reserve_job(id)?))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<Drone>, AppError> {
    let drone = state
        .engine
        .update_heartbeat(id, payload.location, payload.battery_level)?;
    Ok(Json(drone))
}

async fn report_broken(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReportBrokenRequest>,
) -> Result<Json<BrokenReport>, AppError> {
    let report = state
        .engine
        .report_broken(id, payload.location, payload.reason)?;
    Ok(Json(report))
}

async fn current_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryOrder>, AppError> {
    Ok(Json(state.engine.current_order(id)?))
}
