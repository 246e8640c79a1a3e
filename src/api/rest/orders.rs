use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::delivery::DeliveryOutcome;
use crate::error::AppError;
use crate::models::drone::GeoPoint;
use crate::models::order::{DeliveryOrder, Priority};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order).patch(edit_order))
        .route("/orders/:id/withdraw", post(withdraw_order))
        .route("/orders/:id/pickup", post(pickup_order))
        .route("/orders/:id/complete", post(complete_order))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub weight_kg: f64,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Deserialize)]
pub struct EditOrderRequest {
    pub origin: Option<GeoPoint>,
    pub destination: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct PickupRequest {
    pub drone_id: Uuid,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub drone_id: Uuid,
    pub outcome: DeliveryOutcome,
    pub notes: Option<String>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = state.engine.submit_order(
        payload.origin,
        payload.destination,
        payload.weight_kg,
        payload.priority,
    )?;
    Ok(Json(order))
}

async fn list_orders(State(state): State<Arc<AppState>>) -> Json<Vec<DeliveryOrder>> {
    Json(state.engine.list_orders())
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryOrder>, AppError> {
    Ok(Json(state.engine.order(id)?))
}

async fn edit_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<EditOrderRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = state
        .engine
        .edit_order_route(id, payload.origin, payload.destination)?;
    Ok(Json(order))
}

async fn withdraw_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryOrder>, AppError> {
    Ok(Json(state.engine.withdraw_order(id)?))
}

async fn pickup_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PickupRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = state
        .engine
        .pickup_order(id, payload.drone_id, payload.location)?;
    Ok(Json(order))
}

async fn complete_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = state.engine.complete_order(
        id,
        payload.drone_id,
        payload.outcome,
        payload.notes,
    )?;
    Ok(Json(order))
}
