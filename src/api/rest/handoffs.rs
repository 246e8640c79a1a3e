use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::handoff::HandoffRequest;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/handoffs", get(list_handoffs))
        .route("/handoffs/retry", post(retry_handoffs))
        .route("/handoffs/:id", get(get_handoff))
}

#[derive(Serialize)]
pub struct RetryResponse {
    pub rescued: usize,
    pub still_pending: usize,
}

async fn list_handoffs(State(state): State<Arc<AppState>>) -> Json<Vec<HandoffRequest>> {
    Json(state.engine.list_handoffs())
}

async fn get_handoff(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HandoffRequest>, AppError> {
    Ok(Json(state.engine.handoff(id)?))
}

async fn retry_handoffs(State(state): State<Arc<AppState>>) -> Json<RetryResponse> {
    let rescued = state.engine.retry_pending_handoffs();
    Json(RetryResponse {
        rescued,
        still_pending: state.engine.store().pending_handoffs().len(),
    })
}
