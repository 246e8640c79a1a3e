use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::notify::{EventKey, Notification};
use crate::state::AppState;

/// Which event keys a websocket client wants. No filter means everything.
#[derive(Debug, Default, Deserialize)]
pub struct Subscription {
    pub order_id: Option<Uuid>,
    pub drone_id: Option<Uuid>,
    #[serde(default)]
    pub fleet: bool,
}

impl Subscription {
    pub fn wants(&self, notification: &Notification) -> bool {
        if self.order_id.is_none() && self.drone_id.is_none() && !self.fleet {
            return true;
        }
        match notification.key {
            EventKey::Order(id) => self.order_id == Some(id),
            EventKey::Drone(id) => self.drone_id == Some(id),
            EventKey::Fleet => self.fleet,
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(subscription): Query<Subscription>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state, subscription))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.events.subscribe());

    info!(?subscription, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(result) = events.next().await {
            let notification = match result {
                Ok(notification) => notification,
                Err(err) => {
                    warn!(error = %err, "websocket subscriber lagged; events dropped");
                    continue;
                }
            };
            if !subscription.wants(&notification) {
                continue;
            }

            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
