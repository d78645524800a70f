//! WebSocket transport: upgrades `/api/ws`, pumps the connection's outbox to
//! the socket and feeds inbound frames to the gateway.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use livehub_shared::{HubError, ViewerProfile};
use serde::Deserialize;

use crate::hub::gateway::{DisconnectReason, Gateway};
use crate::hub::{Credentials, FrameOutcome};
use crate::routes::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
///
/// The token is resolved before the upgrade so a rejected identity gets a
/// problem+json response instead of a socket that closes immediately.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let credentials = Credentials { token: query.token };
    let profile = state.gateway.authenticate(&credentials).await.map_err(|e| {
        tracing::warn!("WebSocket auth failed: {}", e);
        ApiError::from(e)
    })?;

    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, gateway, profile)))
}

/// Drive one accepted connection until either side goes away.
async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, profile: Option<ViewerProfile>) {
    let connection = gateway.open(profile).await;
    let id = connection.id;
    let (mut sender, mut receiver) = socket.split();

    // Writer: drains the outbox until it is closed, then says goodbye.
    let outbox = connection.outbox.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to encode frame for {}: {}", id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut writer_done = false;
    let reason = loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if gateway.handle_text(id, text.as_str()).await == FrameOutcome::Terminate {
                        break DisconnectReason::Abuse;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let err = HubError::MalformedFrame("binary frames are not supported".to_string());
                    if gateway.reject_frame(id, err).await == FrameOutcome::Terminate {
                        break DisconnectReason::Abuse;
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => gateway.touch(id).await,
                Some(Ok(Message::Close(_))) | None => break DisconnectReason::ClientClosed,
                Some(Err(e)) => {
                    tracing::debug!("WebSocket error on {}: {}", id, e);
                    break DisconnectReason::TransportError;
                }
            },
            _ = &mut send_task => {
                // Outbox closed by the hub (timeout, shutdown) or the socket died.
                writer_done = true;
                break DisconnectReason::TransportError;
            }
        }
    };

    gateway.disconnect(id, reason).await;
    if !writer_done {
        let _ = send_task.await;
    }
}
