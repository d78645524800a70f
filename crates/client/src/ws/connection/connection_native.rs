//! Connection driver using tokio-tungstenite: dial, pump frames, back off,
//! repeat until closed.

use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::unbounded;
use futures_util::{SinkExt, StreamExt};
use livehub_shared::ClientFrame;
use tokio::net::TcpStream;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::ConnectionState;
use crate::client::{ClientEvent, Shared};

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Run the connection management loop until the client is closed or the
/// reconnect budget is spent.
pub(crate) async fn run_connection_loop(shared: Arc<Shared>, endpoint: Url) {
    let reconnect = shared.config.reconnect.clone();
    let target = redacted(&endpoint);
    let mut failures = 0u32;

    loop {
        if shared.is_closed() {
            break;
        }
        shared.set_state(ConnectionState::Connecting { attempt: failures });

        let connected = tokio::select! {
            result = connect_async(endpoint.as_str()) => result,
            _ = shared.shutdown.notified() => break,
        };

        match connected {
            Ok((stream, _response)) => {
                failures = 0;
                tracing::info!("WebSocket connected to {}", target);
                run_session(&shared, stream).await;
                shared.detach();
                if shared.is_closed() {
                    break;
                }
                tracing::info!("WebSocket to {} closed", target);
                shared.set_state(ConnectionState::Disconnected);
                shared.emit(ClientEvent::Disconnected);
            }
            Err(e) => {
                failures += 1;
                tracing::error!("WebSocket error for {}: {}", target, e);
                shared.set_state(ConnectionState::Disconnected);
                if reconnect.exhausted(failures) {
                    shared.set_state(ConnectionState::Failed {
                        reason: format!("gave up after {} attempts: {}", failures, e),
                    });
                    return;
                }
            }
        }

        let delay = reconnect.jittered_delay(failures.max(1));
        tracing::info!("Reconnecting to {} in {:?} (attempt {})", target, delay, failures + 1);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.shutdown.notified() => break,
        }
    }

    shared.set_state(ConnectionState::Closed);
}

/// Pump one live socket until it drops or the client closes.
async fn run_session(shared: &Shared, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
    let (mut write, mut read) = stream.split();
    let (sender, mut outgoing) = unbounded::<ClientFrame>();
    shared.attach(sender);
    shared.emit(ClientEvent::Connected);

    let every = shared.config.heartbeat_interval.max(MIN_HEARTBEAT);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + every, every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    shared.handle_text(text.as_str());
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!("Hub closed the socket");
                    break;
                }
                // Pings are answered by tungstenite.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket read error: {}", e);
                    break;
                }
            },
            frame = outgoing.next() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = heartbeat.tick() => ClientFrame::Ping,
            _ = shared.shutdown.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
        };

        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Serialize failed: {}", e);
                continue;
            }
        };
        if let Err(e) = write.send(Message::Text(json.into())).await {
            tracing::warn!("Send failed: {}", e);
            break;
        }
    }
}

/// Endpoint without the query string, safe to log.
fn redacted(endpoint: &Url) -> String {
    let mut url = endpoint.clone();
    url.set_query(None);
    url.to_string()
}
