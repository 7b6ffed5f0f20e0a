// WebSocket stream of outbound prompt events for bridge clients.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};

use super::{AppState, BridgeAuth};
use crate::metrics;
use crate::platform::BridgeReport;

/// WebSocket upgrade handler for the bridge event stream.
pub async fn ws_events(
    ws: WebSocketUpgrade,
    _auth: BridgeAuth,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let mut rx = state.sink.subscribe();
    metrics::CONNECTED_BRIDGES.inc();
    tracing::info!("Bridge client connected");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if socket.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Bridge client lagged, skipped {n} events");
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<BridgeReport>(text.as_str()) {
                            Ok(report) => state.dispatcher.handle_report(report).await,
                            Err(e) => tracing::debug!("Ignoring bridge message: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("Bridge socket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    metrics::CONNECTED_BRIDGES.dec();
    tracing::info!("Bridge client disconnected");
}
