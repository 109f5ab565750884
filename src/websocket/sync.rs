use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{interval, timeout, Duration},
};

use crate::{
    api::AppState,
    constants::{WS_CLIENT_TIMEOUT_SECS, WS_HEARTBEAT_INTERVAL_SECS},
    models::{HostRequest, WorkerMessage},
    worker::{SyncWorker, WorkerSettings},
};

/// WebSocket bridge between one host and its sync worker
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (poster, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let worker = Arc::new(SyncWorker::new(
        poster,
        WorkerSettings::from_config(&state.config),
        Arc::clone(&state.kaspa_providers),
        state.icrc_client.clone(),
    ));
    tracing::info!("Sync host connected");

    // Forward worker messages to the host
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = interval(Duration::from_secs(WS_HEARTBEAT_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                message = rx.recv() => {
                    let Some(message) = message else { break };
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::warn!("Failed to encode '{}': {}", message.body.msg(), err);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_worker = Arc::clone(&worker);
    let mut recv_task = tokio::spawn(async move {
        loop {
            let next_msg = timeout(Duration::from_secs(WS_CLIENT_TIMEOUT_SECS), receiver.next()).await;
            let msg = match next_msg {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(_))) | Ok(None) => break,
                Err(_) => {
                    tracing::info!("Sync host timeout");
                    break;
                }
            };

            match msg {
                Message::Text(text) => handle_frame(&recv_worker, text.as_str()),
                Message::Close(_) => {
                    tracing::info!("Sync host disconnected");
                    break;
                }
                Message::Ping(_) => {
                    tracing::debug!("Ping received");
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    worker.stop_all();
    tracing::info!("Sync connection closed");
}

fn handle_frame(worker: &SyncWorker, text: &str) {
    let result = HostRequest::from_json(text).and_then(|request| worker.handle(request));
    if let Err(err) = result {
        tracing::warn!("Ignoring host frame: {}", err);
    }
}
