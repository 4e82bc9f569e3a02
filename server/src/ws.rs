use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use redis::AsyncCommands;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::api::AppState;

/// Outbound messages buffered per client before live updates back up.
const CLIENT_BUFFER: usize = 256;

/// Serve one viewer: live `cell_updated` pushes plus `catch_up` replays.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut outbox_rx) = mpsc::channel::<String>(CLIENT_BUFFER);

    let mut updates = state.broadcast_tx.subscribe();
    let live_outbox = outbox.clone();
    let mut live = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(msg) => {
                    if live_outbox.send(msg).await.is_err() {
                        break;
                    }
                }
                // A slow client can catch up from the replay log
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("WebSocket client lagged, {} updates skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut writer = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            if sink.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let valkey = state.valkey.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => handle_client_message(&text, &valkey, &outbox).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut live => {},
        _ = &mut writer => {},
        _ = &mut reader => {},
    }
    live.abort();
    writer.abort();
    reader.abort();
}

async fn handle_client_message(
    text: &str,
    valkey: &redis::aio::MultiplexedConnection,
    sender: &mpsc::Sender<String>,
) {
    let Some(since_ts) = catch_up_since(text) else {
        return;
    };

    let updates: Vec<String> = valkey
        .clone()
        .zrangebyscore(common::valkey::CELL_UPDATES_ZSET, since_ts, "+inf")
        .await
        .unwrap_or_default();

    tracing::info!(
        "WebSocket catch-up: {} cell updates since {}",
        updates.len(),
        since_ts
    );

    for update in updates {
        if sender.send(update).await.is_err() {
            break;
        }
    }
}

/// `since_timestamp` of a `{"type":"catch_up"}` request.
fn catch_up_since(text: &str) -> Option<u64> {
    let msg: serde_json::Value = serde_json::from_str(text).ok()?;
    if msg.get("type").and_then(|t| t.as_str()) != Some("catch_up") {
        return None;
    }
    let since = msg.get("since_timestamp").and_then(|t| t.as_f64())?;
    Some(since.max(0.0) as u64)
}
