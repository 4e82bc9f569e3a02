use common::valkey;
use common::{Cell, StoreEvent};
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::api::now_ms;
use crate::store::CellStore;

/// Two hours in milliseconds (for trimming the WS catch-up sorted set).
const CATCHUP_RETENTION_MS: u64 = 7_200_000;

/// Consume store events from the Valkey queue and apply them to the store.
pub async fn run(
    mut con: redis::aio::MultiplexedConnection,
    store: Arc<RwLock<CellStore>>,
    broadcast_tx: broadcast::Sender<String>,
) {
    tracing::info!("Consumer started");

    loop {
        // RPOPLPUSH: atomically move from the event queue to processing_queue
        let event_json: Option<String> = match redis::cmd("RPOPLPUSH")
            .arg(valkey::EVENT_QUEUE)
            .arg(valkey::PROCESSING_QUEUE)
            .query_async(&mut con)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("RPOPLPUSH failed: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                continue;
            }
        };

        let Some(event_json) = event_json else {
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            continue;
        };

        let event: StoreEvent = match serde_json::from_str(&event_json) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!("Failed to parse store event: {}", e);
                let _: () = con
                    .lrem(valkey::PROCESSING_QUEUE, 1, &event_json)
                    .await
                    .unwrap_or_default();
                continue;
            }
        };

        let updated = {
            let mut store = store.write().await;
            store.apply_event(&event).await
        };

        match updated {
            Some(cell) => {
                let timestamp_ms = now_ms();
                let ws_json = cell_updated_message(&cell, timestamp_ms);
                tracing::debug!("Cell {} updated", cell.id);

                // ZADD + trim + LREM in a single pipeline
                let cutoff = timestamp_ms.saturating_sub(CATCHUP_RETENTION_MS);
                let _: () = redis::pipe()
                    .zadd(valkey::CELL_UPDATES_ZSET, &ws_json, timestamp_ms as f64).ignore()
                    .zrembyscore(valkey::CELL_UPDATES_ZSET, 0u64, cutoff).ignore()
                    .lrem(valkey::PROCESSING_QUEUE, 1, &event_json).ignore()
                    .query_async(&mut con)
                    .await
                    .unwrap_or_default();

                let _ = broadcast_tx.send(ws_json);
            }
            None => {
                tracing::debug!("Event for cell {} changed nothing", event.cell_id());
                let _: () = con
                    .lrem(valkey::PROCESSING_QUEUE, 1, &event_json)
                    .await
                    .unwrap_or_default();
            }
        }
    }
}

/// WebSocket payload announcing a changed cell.
pub fn cell_updated_message(cell: &Cell, timestamp_ms: u64) -> String {
    serde_json::json!({
        "type": "cell_updated",
        "timestamp_ms": timestamp_ms,
        "cell": cell,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_updated_message_carries_record() {
        let cell = Cell::claimed(42, "alice", "#FF0000", 1_000);
        let json = cell_updated_message(&cell, 2_000);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "cell_updated");
        assert_eq!(value["timestamp_ms"], 2_000);

        let decoded: Cell = serde_json::from_value(value["cell"].clone()).unwrap();
        assert_eq!(decoded.id, 42);
        assert_eq!(decoded.owner.as_deref(), Some("alice"));
    }
}
