use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{Cell, StoreEvent};
use redis::AsyncCommands;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::error::AppError;
use crate::store::CellStore;
use crate::ws;

/// Widest id range a single query may span.
pub const MAX_RANGE_SPAN: u64 = 1_000_000;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<CellStore>>,
    pub valkey: redis::aio::MultiplexedConnection,
    pub broadcast_tx: broadcast::Sender<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/cells", get(get_cells))
        .route("/api/cells/{id}", get(get_cell))
        .route("/api/cells/{id}/like", post(like_cell))
        .route("/api/capacity", get(get_capacity))
        .route("/api/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Either an id range (`min`, `max`) or an `owner`.
#[derive(Deserialize)]
struct CellsQuery {
    min: Option<u64>,
    max: Option<u64>,
    owner: Option<String>,
}

enum CellsLookup {
    Range(u64, u64),
    Owner(String),
}

impl CellsQuery {
    fn lookup(self) -> Result<CellsLookup, AppError> {
        match (self.owner, self.min, self.max) {
            (Some(owner), None, None) => {
                let owner = owner.trim();
                if owner.is_empty() {
                    return Err(AppError::BadRequest("owner is empty".into()));
                }
                Ok(CellsLookup::Owner(owner.to_string()))
            }
            (None, Some(min), Some(max)) => {
                validate_range(min, max)?;
                Ok(CellsLookup::Range(min, max))
            }
            _ => Err(AppError::BadRequest(
                "expected either min and max, or owner".into(),
            )),
        }
    }
}

fn validate_range(min: u64, max: u64) -> Result<(), AppError> {
    if max < min {
        return Err(AppError::BadRequest(format!("max {max} is below min {min}")));
    }
    if max - min > MAX_RANGE_SPAN {
        return Err(AppError::BadRequest(format!(
            "range spans {} ids, limit is {}",
            max - min,
            MAX_RANGE_SPAN
        )));
    }
    Ok(())
}

async fn get_cells(
    State(state): State<AppState>,
    Query(query): Query<CellsQuery>,
) -> Result<Json<Vec<Cell>>, AppError> {
    let lookup = query.lookup()?;
    let cells = {
        let mut store = state.store.write().await;
        match lookup {
            CellsLookup::Range(min, max) => store.get_range(min, max).await,
            CellsLookup::Owner(owner) => store.get_owned(&owner).await,
        }
    };
    Ok(Json(cells))
}

async fn get_cell(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Cell>, AppError> {
    let cell = state.store.write().await.get_cell(id).await;
    match cell {
        Some(cell) if cell.is_visible() => Ok(Json(cell)),
        _ => Err(AppError::NotFound(format!("cell {id}"))),
    }
}

async fn get_capacity(State(state): State<AppState>) -> impl IntoResponse {
    let capacity = state.store.write().await.capacity().await;
    Json(serde_json::json!({ "capacity": capacity }))
}

#[derive(Deserialize)]
struct LikeRequest {
    user_id: String,
}

async fn like_cell(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<LikeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = body.user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::BadRequest("user_id is required".into()));
    }
    let capacity = state.store.write().await.capacity().await;
    if id >= capacity {
        return Err(AppError::NotFound(format!("cell {id}")));
    }

    let event = StoreEvent::Liked {
        cell_id: id,
        user_id: user_id.to_string(),
        timestamp_ms: now_ms(),
    };
    let json = serde_json::to_string(&event)?;
    let _: () = state
        .valkey
        .clone()
        .lpush(common::valkey::EVENT_QUEUE, json)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": true, "cell_id": id })),
    ))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let queue_len: Option<u64> = state
        .valkey
        .clone()
        .llen(common::valkey::EVENT_QUEUE)
        .await
        .unwrap_or(None);

    let stored: Option<u64> = state
        .valkey
        .clone()
        .zcard(common::valkey::CELL_INDEX_ZSET)
        .await
        .unwrap_or(None);

    Json(serde_json::json!({
        "status": "ok",
        "stored_cells": stored.unwrap_or(0),
        "queue_length": queue_len.unwrap_or(0)
    }))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_socket(socket, state))
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_range() {
        assert!(validate_range(0, 1_010).is_ok());
        assert!(validate_range(5, 5).is_ok());
        assert!(validate_range(0, MAX_RANGE_SPAN).is_ok());
        assert!(matches!(validate_range(10, 9), Err(AppError::BadRequest(_))));
        assert!(matches!(
            validate_range(0, MAX_RANGE_SPAN + 1),
            Err(AppError::BadRequest(_))
        ));
    }

    fn query(min: Option<u64>, max: Option<u64>, owner: Option<&str>) -> CellsQuery {
        CellsQuery {
            min,
            max,
            owner: owner.map(String::from),
        }
    }

    #[test]
    fn test_cells_query_lookup() {
        assert!(matches!(
            query(Some(0), Some(1_010), None).lookup(),
            Ok(CellsLookup::Range(0, 1_010))
        ));
        match query(None, None, Some(" alice ")).lookup() {
            Ok(CellsLookup::Owner(owner)) => assert_eq!(owner, "alice"),
            _ => panic!("expected owner lookup"),
        }
        assert!(query(None, None, Some("  ")).lookup().is_err());
        assert!(query(Some(0), None, None).lookup().is_err());
        assert!(query(Some(0), Some(10), Some("alice")).lookup().is_err());
        assert!(query(None, None, None).lookup().is_err());
        assert!(query(Some(0), Some(MAX_RANGE_SPAN + 1), None).lookup().is_err());
    }

    #[test]
    fn test_bad_request_maps_to_400() {
        let response = AppError::BadRequest("x".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = AppError::NotFound("cell 1".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
