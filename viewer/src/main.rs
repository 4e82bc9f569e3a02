use std::sync::Arc;

use viewer::{DisplayList, HttpCellSource, StaticSession, ViewerConfig, ViewportController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("viewer=info".parse()?),
        )
        .init();

    let store_url =
        std::env::var("CELL_STORE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".into());
    let requested: Option<u64> = std::env::var("FOCUS_CELL")
        .ok()
        .map(|v| v.parse())
        .transpose()?;
    let user = std::env::var("USER_ID").ok();

    let config = ViewerConfig::from_env()?;
    tracing::info!("Probing cell store at {}", store_url);

    let source = Arc::new(HttpCellSource::new(store_url));
    let session = Arc::new(StaticSession::new(user));
    let mut controller = ViewportController::new(config, source, session, DisplayList::new());

    controller.load_capacity().await?;
    controller.load_my_cells().await?;
    let focus = match requested {
        Some(id) => {
            if !controller.focus_cell(id) {
                anyhow::bail!("cell {} is outside the grid", id);
            }
            id
        }
        None => match controller.focus_my_cell() {
            Some(id) => id,
            None => {
                controller.focus_cell(0);
                0
            }
        },
    };
    controller.settle().await;

    let resident = controller.store().len();
    let loaded_cells: usize = controller
        .store()
        .coords()
        .filter_map(|coord| controller.store().peek(coord))
        .map(|chunk| chunk.cell_count())
        .sum();

    let summary = serde_json::json!({
        "focus": focus,
        "capacity": controller.layout().capacity,
        "my_cells": controller.my_cells(),
        "visible_range": controller.visible_range(),
        "resident_chunks": resident,
        "loaded_cells": loaded_cells,
        "cycle_stats": controller.stats(),
        "frame": controller.graphics().frame(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    controller.teardown();
    tracing::info!("Viewer run finished.");
    Ok(())
}
