use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use super::NukeGuard;

/// Read-only ops surface: liveness probe plus a per-guild state dump.
pub fn router(guard: Arc<NukeGuard>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status/{guild_id}", get(status))
        .with_state(guard)
}

async fn health() -> &'static str {
    "ok"
}

async fn status(
    State(guard): State<Arc<NukeGuard>>,
    Path(guild_id): Path<u64>,
) -> Json<serde_json::Value> {
    let settings = guard.settings().snapshot().await;
    let exemptions = guard.exemptions().list().await;
    let audit = guard.audit().recent(guild_id, 20);
    Json(serde_json::json!({
        "settings": settings,
        "exemptions": exemptions,
        "audit": audit,
    }))
}

/// Bind and serve in the background; bind failures are logged, not fatal.
pub fn spawn(addr: String, guard: Arc<NukeGuard>) {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = ?e, %addr, "status endpoint bind failed");
                return;
            }
        };
        tracing::info!(%addr, "status endpoint listening");
        if let Err(e) = axum::serve(listener, router(guard)).await {
            tracing::warn!(error = ?e, "status endpoint stopped");
        }
    });
}
