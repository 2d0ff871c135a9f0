use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::{HealthResponse, ServiceStatus};
use crate::state::AppState;

pub async fn root(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "name": "Lectern API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Documentation Q&A backend with retrieval-grounded answers",
        "endpoints": {
            "chat": "POST /chat",
            "stream": "POST /chat/stream",
            "health": "GET /health",
            "history": "GET /history/{session_id}",
        },
    }))
}

/// Reports per-dependency reachability with latency. Overall status is
/// `degraded` when any dependency is down and `unavailable` when all are.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut services: BTreeMap<String, ServiceStatus> = BTreeMap::new();

    let started = Instant::now();
    let vector_status = match state.vector_index.collection_stats().await {
        Ok(stats) => ServiceStatus {
            name: "vector_index".to_string(),
            status: if stats.index_status == "green" {
                "healthy".to_string()
            } else {
                stats.index_status.clone()
            },
            latency_ms: started.elapsed().as_secs_f64() * 1_000.0,
            error: None,
        },
        Err(err) => ServiceStatus {
            name: "vector_index".to_string(),
            status: "unavailable".to_string(),
            latency_ms: started.elapsed().as_secs_f64() * 1_000.0,
            error: Some(err.to_string()),
        },
    };
    services.insert("vector_index".to_string(), vector_status);

    let (store_healthy, latency_ms, error) = state.history.health_check().await;
    services.insert(
        "relational_store".to_string(),
        ServiceStatus {
            name: "relational_store".to_string(),
            status: if store_healthy {
                "healthy".to_string()
            } else {
                "unavailable".to_string()
            },
            latency_ms,
            error,
        },
    );

    let unavailable = services
        .values()
        .filter(|s| s.status == "unavailable")
        .count();
    let status = if unavailable == services.len() {
        "unavailable"
    } else if unavailable > 0 {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now(),
        services,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
