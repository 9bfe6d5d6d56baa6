use axum::Json;
use ddo_registry_common::HealthResponse;

// ---------- GET /health ----------

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
