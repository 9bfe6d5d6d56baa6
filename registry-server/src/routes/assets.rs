use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ddo_registry_common::ddo::{DidDocument, Service};
use ddo_registry_common::{AssetIdsResponse, PaginatedResponse, QueryRequest, TextQueryParams};
use serde_json::{Map, Value};
use tracing::debug;

use super::json_body;
use crate::error::AppError;
use crate::server::AppState;
use crate::store::QueryModel;

// ---------- GET /assets ----------

pub async fn list_asset_ids(
    State(state): State<AppState>,
) -> Result<Json<AssetIdsResponse>, AppError> {
    let ids = state
        .registry
        .list_listed()
        .await?
        .into_iter()
        .map(|doc| doc.id)
        .collect();
    Ok(Json(AssetIdsResponse { ids }))
}

// ---------- GET /assets/ddo ----------

pub async fn list_assets(
    State(state): State<AppState>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let mut assets = Map::new();
    for doc in state.registry.list_listed().await? {
        let id = doc.id.clone();
        assets.insert(id, serde_json::to_value(doc)?);
    }
    Ok(Json(assets))
}

// ---------- GET /assets/ddo/{did} ----------

pub async fn get_ddo(
    State(state): State<AppState>,
    Path(did): Path<String>,
) -> Result<Json<DidDocument>, AppError> {
    Ok(Json(state.registry.get(&did).await?))
}

// ---------- GET /assets/metadata/{did} ----------

pub async fn get_metadata(
    State(state): State<AppState>,
    Path(did): Path<String>,
) -> Result<Json<Service>, AppError> {
    Ok(Json(state.registry.get_metadata(&did).await?))
}

// ---------- GET /assets/ddo/query ----------

pub async fn text_query(
    State(state): State<AppState>,
    params: Result<Query<TextQueryParams>, QueryRejection>,
) -> Result<Json<PaginatedResponse>, AppError> {
    let Query(params) = params.map_err(|e| AppError::Validation(e.body_text()))?;
    let model = QueryModel::from_text_params(&params)?;
    Ok(Json(state.registry.query(model).await?))
}

// ---------- POST /assets/ddo/query ----------

pub async fn structured_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<PaginatedResponse>, AppError> {
    let request = json_body(body)?;
    let model = QueryModel::from_request(&request)?;
    Ok(Json(state.registry.query(model).await?))
}

// ---------- POST /assets/ddo/validate ----------

pub async fn validate(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let document = json_body(body)?;
    let issues = state.registry.validate(&document);
    if issues.is_empty() {
        return Ok(Json(true).into_response());
    }
    debug!(count = issues.len(), "submitted document failed validation");
    Ok((StatusCode::BAD_REQUEST, Json(issues)).into_response())
}
