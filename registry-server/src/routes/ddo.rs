use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use ddo_registry_common::ddo::DidDocument;
use ddo_registry_common::{
    MetadataUpdateRequest, RatingUpdateRequest, SignedRequest, TransferOwnershipRequest,
    WhitelistRequest,
};
use serde_json::{Value, json};

use super::json_body;
use crate::auth::Caller;
use crate::error::AppError;
use crate::server::AppState;

// ---------- POST /assets/ddo ----------

pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<DidDocument>), AppError> {
    let doc = state.registry.create(json_body(body)?).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

// ---------- PUT /assets/ddo/{did} ----------

pub async fn full_update(
    Caller(capability): Caller,
    State(state): State<AppState>,
    Path(did): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<DidDocument>), AppError> {
    let outcome = state
        .registry
        .full_update(&did, json_body(body)?, capability)
        .await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.document)))
}

// ---------- PUT /assets/ddo/owner/update/{did} ----------

pub async fn transfer_ownership(
    State(state): State<AppState>,
    Path(did): Path<String>,
    body: Result<Json<TransferOwnershipRequest>, JsonRejection>,
) -> Result<Json<DidDocument>, AppError> {
    let doc = state
        .registry
        .transfer_ownership(&did, json_body(body)?)
        .await?;
    Ok(Json(doc))
}

// ---------- PUT /assets/ddo/ratings/update/{did} ----------

pub async fn update_rating(
    State(state): State<AppState>,
    Path(did): Path<String>,
    body: Result<Json<RatingUpdateRequest>, JsonRejection>,
) -> Result<Json<DidDocument>, AppError> {
    let doc = state.registry.update_rating(&did, json_body(body)?).await?;
    Ok(Json(doc))
}

// ---------- POST /assets/ddo/accesssWhiteList/{did} ----------

pub async fn add_to_whitelist(
    State(state): State<AppState>,
    Path(did): Path<String>,
    body: Result<Json<WhitelistRequest>, JsonRejection>,
) -> Result<Json<DidDocument>, AppError> {
    let doc = state
        .registry
        .add_to_whitelist(&did, json_body(body)?)
        .await?;
    Ok(Json(doc))
}

// ---------- DELETE /assets/ddo/accesssWhiteList/{did} ----------

pub async fn remove_from_whitelist(
    State(state): State<AppState>,
    Path(did): Path<String>,
    body: Result<Json<WhitelistRequest>, JsonRejection>,
) -> Result<Json<DidDocument>, AppError> {
    let doc = state
        .registry
        .remove_from_whitelist(&did, json_body(body)?)
        .await?;
    Ok(Json(doc))
}

// ---------- PUT /assets/ddo/metadata/update/{did} ----------

pub async fn update_metadata(
    State(state): State<AppState>,
    Path(did): Path<String>,
    body: Result<Json<MetadataUpdateRequest>, JsonRejection>,
) -> Result<Json<DidDocument>, AppError> {
    let doc = state
        .registry
        .update_metadata(&did, json_body(body)?)
        .await?;
    Ok(Json(doc))
}

// ---------- DELETE /assets/ddo/{did} ----------

/// The `{updated, signature}` body is optional for administrative callers.
pub async fn retire(
    Caller(capability): Caller,
    State(state): State<AppState>,
    Path(did): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let proof: Option<SignedRequest> = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let proof = serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("invalid retire body: {e}")))?;
        Some(proof)
    };
    state.registry.retire(&did, proof, capability).await?;
    Ok(StatusCode::OK)
}

// ---------- DELETE /assets/ddo ----------

pub async fn retire_all(
    Caller(capability): Caller,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let retired = state.registry.retire_all(capability).await?;
    Ok(Json(json!({ "retired": retired })))
}
