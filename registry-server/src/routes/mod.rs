mod assets;
mod ddo;
mod health;

use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::error::AppError;
use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Health
        .route("/health", get(health::health))
        // Public reads
        .route("/assets", get(assets::list_asset_ids))
        .route("/assets/metadata/{did}", get(assets::get_metadata))
        .route(
            "/assets/ddo/query",
            get(assets::text_query).post(assets::structured_query),
        )
        .route("/assets/ddo/validate", post(assets::validate))
        // Registration and retirement
        .route(
            "/assets/ddo",
            get(assets::list_assets)
                .post(ddo::create)
                .delete(ddo::retire_all),
        )
        .route(
            "/assets/ddo/{did}",
            get(assets::get_ddo)
                .put(ddo::full_update)
                .delete(ddo::retire),
        )
        // Signed mutations
        .route("/assets/ddo/owner/update/{did}", put(ddo::transfer_ownership))
        .route("/assets/ddo/ratings/update/{did}", put(ddo::update_rating))
        .route(
            "/assets/ddo/accesssWhiteList/{did}",
            post(ddo::add_to_whitelist).delete(ddo::remove_from_whitelist),
        )
        .route("/assets/ddo/metadata/update/{did}", put(ddo::update_metadata))
}

/// Unwrap a JSON body, turning axum's rejection into a 400.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}
