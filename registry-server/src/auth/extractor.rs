use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use tracing::{debug, warn};

use crate::auth::gate::Capability;
use crate::error::AppError;
use crate::server::AppState;

/// The caller's administrative capability, resolved from an optional
/// `Authorization: Bearer <admin token>` header. Network origin is never
/// consulted.
///
/// ```ignore
/// async fn handler(caller: Caller, ...) { }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Capability);

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(Caller(Capability::Anonymous));
        }

        let TypedHeader(auth) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    warn!("auth rejected: invalid Authorization header");
                    AppError::Unauthorized("invalid Authorization header".into())
                })?;

        let capability = state.registry.gate().resolve_capability(Some(auth.token()))?;
        debug!(?capability, "request capability resolved");
        Ok(Caller(capability))
    }
}
