use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use xoarena_core::{AuthRequirement, Endpoint, Outcome};

use crate::dto::{MatchRequest, OkResponse};
use crate::error::AppError;
use crate::state::AppState;

use super::BODY_LIMIT;

/// `POST /api/match` with `{"outcome": "x" | "o" | "draw"}`.
///
/// The body is validated before identity so a malformed submission is a
/// 400 whether or not the caller is authenticated.
pub async fn record(State(state): State<AppState>, request: Request) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();

    let bytes = axum::body::to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|_| AppError::BadRequest("invalid JSON body".to_string()))?;
    let payload: MatchRequest = serde_json::from_slice(&bytes)
        .map_err(|_| AppError::BadRequest("invalid JSON body".to_string()))?;
    let outcome: Outcome = payload
        .outcome
        .parse()
        .map_err(|_| AppError::BadRequest("outcome must be one of x, o, draw".to_string()))?;

    let admitted = state
        .gate
        .admit(
            &parts,
            Endpoint::Match,
            state.config.rate_limit.match_limits(),
            AuthRequirement::Required,
        )
        .await?;
    let principal = admitted
        .principal
        .ok_or_else(|| AppError::Internal("admitted without a principal".to_string()))?;

    state.records.record_outcome(principal, outcome).await?;

    let mut response = Json(OkResponse::ok()).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}
