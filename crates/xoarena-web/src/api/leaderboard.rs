use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use xoarena_core::records::clamp_limit;
use xoarena_core::{AuthRequirement, Endpoint};

use crate::dto::{LeaderboardQuery, LeaderboardResponse};
use crate::error::AppError;
use crate::state::AppState;

/// `GET /api/leaderboard?limit=N`
///
/// Credentials are optional here; verified callers are limited per fid as
/// well as per origin.
pub async fn top(State(state): State<AppState>, request: Request) -> Result<Response, AppError> {
    let (parts, _body) = request.into_parts();

    let query = Query::<LeaderboardQuery>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    let limit = clamp_limit(query.limit.as_deref());

    let admitted = state
        .gate
        .admit(
            &parts,
            Endpoint::Leaderboard,
            state.config.rate_limit.leaderboard_limits(),
            AuthRequirement::Optional,
        )
        .await?;

    let entries = state.records.top(limit).await?;
    tracing::debug!(
        limit,
        returned = entries.len(),
        fid = admitted.principal.map(|p| p.id()),
        "leaderboard served"
    );

    let cache_control = format!("public, max-age={}", state.config.leaderboard.max_age_secs);
    let mut response = Json(LeaderboardResponse { entries }).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_str(&cache_control).map_err(|e| AppError::Internal(e.to_string()))?,
    );
    Ok(response)
}
