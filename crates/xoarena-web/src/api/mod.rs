mod leaderboard;
mod matches;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::dto::OkResponse;
use crate::error::AppError;
use crate::state::AppState;

/// Largest request body any endpoint accepts.
pub const BODY_LIMIT: usize = 16 * 1024;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route(
            "/leaderboard",
            get(leaderboard::top).fallback(|| async { AppError::MethodNotAllowed("GET, HEAD") }),
        )
        .route(
            "/match",
            post(matches::record).fallback(|| async { AppError::MethodNotAllowed("POST") }),
        )
}

/// The full application: routes, state and the HTTP middleware stack.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api_router())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<OkResponse> {
    Json(OkResponse::ok())
}
