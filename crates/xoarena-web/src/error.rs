use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use xoarena_core::{CoreError, Rejection, Scope, VerificationFailure};

#[derive(Debug)]
pub enum AppError {
    Unauthorized(VerificationFailure),
    RateLimited { scope: Scope, retry_after: Duration },
    BadRequest(String),
    /// Carries the `Allow` header value.
    MethodNotAllowed(&'static str),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = ErrorBody {
            ok: false,
            error: "",
            scope: None,
            message: None,
        };

        let status = match &self {
            AppError::Unauthorized(failure) => {
                // All three causes look the same to the client.
                tracing::debug!(failure = failure.as_str(), "rejecting unauthenticated request");
                body.error = "unauthorized";
                StatusCode::UNAUTHORIZED
            }
            AppError::RateLimited { scope, .. } => {
                body.error = "rate_limited";
                body.scope = Some(scope.label());
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::BadRequest(msg) => {
                body.error = "bad_request";
                body.message = Some(msg.clone());
                StatusCode::BAD_REQUEST
            }
            AppError::MethodNotAllowed(_) => {
                body.error = "method_not_allowed";
                StatusCode::METHOD_NOT_ALLOWED
            }
            AppError::Internal(msg) => {
                // Log the real error server-side, return generic message to client
                tracing::error!("Internal error: {}", msg);
                body.error = "internal_error";
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let mut response = (status, axum::Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        match self {
            AppError::RateLimited { retry_after, .. } => {
                let secs = retry_after.as_secs().max(1);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
            }
            AppError::MethodNotAllowed(allow) => {
                headers.insert(header::ALLOW, HeaderValue::from_static(allow));
            }
            _ => {}
        }
        response
    }
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Unauthenticated(failure) => AppError::Unauthorized(failure),
            Rejection::RateLimited { scope, retry_after } => {
                AppError::RateLimited { scope, retry_after }
            }
        }
    }
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(format!("{e:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unauthorized_hides_cause() {
        for failure in [
            VerificationFailure::Missing,
            VerificationFailure::Invalid,
            VerificationFailure::Unavailable,
        ] {
            let response = AppError::Unauthorized(failure).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                body_json(response).await,
                serde_json::json!({ "ok": false, "error": "unauthorized" })
            );
        }
    }

    #[tokio::test]
    async fn rate_limited_discloses_scope_and_retry_after() {
        let response = AppError::RateLimited {
            scope: Scope::MatchPrincipal,
            retry_after: Duration::from_secs(60),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "ok": false, "error": "rate_limited", "scope": "fid" })
        );
    }

    #[tokio::test]
    async fn internal_error_is_generic() {
        let response =
            AppError::from(CoreError::Store("redis://secret-host refused".to_string()))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({ "ok": false, "error": "internal_error" }));
    }

    #[tokio::test]
    async fn method_not_allowed_sets_allow() {
        let response = AppError::MethodNotAllowed("POST").into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
    }

    #[tokio::test]
    async fn bad_request_carries_message() {
        let response = AppError::BadRequest("invalid JSON body".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "ok": false,
                "error": "bad_request",
                "message": "invalid JSON body",
            })
        );
    }
}
