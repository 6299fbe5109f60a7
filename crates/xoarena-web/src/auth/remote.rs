use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;
use xoarena_core::{IdentityIssuer, IssuerError, VerifiedToken};

/// Asks a remote verification endpoint about each token.
///
/// Request: `POST <verify_url>` with `{"token": .., "domain": ..}`.
/// 2xx with `{"sub": ..}` verifies; 400/401/403 rejects the token; any
/// other answer means the issuer is unavailable.
pub struct RemoteIssuer {
    client: reqwest::Client,
    verify_url: Url,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
    domain: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    sub: serde_json::Value,
}

impl RemoteIssuer {
    pub fn new(verify_url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, verify_url })
    }
}

#[async_trait]
impl IdentityIssuer for RemoteIssuer {
    async fn verify_token(&self, token: &str, domain: &str) -> Result<VerifiedToken, IssuerError> {
        let response = self
            .client
            .post(self.verify_url.clone())
            .json(&VerifyRequest { token, domain })
            .send()
            .await
            .map_err(|e| IssuerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if [StatusCode::BAD_REQUEST, StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN]
            .contains(&status)
        {
            return Err(IssuerError::InvalidToken(format!("issuer answered {status}")));
        }
        if !status.is_success() {
            return Err(IssuerError::Unavailable(format!("issuer answered {status}")));
        }

        let payload: VerifyResponse = response
            .json()
            .await
            .map_err(|e| IssuerError::Unavailable(format!("malformed issuer payload: {e}")))?;

        let subject = match payload.sub {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(VerifiedToken { subject })
    }
}
