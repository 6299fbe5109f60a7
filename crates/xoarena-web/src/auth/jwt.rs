use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use xoarena_core::{IdentityIssuer, IssuerError, VerifiedToken};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub exp: usize,
}

/// Mints a token the [`SharedSecretIssuer`] accepts for `domain`.
#[cfg(test)]
pub fn create_token(
    secret: &str,
    ttl_secs: u64,
    fid: u64,
    domain: &str,
) -> anyhow::Result<(String, u64)> {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let expires_at = now + ttl_secs;

    let claims = Claims {
        sub: fid.to_string(),
        aud: domain.to_ascii_lowercase(),
        exp: expires_at as usize,
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, expires_at))
}

/// Verifies HS256 tokens whose audience is the request domain.
pub struct SharedSecretIssuer {
    key: DecodingKey,
}

impl SharedSecretIssuer {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

#[async_trait]
impl IdentityIssuer for SharedSecretIssuer {
    async fn verify_token(&self, token: &str, domain: &str) -> Result<VerifiedToken, IssuerError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[domain]);

        let data = decode::<Claims>(token, &self.key, &validation)
            .map_err(|e| IssuerError::InvalidToken(e.to_string()))?;

        Ok(VerifiedToken {
            subject: data.claims.sub,
        })
    }
}
