//! Identity issuer adapters.

pub mod jwt;
pub mod remote;

use std::sync::Arc;

use xoarena_core::IdentityIssuer;

use crate::config::{AuthConfig, IssuerChoice};

pub fn build_issuer(config: &AuthConfig) -> anyhow::Result<Arc<dyn IdentityIssuer>> {
    Ok(match config.issuer()? {
        IssuerChoice::Remote(url) => {
            tracing::info!("Verifying tokens against {url}");
            Arc::new(remote::RemoteIssuer::new(url, config.verify_deadline())?)
        }
        IssuerChoice::SharedSecret(secret) => {
            tracing::info!("Verifying tokens with the shared-secret issuer");
            Arc::new(jwt::SharedSecretIssuer::new(&secret))
        }
    })
}
