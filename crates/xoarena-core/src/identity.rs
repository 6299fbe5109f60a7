//! Bearer-credential verification against a remote identity issuer.
//!
//! [`IdentityVerifier::resolve_principal`] turns a request into either a
//! [`Principal`] or a [`VerificationFailure`]. The issuer itself sits behind
//! the [`IdentityIssuer`] trait; adapters for concrete issuers live in the
//! web crate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::deadline::guard;
use crate::request::RequestMeta;

pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_millis(3000);

/// The authenticated caller, identified by its numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Principal(u64);

impl Principal {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }

    /// Parses an issuer subject. Only positive decimal integers are accepted.
    pub fn from_subject(subject: &str) -> Option<Self> {
        match subject.trim().parse::<u64>() {
            Ok(0) | Err(_) => None,
            Ok(id) => Some(Self(id)),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a request could not be tied to a principal.
///
/// Clients see the same 401 for all three; the distinction is for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    Missing,
    Invalid,
    Unavailable,
}

impl VerificationFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            VerificationFailure::Missing => "missing",
            VerificationFailure::Invalid => "invalid",
            VerificationFailure::Unavailable => "unavailable",
        }
    }
}

pub type VerificationOutcome = Result<Principal, VerificationFailure>;

/// Payload of a successfully verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssuerError {
    /// The issuer looked at the token and rejected it.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The issuer could not give an answer.
    #[error("issuer unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityIssuer: Send + Sync {
    async fn verify_token(&self, token: &str, domain: &str) -> Result<VerifiedToken, IssuerError>;
}

pub struct IdentityVerifier {
    issuer: Arc<dyn IdentityIssuer>,
    deadline: Duration,
}

impl IdentityVerifier {
    pub fn new(issuer: Arc<dyn IdentityIssuer>, deadline: Duration) -> Self {
        Self { issuer, deadline }
    }

    pub async fn resolve_principal<R>(&self, req: &R) -> VerificationOutcome
    where
        R: RequestMeta + ?Sized,
    {
        let Some(token) = bearer_token(req) else {
            tracing::debug!(failure = "missing", "no bearer credential");
            return Err(VerificationFailure::Missing);
        };
        let token = token.to_string();

        let Some(domain) = expected_domain(req) else {
            tracing::warn!(failure = "unavailable", "cannot determine verification domain");
            return Err(VerificationFailure::Unavailable);
        };

        let issuer = self.issuer.clone();
        let verify_domain = domain.clone();
        let verified = guard("verify_token", self.deadline, async move {
            issuer.verify_token(&token, &verify_domain).await
        })
        .await;

        match verified {
            Ok(Ok(payload)) => match Principal::from_subject(&payload.subject) {
                Some(principal) => Ok(principal),
                None => {
                    tracing::warn!(
                        failure = "invalid",
                        subject = %payload.subject,
                        "verified token has a non-numeric subject"
                    );
                    Err(VerificationFailure::Invalid)
                }
            },
            Ok(Err(IssuerError::InvalidToken(reason))) => {
                tracing::warn!(failure = "invalid", %domain, %reason, "token rejected by issuer");
                Err(VerificationFailure::Invalid)
            }
            Ok(Err(IssuerError::Unavailable(reason))) => {
                tracing::warn!(failure = "unavailable", %domain, %reason, "issuer unavailable");
                Err(VerificationFailure::Unavailable)
            }
            Err(e) => {
                tracing::warn!(failure = "unavailable", %domain, error = %e, "verification call failed");
                Err(VerificationFailure::Unavailable)
            }
        }
    }
}

impl fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityVerifier")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// The `<token>` of an `Authorization: Bearer <token>` header.
pub fn bearer_token<R: RequestMeta + ?Sized>(req: &R) -> Option<&str> {
    req.header("authorization")?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Domain the token must have been issued for.
///
/// `X-Forwarded-Host` (first entry) wins over `Host`, which wins over the
/// request URL authority. Malformed values yield `None`.
pub fn expected_domain<R: RequestMeta + ?Sized>(req: &R) -> Option<String> {
    let forwarded = req
        .header("x-forwarded-host")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let host = req
        .header("host")
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let domain = forwarded.or(host).or_else(|| req.url_authority())?;
    is_well_formed_domain(domain).then(|| domain.to_ascii_lowercase())
}

fn is_well_formed_domain(domain: &str) -> bool {
    !domain.is_empty()
        && !domain
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '\\' | '@' | '?' | '#'))
}
