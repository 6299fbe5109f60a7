//! Admission decision for one inbound request.
//!
//! [`Gate::admit`] resolves the caller's origin, verifies its identity when
//! required (or when a credential is offered on an optional-auth endpoint),
//! then runs the per-principal and per-origin limiter checks concurrently.

use std::time::Duration;

use crate::identity::{bearer_token, IdentityVerifier, Principal, VerificationFailure};
use crate::limiter::{LimiterDecision, LimiterKey, RateRule, Scope, SlidingWindowLimiter};
use crate::origin::resolve_origin;
use crate::request::RequestMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Match,
    Leaderboard,
}

impl Endpoint {
    pub fn principal_scope(self) -> Scope {
        match self {
            Endpoint::Match => Scope::MatchPrincipal,
            Endpoint::Leaderboard => Scope::LeaderboardPrincipal,
        }
    }

    pub fn origin_scope(self) -> Scope {
        match self {
            Endpoint::Match => Scope::MatchOrigin,
            Endpoint::Leaderboard => Scope::LeaderboardOrigin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    Required,
    /// Verify only when an `Authorization` header is present; a failed
    /// verification degrades to an anonymous caller.
    Optional,
}

/// Ceilings for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimits {
    pub principal: RateRule,
    pub origin: RateRule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub principal: Option<Principal>,
    pub origin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unauthenticated(VerificationFailure),
    RateLimited { scope: Scope, retry_after: Duration },
}

#[derive(Debug)]
pub struct Gate {
    verifier: IdentityVerifier,
    limiter: SlidingWindowLimiter,
}

impl Gate {
    pub fn new(verifier: IdentityVerifier, limiter: SlidingWindowLimiter) -> Self {
        Self { verifier, limiter }
    }

    pub async fn admit<R>(
        &self,
        req: &R,
        endpoint: Endpoint,
        limits: EndpointLimits,
        auth: AuthRequirement,
    ) -> Result<Admitted, Rejection>
    where
        R: RequestMeta + ?Sized + Sync,
    {
        let origin = resolve_origin(req);

        let principal = match auth {
            AuthRequirement::Required => Some(
                self.verifier
                    .resolve_principal(req)
                    .await
                    .map_err(Rejection::Unauthenticated)?,
            ),
            AuthRequirement::Optional if req.header("authorization").is_some() => {
                match self.verifier.resolve_principal(req).await {
                    Ok(principal) => Some(principal),
                    Err(failure) => {
                        tracing::debug!(
                            failure = failure.as_str(),
                            has_bearer = bearer_token(req).is_some(),
                            "optional credential not accepted, continuing anonymously"
                        );
                        None
                    }
                }
            }
            AuthRequirement::Optional => None,
        };

        // Principal first: it wins the reported scope when both deny.
        let mut checks = Vec::with_capacity(2);
        if let Some(principal) = principal {
            checks.push((
                LimiterKey::principal(endpoint.principal_scope(), principal),
                limits.principal,
            ));
        }
        checks.push((
            LimiterKey::new(endpoint.origin_scope(), origin.clone()),
            limits.origin,
        ));

        match self.limiter.check_all(&checks).await {
            LimiterDecision::Allowed => Ok(Admitted { principal, origin }),
            LimiterDecision::Denied { scope, retry_after } => {
                tracing::info!(
                    scope = scope.tag(),
                    principal = principal.map(Principal::id),
                    %origin,
                    "request rate limited"
                );
                Err(Rejection::RateLimited { scope, retry_after })
            }
        }
    }
}
