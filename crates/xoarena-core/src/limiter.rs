//! Distributed sliding-window rate limiter.
//!
//! Window state lives only in the shared store: one sorted set per
//! [`LimiterKey`], one member per recorded event, scored by its wall-clock
//! millisecond timestamp. Each [`SlidingWindowLimiter::check`] runs four
//! store calls in order:
//!
//! 1. `ZADD` the current event,
//! 2. evict events older than the window,
//! 3. `ZCARD` what is left,
//! 4. refresh the key's expiry so idle keys are reclaimed.
//!
//! The current event counts toward the total, so a rule with
//! `max_events = 3` allows three events per window and denies the fourth.
//! Every call carries the store handle's deadline. When any of them fails,
//! the configured [`FailMode`] decides; the default is to allow.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;

use crate::clock::Clock;
use crate::error::CoreResult;
use crate::identity::Principal;
use crate::store::StoreHandle;

/// Which endpoint and which kind of identifier a limiter key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    MatchPrincipal,
    MatchOrigin,
    LeaderboardPrincipal,
    LeaderboardOrigin,
}

impl Scope {
    /// Partition tag used in the store key.
    pub fn tag(self) -> &'static str {
        match self {
            Scope::MatchPrincipal => "match:fid",
            Scope::MatchOrigin => "match:ip",
            Scope::LeaderboardPrincipal => "leaderboard:fid",
            Scope::LeaderboardOrigin => "leaderboard:ip",
        }
    }

    /// Label disclosed to clients when this scope denies a request.
    pub fn label(self) -> &'static str {
        match self {
            Scope::MatchPrincipal | Scope::LeaderboardPrincipal => "fid",
            Scope::MatchOrigin | Scope::LeaderboardOrigin => "ip",
        }
    }
}

/// Partition of the shared counter space. Equal keys share one window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    scope: Scope,
    identifier: String,
}

impl LimiterKey {
    pub fn new(scope: Scope, identifier: impl Into<String>) -> Self {
        Self {
            scope,
            identifier: identifier.into(),
        }
    }

    pub fn principal(scope: Scope, principal: Principal) -> Self {
        Self::new(scope, principal.to_string())
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn store_key(&self) -> String {
        format!("rl:{}:{}", self.scope.tag(), self.identifier)
    }
}

impl fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.store_key())
    }
}

/// At most `max_events` events (the current one included) per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub max_events: u32,
    pub window: Duration,
}

impl RateRule {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self { max_events, window }
    }

    pub fn per_minute(max_events: u32) -> Self {
        Self::new(max_events, Duration::from_secs(60))
    }

    /// Key lifetime in whole seconds, never below one.
    fn expiry_secs(&self) -> u64 {
        self.window.as_millis().div_ceil(1000).max(1) as u64
    }
}

/// What to answer when the store cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterDecision {
    Allowed,
    Denied { scope: Scope, retry_after: Duration },
}

impl LimiterDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimiterDecision::Allowed)
    }
}

pub struct SlidingWindowLimiter {
    store: StoreHandle,
    clock: Arc<dyn Clock>,
    fail_mode: FailMode,
}

impl SlidingWindowLimiter {
    pub fn new(store: StoreHandle, clock: Arc<dyn Clock>, fail_mode: FailMode) -> Self {
        Self {
            store,
            clock,
            fail_mode,
        }
    }

    pub async fn check(&self, key: &LimiterKey, rule: RateRule) -> LimiterDecision {
        let denied = LimiterDecision::Denied {
            scope: key.scope(),
            retry_after: rule.window,
        };

        match self.record_and_count(key, rule).await {
            Ok(count) if count <= u64::from(rule.max_events) => LimiterDecision::Allowed,
            Ok(count) => {
                tracing::debug!(%key, count, max = rule.max_events, "rate limit exceeded");
                denied
            }
            Err(e) => match self.fail_mode {
                FailMode::Open => {
                    tracing::warn!(%key, error = %e, "limiter store failed, allowing request");
                    LimiterDecision::Allowed
                }
                FailMode::Closed => {
                    tracing::warn!(%key, error = %e, "limiter store failed, denying request");
                    denied
                }
            },
        }
    }

    /// Runs every check concurrently; all must allow.
    ///
    /// When several deny, the first denial in `checks` order is reported.
    pub async fn check_all(&self, checks: &[(LimiterKey, RateRule)]) -> LimiterDecision {
        let decisions = join_all(checks.iter().map(|(key, rule)| self.check(key, *rule))).await;
        decisions
            .into_iter()
            .find(|d| !d.is_allowed())
            .unwrap_or(LimiterDecision::Allowed)
    }

    async fn record_and_count(&self, key: &LimiterKey, rule: RateRule) -> CoreResult<u64> {
        let store_key = key.store_key();
        let now = self.clock.now_millis();
        let window_ms = rule.window.as_millis() as i64;
        // Unique per event so concurrent checks in the same millisecond never collide.
        let member = format!("{now}-{}", uuid::Uuid::new_v4());

        let k = store_key.clone();
        self.store
            .call("zadd", move |s| async move { s.zadd(&k, &member, now as f64).await })
            .await?;

        let k = store_key.clone();
        let cutoff = (now - window_ms - 1) as f64;
        self.store
            .call("zremrangebyscore", move |s| async move {
                s.zrem_range_by_score(&k, 0.0, cutoff).await
            })
            .await?;

        let k = store_key.clone();
        let count = self
            .store
            .call("zcard", move |s| async move { s.zcard(&k).await })
            .await?;

        let k = store_key;
        let expiry = rule.expiry_secs();
        self.store
            .call("expire", move |s| async move { s.expire(&k, expiry).await })
            .await?;

        Ok(count)
    }
}

impl fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("store", &self.store)
            .field("fail_mode", &self.fail_mode)
            .finish_non_exhaustive()
    }
}
