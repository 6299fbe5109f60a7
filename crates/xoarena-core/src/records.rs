//! Per-principal game records and the wins ranking.
//!
//! Layout in the shared store:
//! - `user:<fid>` hash: `wins`, `losses`, `draws`, `fid`, `updated_at`
//!   and optionally `username`;
//! - `lb:wins` sorted set: member `<fid>`, score = wins.
//!
//! Unlike the limiter, store failures here are returned to the caller.
//! Writes are not deduplicated: submitting the same outcome twice counts
//! it twice.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::CoreResult;
use crate::identity::Principal;
use crate::store::StoreHandle;

pub const RANKING_KEY: &str = "lb:wins";

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 25;
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

pub fn record_key(fid: u64) -> String {
    format!("user:{fid}")
}

/// Result of one finished game, from the reporting player's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Wire value `"x"`.
    Win,
    /// Wire value `"o"`.
    Loss,
    /// Wire value `"draw"`.
    Draw,
}

impl Outcome {
    /// Counter field incremented for this outcome.
    pub fn field(self) -> &'static str {
        match self {
            Outcome::Win => "wins",
            Outcome::Loss => "losses",
            Outcome::Draw => "draws",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown outcome: {0:?}")]
pub struct UnknownOutcome(pub String);

impl FromStr for Outcome {
    type Err = UnknownOutcome;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" => Ok(Outcome::Win),
            "o" => Ok(Outcome::Loss),
            "draw" => Ok(Outcome::Draw),
            other => Err(UnknownOutcome(other.to_string())),
        }
    }
}

/// One row of the public standings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub fid: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
    pub username: Option<String>,
}

/// Parses a `limit` query value: unparsable or missing means the default,
/// anything else is clamped to `1..=MAX_LEADERBOARD_LIMIT`.
pub fn clamp_limit(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .map(|n| n.clamp(1, MAX_LEADERBOARD_LIMIT as i64) as usize)
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
}

pub struct GameRecords {
    store: StoreHandle,
    clock: Arc<dyn Clock>,
}

impl GameRecords {
    pub fn new(store: StoreHandle, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Counts one outcome for `principal`, bumping the ranking on a win,
    /// then stamps the record.
    pub async fn record_outcome(&self, principal: Principal, outcome: Outcome) -> CoreResult<()> {
        let fid = principal.id();
        let key = record_key(fid);

        let k = key.clone();
        let total = self
            .store
            .call("hincrby", move |s| async move {
                s.hincr_by(&k, outcome.field(), 1).await
            })
            .await?;

        if outcome == Outcome::Win {
            let member = fid.to_string();
            self.store
                .call("zincrby", move |s| async move {
                    s.zincr_by(RANKING_KEY, &member, 1.0).await
                })
                .await?;
        }

        let stamp = vec![
            ("fid".to_string(), fid.to_string()),
            ("updated_at".to_string(), self.clock.now_millis().to_string()),
        ];
        self.store
            .call("hset", move |s| async move { s.hset_multiple(&key, &stamp).await })
            .await?;

        tracing::info!(%principal, outcome = outcome.field(), total, "outcome recorded");
        Ok(())
    }

    /// Top `limit` principals by wins, joined with their stored counters.
    pub async fn top(&self, limit: usize) -> CoreResult<Vec<LeaderboardEntry>> {
        let stop = limit.clamp(1, MAX_LEADERBOARD_LIMIT) as isize - 1;
        let rows = self
            .store
            .call("zrevrange", move |s| async move {
                s.zrevrange_with_scores(RANKING_KEY, 0, stop).await
            })
            .await?;

        let ranked: Vec<(u64, f64)> = rows
            .into_iter()
            .filter_map(|(member, score)| match member.parse::<u64>() {
                Ok(fid) => Some((fid, score)),
                Err(_) => {
                    tracing::warn!(%member, "skipping non-numeric ranking member");
                    None
                }
            })
            .collect();

        let records = try_join_all(ranked.iter().map(|(fid, _)| {
            let key = record_key(*fid);
            self.store
                .call("hgetall", move |s| async move { s.hgetall(&key).await })
        }))
        .await?;

        Ok(ranked
            .into_iter()
            .zip(records)
            .map(|((fid, score), record)| LeaderboardEntry {
                fid,
                wins: score.max(0.0) as u64,
                losses: counter(&record, "losses"),
                draws: counter(&record, "draws"),
                username: record.get("username").filter(|u| !u.is_empty()).cloned(),
            })
            .collect())
    }
}

impl fmt::Debug for GameRecords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameRecords")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

fn counter(record: &HashMap<String, String>, field: &str) -> u64 {
    record
        .get(field)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
}
