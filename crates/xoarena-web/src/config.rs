use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;
use xoarena_core::{EndpointLimits, FailMode, RateRule};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// `redis://…` / `rediss://…`, or `memory` for the in-process store.
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub issuer_url: Option<String>,
    #[serde(default)]
    pub issuer_secret: Option<String>,
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
}

/// `limit` events per `window_secs`, as written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RuleConfig {
    pub limit: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub fail_mode: FailMode,
    #[serde(default = "default_match_fid")]
    pub match_fid: RuleConfig,
    #[serde(default = "default_match_ip")]
    pub match_ip: RuleConfig,
    #[serde(default = "default_leaderboard_fid")]
    pub leaderboard_fid: RuleConfig,
    #[serde(default = "default_leaderboard_ip")]
    pub leaderboard_ip: RuleConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardConfig {
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u32,
}

/// Which identity issuer the server talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuerChoice {
    Remote(Url),
    SharedSecret(String),
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_store_url() -> String {
    "memory".to_string()
}

fn default_store_timeout_ms() -> u64 {
    1000
}

fn default_verify_timeout_ms() -> u64 {
    3000
}

fn default_max_age_secs() -> u32 {
    15
}

fn default_match_fid() -> RuleConfig {
    RuleConfig { limit: 120, window_secs: 60 }
}

fn default_match_ip() -> RuleConfig {
    RuleConfig { limit: 240, window_secs: 60 }
}

fn default_leaderboard_fid() -> RuleConfig {
    RuleConfig { limit: 120, window_secs: 60 }
}

fn default_leaderboard_ip() -> RuleConfig {
    RuleConfig { limit: 300, window_secs: 60 }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            password: None,
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer_url: None,
            issuer_secret: None,
            verify_timeout_ms: default_verify_timeout_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            fail_mode: FailMode::default(),
            match_fid: default_match_fid(),
            match_ip: default_match_ip(),
            leaderboard_fid: default_leaderboard_fid(),
            leaderboard_ip: default_leaderboard_ip(),
        }
    }
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self { max_age_secs: default_max_age_secs() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            leaderboard: LeaderboardConfig::default(),
        }
    }
}

impl RuleConfig {
    pub fn to_rule(self) -> RateRule {
        RateRule::new(self.limit, Duration::from_secs(self.window_secs))
    }
}

impl FromStr for RuleConfig {
    type Err = anyhow::Error;

    /// Parses `"<limit>/<window_secs>"`, e.g. `"120/60"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (limit, window) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("expected <limit>/<window_secs>, got {s:?}"))?;
        Ok(Self {
            limit: limit.trim().parse()?,
            window_secs: window.trim().parse()?,
        })
    }
}

impl RateLimitConfig {
    pub fn match_limits(&self) -> EndpointLimits {
        EndpointLimits {
            principal: self.match_fid.to_rule(),
            origin: self.match_ip.to_rule(),
        }
    }

    pub fn leaderboard_limits(&self) -> EndpointLimits {
        EndpointLimits {
            principal: self.leaderboard_fid.to_rule(),
            origin: self.leaderboard_ip.to_rule(),
        }
    }

    fn rules(&self) -> [(&'static str, RuleConfig); 4] {
        [
            ("match_fid", self.match_fid),
            ("match_ip", self.match_ip),
            ("leaderboard_fid", self.leaderboard_fid),
            ("leaderboard_ip", self.leaderboard_ip),
        ]
    }
}

impl StoreConfig {
    pub fn is_memory(&self) -> bool {
        self.url.eq_ignore_ascii_case("memory")
    }

    pub fn call_deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Redis URL with the configured password applied.
    pub fn connection_url(&self) -> anyhow::Result<String> {
        let mut url = Url::parse(&self.url)?;
        if !matches!(url.scheme(), "redis" | "rediss") {
            anyhow::bail!("unsupported store scheme {:?}", url.scheme());
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| anyhow::anyhow!("store URL cannot carry a password"))?;
        }
        Ok(url.into())
    }
}

impl AuthConfig {
    pub fn verify_deadline(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn issuer(&self) -> anyhow::Result<IssuerChoice> {
        match (&self.issuer_url, &self.issuer_secret) {
            (Some(url), secret) => {
                if secret.is_some() {
                    tracing::warn!("Both issuer URL and issuer secret configured; using the URL.");
                }
                Ok(IssuerChoice::Remote(Url::parse(url)?))
            }
            (None, Some(secret)) => Ok(IssuerChoice::SharedSecret(secret.clone())),
            (None, None) => anyhow::bail!(
                "No identity issuer configured. Set XOARENA_ISSUER_URL or XOARENA_ISSUER_SECRET."
            ),
        }
    }
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("XOARENA_CONFIG").map(PathBuf::from).ok();

        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents)?
        } else {
            ServerConfig::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `XOARENA_*` overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(addr) = var("XOARENA_BIND_ADDR") {
            self.bind_addr = addr.parse()?;
        }

        if let Some(url) = var("XOARENA_STORE_URL") {
            self.store.url = url;
        }
        if let Some(password) = var("XOARENA_STORE_PASSWORD") {
            self.store.password = Some(password);
        }
        if let Some(ms) = var("XOARENA_STORE_TIMEOUT_MS") {
            self.store.timeout_ms = ms.parse()?;
        }

        if let Some(url) = var("XOARENA_ISSUER_URL") {
            self.auth.issuer_url = Some(url);
        }
        if let Some(secret) = var("XOARENA_ISSUER_SECRET") {
            self.auth.issuer_secret = Some(secret);
        }
        if let Some(ms) = var("XOARENA_VERIFY_TIMEOUT_MS") {
            self.auth.verify_timeout_ms = ms.parse()?;
        }

        if let Some(mode) = var("XOARENA_LIMITER_FAIL_MODE") {
            self.rate_limit.fail_mode = match mode.to_ascii_lowercase().as_str() {
                "open" => FailMode::Open,
                "closed" => FailMode::Closed,
                other => anyhow::bail!("XOARENA_LIMITER_FAIL_MODE must be open or closed, got {other:?}"),
            };
        }
        if let Some(rule) = var("XOARENA_RL_MATCH_FID") {
            self.rate_limit.match_fid = rule.parse()?;
        }
        if let Some(rule) = var("XOARENA_RL_MATCH_IP") {
            self.rate_limit.match_ip = rule.parse()?;
        }
        if let Some(rule) = var("XOARENA_RL_LEADERBOARD_FID") {
            self.rate_limit.leaderboard_fid = rule.parse()?;
        }
        if let Some(rule) = var("XOARENA_RL_LEADERBOARD_IP") {
            self.rate_limit.leaderboard_ip = rule.parse()?;
        }

        if let Some(secs) = var("XOARENA_LEADERBOARD_MAX_AGE_SECS") {
            self.leaderboard.max_age_secs = secs.parse()?;
        }

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, rule) in self.rate_limit.rules() {
            if rule.limit == 0 {
                anyhow::bail!("rate limit {name}: limit must be at least 1");
            }
            if rule.window_secs == 0 {
                anyhow::bail!("rate limit {name}: window must be at least 1 second");
            }
        }
        if self.store.timeout_ms == 0 {
            anyhow::bail!("store timeout must be at least 1ms");
        }
        if self.auth.verify_timeout_ms == 0 {
            anyhow::bail!("verification timeout must be at least 1ms");
        }
        if !self.store.is_memory() {
            self.store.connection_url()?;
        }
        self.auth.issuer()?;

        if self.rate_limit.fail_mode == FailMode::Closed {
            tracing::warn!("Limiter fails closed: a store outage will reject all requests.");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.store.is_memory());
        assert_eq!(config.store.call_deadline(), Duration::from_millis(1000));
        assert_eq!(config.auth.verify_deadline(), Duration::from_millis(3000));
        assert_eq!(config.rate_limit.fail_mode, FailMode::Open);
        assert_eq!(
            config.rate_limit.match_limits().principal,
            RateRule::per_minute(120)
        );
        assert_eq!(config.leaderboard.max_age_secs, 15);
    }

    #[test]
    fn parses_toml_with_partial_sections() {
        let config: ServerConfig = toml::from_str(
            r#"
            bind_addr = "127.0.0.1:9000"

            [store]
            url = "redis://cache.internal:6379"
            timeout_ms = 250

            [auth]
            issuer_secret = "s3cret"

            [rate_limit]
            fail_mode = "closed"
            match_fid = { limit = 10, window_secs = 30 }
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.store.timeout_ms, 250);
        assert_eq!(config.rate_limit.fail_mode, FailMode::Closed);
        assert_eq!(
            config.rate_limit.match_fid,
            RuleConfig { limit: 10, window_secs: 30 }
        );
        assert_eq!(config.rate_limit.match_ip, default_match_ip());
        assert_eq!(config.auth.verify_timeout_ms, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = ServerConfig::default();
        config
            .apply_env(env(&[
                ("XOARENA_STORE_URL", "redis://localhost:6379/0"),
                ("XOARENA_STORE_TIMEOUT_MS", "400"),
                ("XOARENA_ISSUER_URL", "https://issuer.example/verify"),
                ("XOARENA_RL_MATCH_FID", "5/10"),
                ("XOARENA_LIMITER_FAIL_MODE", "CLOSED"),
                ("XOARENA_LEADERBOARD_MAX_AGE_SECS", "0"),
            ]))
            .unwrap();

        assert_eq!(config.store.url, "redis://localhost:6379/0");
        assert_eq!(config.store.timeout_ms, 400);
        assert_eq!(config.rate_limit.fail_mode, FailMode::Closed);
        assert_eq!(
            config.rate_limit.match_limits().principal,
            RateRule::new(5, Duration::from_secs(10))
        );
        assert_eq!(config.leaderboard.max_age_secs, 0);
        assert!(matches!(config.auth.issuer().unwrap(), IssuerChoice::Remote(_)));
    }

    #[test]
    fn bad_env_values_are_errors() {
        let mut config = ServerConfig::default();
        assert!(config.apply_env(env(&[("XOARENA_RL_MATCH_IP", "lots")])).is_err());
        assert!(config
            .apply_env(env(&[("XOARENA_LIMITER_FAIL_MODE", "sometimes")]))
            .is_err());
        assert!(config.apply_env(env(&[("XOARENA_BIND_ADDR", "nowhere")])).is_err());
    }

    #[test]
    fn rule_parsing() {
        assert_eq!(
            "120/60".parse::<RuleConfig>().unwrap(),
            RuleConfig { limit: 120, window_secs: 60 }
        );
        assert_eq!(
            " 3 / 1 ".parse::<RuleConfig>().unwrap(),
            RuleConfig { limit: 3, window_secs: 1 }
        );
        assert!("120".parse::<RuleConfig>().is_err());
        assert!("a/b".parse::<RuleConfig>().is_err());
    }

    #[test]
    fn validation_rejects_zero_limits_and_missing_issuer() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_err(), "no issuer configured");

        config.auth.issuer_secret = Some("s3cret".to_string());
        assert!(config.validate().is_ok());

        config.rate_limit.leaderboard_ip.limit = 0;
        assert!(config.validate().is_err());
        config.rate_limit.leaderboard_ip.limit = 1;

        config.rate_limit.match_ip.window_secs = 0;
        assert!(config.validate().is_err());
        config.rate_limit.match_ip.window_secs = 1;

        config.store.url = "http://not-redis".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn issuer_url_wins_over_secret() {
        let auth = AuthConfig {
            issuer_url: Some("https://issuer.example/verify".to_string()),
            issuer_secret: Some("s3cret".to_string()),
            ..AuthConfig::default()
        };
        assert_eq!(
            auth.issuer().unwrap(),
            IssuerChoice::Remote(Url::parse("https://issuer.example/verify").unwrap())
        );
    }

    #[test]
    fn store_password_is_applied() {
        let store = StoreConfig {
            url: "redis://cache.internal:6379".to_string(),
            password: Some("hunter2".to_string()),
            ..StoreConfig::default()
        };
        assert_eq!(
            store.connection_url().unwrap(),
            "redis://:hunter2@cache.internal:6379"
        );
    }
}
