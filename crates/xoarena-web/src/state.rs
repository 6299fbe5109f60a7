use std::sync::Arc;

use xoarena_core::{
    Clock, Gate, GameRecords, IdentityIssuer, IdentityVerifier, KvStore, SlidingWindowLimiter,
    StoreHandle,
};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub gate: Arc<Gate>,
    pub records: Arc<GameRecords>,
}

impl AppState {
    /// Wires the admission gate and records service onto one shared store.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn KvStore>,
        issuer: Arc<dyn IdentityIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let handle = StoreHandle::new(store, config.store.call_deadline());
        let limiter =
            SlidingWindowLimiter::new(handle.clone(), clock.clone(), config.rate_limit.fail_mode);
        let verifier = IdentityVerifier::new(issuer, config.auth.verify_deadline());

        Self {
            gate: Arc::new(Gate::new(verifier, limiter)),
            records: Arc::new(GameRecords::new(handle, clock)),
            config: Arc::new(config),
        }
    }
}
