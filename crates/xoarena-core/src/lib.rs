//! XO arena core library: admission control in front of the game backend.
//!
//! `xoarena-core` decides, for every inbound request, who the caller is and
//! whether it may proceed right now. It holds no state between requests;
//! all shared state lives in the store behind [`KvStore`].
//!
//! # Modules
//!
//! - [`deadline`] — Deadline-guarded calls that never cancel the underlying operation.
//! - [`identity`] — Bearer-credential verification into a [`Principal`].
//! - [`limiter`] — Distributed sliding-window limiter, failing open by default.
//! - [`origin`] — Best-effort caller address from forwarding headers.
//! - [`admission`] — Composes the above into one [`Gate::admit`] decision.
//! - [`records`] — Win/loss/draw counters and the wins ranking.
//! - [`store`] — Store port, deadline-guarded [`StoreHandle`], and [`MemoryStore`].
//! - [`request`] — Case-insensitive header lookup over any request shape.
//! - [`clock`] — Wall-clock port with a manual clock for tests.
//! - [`error`] — Unified error type ([`CoreError`]) and result alias ([`CoreResult`]).

pub mod admission;
pub mod clock;
pub mod deadline;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod origin;
pub mod records;
pub mod request;
pub mod store;

pub use admission::{Admitted, AuthRequirement, Endpoint, EndpointLimits, Gate, Rejection};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use identity::{
    IdentityIssuer, IdentityVerifier, IssuerError, Principal, VerificationFailure,
    VerificationOutcome, VerifiedToken,
};
pub use limiter::{FailMode, LimiterDecision, LimiterKey, RateRule, Scope, SlidingWindowLimiter};
pub use origin::resolve_origin;
pub use records::{GameRecords, LeaderboardEntry, Outcome};
pub use request::{PlainHeaders, RequestMeta};
pub use store::{KvStore, MemoryStore, StoreHandle};
