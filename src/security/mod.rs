//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → pipeline.rs (orchestration, one policy per route class)
//!         → rate_limit.rs (fixed window per client IP and path)
//!         → csrf.rs (signed, time-limited tokens)
//!         → xss.rs (pattern detection; block, sanitize or report)
//!         → sanitize.rs (query and JSON body cleaning)
//!     → downstream handler
//!     → headers.rs (hardening headers on the way out)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: every stage runs independently of the others
//! - Fail closed on CSRF and rate limits, fail open on unparseable bodies
//! - Time comes from an injectable [`clock::Clock`] so windows and token
//!   expiry are testable

pub mod clock;
pub mod csrf;
pub mod headers;
pub mod pipeline;
pub mod rate_limit;
pub mod sanitize;
pub mod xss;

pub use clock::{Clock, ManualClock, SystemClock};
pub use csrf::{CsrfError, CsrfGuard};
pub use pipeline::{security_middleware, PipelineError, Rejection, SecurityPipeline};
pub use rate_limit::{InMemoryStore, RateLimitDecision, RateLimitStore, RateLimiter};
