//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (route-class lookup)
//!     → matcher.rs (evaluate prefix matches)
//!     → Return: SecurityPolicy (general when nothing matches)
//!
//! Route Compilation (at startup):
//!     RouteClassConfig[]
//!     → Resolve rate-limit profiles
//!     → Sort prefixes, longest first
//!     → Freeze as immutable RouteClassifier
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same path always maps to the same class

pub mod matcher;
pub mod router;

pub use router::{RouteClassifier, SecurityPolicy};
