//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown_signal() resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger() → HTTP server drains, admin server stops,
//!                 rate limit sweeper exits
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every background task subscribes
//! - Listeners stop accepting first, in-flight requests finish

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
