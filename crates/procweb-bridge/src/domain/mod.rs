//! Domain layer for procweb-bridge.
//!
//! The domain layer contains pure types that have no dependencies on I/O,
//! networking, or processes.  This makes them easy to test in isolation.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures and their validation
//! - Session identity and lifecycle state
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `Child`, or `WebSocket` types
//! - File I/O or environment variable reading
//! - Anything that could block or fail due to external state
//!
//! Wire message types live in `procweb-core`, shared with any client tooling.

pub mod config;
pub mod session;

// Re-export the most commonly needed types at the domain module boundary
// so callers can write `domain::BridgeConfig` instead of the longer path.
pub use config::{BridgeConfig, ConfigValidationError};
pub use session::{SessionId, SessionState};
