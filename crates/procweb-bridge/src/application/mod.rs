//! Application layer for procweb-bridge.
//!
//! The application layer decides *what* happens to each inbound message; it
//! delegates *how* bytes reach the program and the connection to the
//! infrastructure layer.
//!
//! # Responsibilities
//!
//! - Classifying inbound categorized messages (stdin data, end of input,
//!   unsupported categories)
//! - Running the routing loop that feeds the program's stdin channel
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or spawning processes (that is infrastructure)
//! - Tokio task spawning (that happens in the infrastructure layer)
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod router;

pub use router::{route, run_router, RouteAction, RouterStats};
