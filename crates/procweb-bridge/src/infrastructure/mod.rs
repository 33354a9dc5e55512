//! Infrastructure layer for procweb-bridge.
//!
//! The infrastructure layer handles all I/O: the WebSocket listener, the
//! per-session connection halves, the child process and its pipes, the staged
//! program on disk, and the configuration file.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener and performing the WebSocket upgrade
//! - Receiving and staging each submitted program
//! - Reading and writing categorized messages on the connection
//! - Spawning the interpreter and bridging its pipes to channels
//! - Orchestrating one session's tasks and their teardown
//!
//! # What does NOT belong here?
//!
//! - Routing decisions (that is the application layer)
//! - Configuration and lifecycle types (that is the domain layer)

pub mod config_file;
pub mod connection;
pub mod context;
pub mod pipes;
pub mod process;
pub mod session_bridge;
pub mod staging;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` and tests can call them concisely.
pub use config_file::{load_config, ConfigError, FileConfig};
pub use context::SessionContext;
pub use process::{ProcessOutcome, ProcessRunner};
pub use session_bridge::{run_session, SessionReport};
pub use staging::{receive_program, StagedProgram, StagingError};
pub use ws_server::{run_server, serve};
