//! procweb-bridge library crate.
//!
//! This crate runs a submitted program once per WebSocket connection and
//! streams the program's standard input, output and error over that
//! connection as categorized JSON messages.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Web client (JSON over WebSocket)
//!         ↕
//! [procweb-bridge]
//!   ├── domain/            Pure types: BridgeConfig, SessionId, SessionState
//!   ├── application/       Routing: inbound message → stdin / end of input / discard
//!   └── infrastructure/
//!         ├── ws_server/       Accept loop and route check (tokio-tungstenite)
//!         ├── staging/         Program intake and on-disk staging (tempfile)
//!         ├── session_bridge/  Per-session orchestration and teardown
//!         ├── connection/      Reader and writers on the split WebSocket
//!         ├── process/         Interpreter child process (tokio::process)
//!         ├── pipes/           stdin/stdout/stderr adapters
//!         ├── context/         Cancellation signal + task tracker
//!         └── config_file/     TOML configuration
//!         ↕
//! Interpreter child process (pipes)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `procweb-core`, plus channels.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.

/// Domain layer: configuration and session lifecycle types (no I/O).
pub mod domain;

/// Application layer: inbound message routing.
pub mod application;

/// Infrastructure layer: server, connection, process and staging.
pub mod infrastructure;
