//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It can be constructed from defaults, a TOML file, and CLI arguments (see
//! `main.rs` and `infrastructure::config_file`), with later sources overriding
//! earlier ones.
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) makes the bridge easy to embed in tests:
//! an integration test can point `interpreter` at `sh` and run real sessions.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default listener port; the web front end connects to 4400.
pub const DEFAULT_PORT: u16 = 4400;
/// Default listener address: every interface, [`DEFAULT_PORT`].
pub const DEFAULT_BIND_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT);
/// Default WebSocket route path, the one the web front end opens.
pub const DEFAULT_ROUTE_PATH: &str = "/echo";
/// Default interpreter binary.
pub const DEFAULT_INTERPRETER: &str = "lua";
/// Default file name for the staged program.
pub const DEFAULT_PROGRAM_FILE_NAME: &str = "main.lua";
/// Default capacity of each per-session message channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;
/// Default size of one read from a program output pipe.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 2048;
/// Default upper bound on submitted program size (1 MiB).
pub const DEFAULT_MAX_PROGRAM_BYTES: usize = 1024 * 1024;
/// Default limit on one inbound message that has not finished arriving
/// (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;
/// Default wait for the client's reply to our close frame.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A configuration value that cannot work at runtime.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigValidationError {
    /// Channels need room for at least one message.
    #[error("channel capacity must be at least 1")]
    ZeroChannelCapacity,

    /// Output pipes cannot be read into an empty buffer.
    #[error("read chunk size must be at least 1 byte")]
    ZeroReadChunkSize,

    /// No interpreter binary was configured.
    #[error("interpreter must not be empty")]
    EmptyInterpreter,

    /// The staged program file name must be a single path component.
    #[error("invalid program file name: {0:?}")]
    InvalidProgramFileName(String),

    /// A zero limit would reject every inbound message.
    #[error("{0} must be at least 1 byte")]
    ZeroLimit(&'static str),

    /// Route paths are matched against the request URI path.
    #[error("route path must start with '/': {0:?}")]
    InvalidRoutePath(String),
}

/// All runtime configuration for the session bridge.
///
/// Build this struct once at startup and then wrap it in an `Arc` so it can be
/// shared cheaply across all session tasks.
///
/// # Example
///
/// ```rust
/// use procweb_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 4400);
/// assert_eq!(cfg.channel_capacity, 8);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// The address and port the WebSocket server binds to.
    pub bind_addr: SocketAddr,

    /// Request path that is upgraded to a session.  Other paths get a 404.
    pub route_path: String,

    /// Interpreter binary invoked with the staged program path as its last
    /// argument.
    pub interpreter: PathBuf,

    /// Extra arguments placed between the interpreter and the program path.
    pub interpreter_args: Vec<String>,

    /// File name of the staged program inside its session directory.
    pub program_file_name: String,

    /// Text prepended to every submitted program.
    ///
    /// Programs talk to pipes, not a terminal, so most interpreters buffer
    /// their output.  A prelude such as
    /// `io.stdout:setvbuf("no") io.stderr:setvbuf("no")` (Lua) restores
    /// interactive behaviour.
    pub program_prelude: String,

    /// Parent directory for per-session staging directories.
    /// `None` uses the system temporary directory.
    pub staging_dir: Option<PathBuf>,

    /// Working directory of the child process.  `None` inherits the bridge's.
    pub working_dir: Option<PathBuf>,

    /// Capacity of each bounded per-session channel (stdin, stdout, stderr,
    /// inbound).  Small values give natural backpressure.
    pub channel_capacity: usize,

    /// Maximum bytes read from a program output pipe in one chunk.
    pub read_chunk_size: usize,

    /// Upper bound on the submitted program text, prelude excluded.
    pub max_program_bytes: usize,

    /// Upper bound on one inbound message while the bridge runs.  A client
    /// that keeps a message open past this many bytes ends its session.
    pub max_message_bytes: usize,

    /// How long teardown waits for the client to answer our close frame
    /// before cancelling the session outright.  Output the program produced
    /// is delivered first, however long that takes.
    pub close_timeout: Duration,
}

impl BridgeConfig {
    /// Checks that the configuration can work at runtime.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigValidationError`] found.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.channel_capacity == 0 {
            return Err(ConfigValidationError::ZeroChannelCapacity);
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigValidationError::ZeroReadChunkSize);
        }
        if self.max_program_bytes == 0 {
            return Err(ConfigValidationError::ZeroLimit("max program bytes"));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigValidationError::ZeroLimit("max message bytes"));
        }
        if self.interpreter.as_os_str().is_empty() {
            return Err(ConfigValidationError::EmptyInterpreter);
        }
        let name = &self.program_file_name;
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ConfigValidationError::InvalidProgramFileName(name.clone()));
        }
        if !self.route_path.starts_with('/') {
            return Err(ConfigValidationError::InvalidRoutePath(
                self.route_path.clone(),
            ));
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    /// Returns a `BridgeConfig` suitable for local development without any
    /// external configuration.
    ///
    /// | Field             | Default         |
    /// |-------------------|-----------------|
    /// | bind_addr         | `0.0.0.0:4400`  |
    /// | route_path        | `/echo`         |
    /// | interpreter       | `lua`           |
    /// | program_file_name | `main.lua`      |
    /// | channel_capacity  | 8               |
    /// | read_chunk_size   | 2048 bytes      |
    /// | max_program_bytes | 1 MiB           |
    /// | max_message_bytes | 1 MiB           |
    /// | close_timeout     | 5 seconds       |
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR,
            route_path: DEFAULT_ROUTE_PATH.to_string(),
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            interpreter_args: Vec::new(),
            program_file_name: DEFAULT_PROGRAM_FILE_NAME.to_string(),
            program_prelude: String::new(),
            staging_dir: None,
            working_dir: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_program_bytes: DEFAULT_MAX_PROGRAM_BYTES,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
