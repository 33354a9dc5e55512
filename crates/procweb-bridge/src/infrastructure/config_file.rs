//! TOML configuration file for the bridge.
//!
//! Every key is optional; a key that is present overrides the built-in
//! default, and command-line flags override the file in turn (see `main.rs`).
//!
//! ```toml
//! [server]
//! bind_address = "127.0.0.1:4400"
//! route_path = "/echo"
//! channel_capacity = 8
//! read_chunk_size = 2048
//! max_message_bytes = 1048576
//! close_timeout_ms = 5000
//!
//! [program]
//! interpreter = "lua"
//! interpreter_args = []
//! file_name = "main.lua"
//! prelude = """
//! io.stdout:setvbuf("no")
//! io.stderr:setvbuf("no")
//! """
//! staging_dir = "/var/tmp/procweb"
//! working_dir = "/srv/sandbox"
//! max_bytes = 1048576
//! ```
//!
//! Unknown keys are rejected so a typo does not silently fall back to a
//! default.

use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::BridgeConfig;

/// Error type for loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `bind_address` is not a socket address.
    #[error("invalid bind address {value:?}: {source}")]
    InvalidAddress {
        value: String,
        #[source]
        source: AddrParseError,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level shape of the configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub program: ProgramSection,
}

/// Listener and per-session transport settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// `ip:port` to listen on.
    pub bind_address: Option<String>,
    pub route_path: Option<String>,
    pub channel_capacity: Option<usize>,
    pub read_chunk_size: Option<usize>,
    /// Upper bound on one inbound message in bytes.
    pub max_message_bytes: Option<usize>,
    /// Wait for the client's close reply, in milliseconds.
    pub close_timeout_ms: Option<u64>,
}

/// How submitted programs are staged and run.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProgramSection {
    pub interpreter: Option<PathBuf>,
    pub interpreter_args: Option<Vec<String>>,
    pub file_name: Option<String>,
    pub prelude: Option<String>,
    pub staging_dir: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    /// Upper bound on program size in bytes.
    pub max_bytes: Option<usize>,
}

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads and parses the file at `path`.
    ///
    /// Unlike a platform default location, a path given explicitly must
    /// exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`FileConfig::parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Overrides the fields of `base` that this file sets.
    ///
    /// The result is not validated; callers validate once every source has
    /// been applied.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] for an unparsable `bind_address`.
    pub fn apply_to(self, mut base: BridgeConfig) -> Result<BridgeConfig, ConfigError> {
        let FileConfig { server, program } = self;

        if let Some(value) = server.bind_address {
            base.bind_addr = value
                .parse::<SocketAddr>()
                .map_err(|source| ConfigError::InvalidAddress { value, source })?;
        }
        if let Some(path) = server.route_path {
            base.route_path = path;
        }
        if let Some(capacity) = server.channel_capacity {
            base.channel_capacity = capacity;
        }
        if let Some(size) = server.read_chunk_size {
            base.read_chunk_size = size;
        }
        if let Some(max) = server.max_message_bytes {
            base.max_message_bytes = max;
        }
        if let Some(ms) = server.close_timeout_ms {
            base.close_timeout = Duration::from_millis(ms);
        }

        if let Some(interpreter) = program.interpreter {
            base.interpreter = interpreter;
        }
        if let Some(args) = program.interpreter_args {
            base.interpreter_args = args;
        }
        if let Some(name) = program.file_name {
            base.program_file_name = name;
        }
        if let Some(prelude) = program.prelude {
            base.program_prelude = prelude;
        }
        if program.staging_dir.is_some() {
            base.staging_dir = program.staging_dir;
        }
        if program.working_dir.is_some() {
            base.working_dir = program.working_dir;
        }
        if let Some(max) = program.max_bytes {
            base.max_program_bytes = max;
        }
        Ok(base)
    }
}

/// Layers the file at `path`, if any, over the built-in defaults.
///
/// The result is not validated: command-line flags may still override it.
///
/// # Errors
///
/// Any [`ConfigError`] from reading, parsing or applying the file.
pub fn load_config(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    let defaults = BridgeConfig::default();
    match path {
        Some(path) => FileConfig::load(path)?.apply_to(defaults),
        None => Ok(defaults),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
