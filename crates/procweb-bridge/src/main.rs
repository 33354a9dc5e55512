//! procweb session bridge: entry point.
//!
//! This binary accepts WebSocket connections, receives a program over each one,
//! runs it under the configured interpreter, and streams the program's
//! stdin/stdout/stderr over the same connection until it exits.
//!
//! # Usage
//!
//! ```text
//! procweb-bridge [OPTIONS]
//!
//! Options:
//!   --config <FILE>            TOML configuration file
//!   --bind <IP>                Listener IP address [default: 0.0.0.0]
//!   --port <PORT>              Listener port [default: 4400]
//!   --route <PATH>             WebSocket route path [default: /echo]
//!   --interpreter <PATH>       Interpreter binary [default: lua]
//!   --interpreter-arg <ARG>    Extra interpreter argument (repeatable)
//!   --program-file-name <NAME> Staged program file name [default: main.lua]
//!   --staging-dir <DIR>        Parent of per-session staging directories
//!   --working-dir <DIR>        Working directory of the program
//!   --channel-capacity <N>     Per-session channel capacity [default: 8]
//!   --read-chunk-size <BYTES>  Output read size [default: 2048]
//!   --max-program-bytes <N>    Program size limit [default: 1048576]
//!   --max-message-bytes <N>    Inbound message size limit [default: 1048576]
//!   --close-timeout <MS>       Close reply wait [default: 5000]
//! ```
//!
//! # Configuration precedence
//!
//! Built-in defaults, then the `--config` file, then command-line flags.
//! Every flag can also be given as an environment variable; a flag on the
//! command line wins over the variable.
//!
//! | Variable                    | Flag                  |
//! |-----------------------------|-----------------------|
//! | `PROCWEB_CONFIG`            | `--config`            |
//! | `PROCWEB_BIND`              | `--bind`              |
//! | `PROCWEB_PORT`              | `--port`              |
//! | `PROCWEB_ROUTE`             | `--route`             |
//! | `PROCWEB_INTERPRETER`       | `--interpreter`       |
//! | `PROCWEB_INTERPRETER_ARGS`  | `--interpreter-arg`   |
//! | `PROCWEB_PROGRAM_FILE_NAME` | `--program-file-name` |
//! | `PROCWEB_STAGING_DIR`       | `--staging-dir`       |
//! | `PROCWEB_WORKING_DIR`       | `--working-dir`       |
//! | `PROCWEB_CHANNEL_CAPACITY`  | `--channel-capacity`  |
//! | `PROCWEB_READ_CHUNK_SIZE`   | `--read-chunk-size`   |
//! | `PROCWEB_MAX_PROGRAM_BYTES` | `--max-program-bytes` |
//! | `PROCWEB_MAX_MESSAGE_BYTES` | `--max-message-bytes` |
//! | `PROCWEB_CLOSE_TIMEOUT_MS`  | `--close-timeout`     |
//!
//! `PROCWEB_INTERPRETER_ARGS` is a comma-separated list.
//!
//! Log verbosity comes from `RUST_LOG` (default `info`).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use procweb_bridge::domain::BridgeConfig;
use procweb_bridge::infrastructure::{load_config, run_server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket session bridge.
///
/// Runs one submitted program per connection and streams its terminal I/O.
/// Options left unset fall back to the config file, then to built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "procweb-bridge",
    about = "Run submitted programs and stream their terminal I/O over WebSocket",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "PROCWEB_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket server to.
    ///
    /// Use `0.0.0.0` to accept connections on every interface, or `127.0.0.1`
    /// for local connections only.
    #[arg(long, env = "PROCWEB_BIND")]
    bind: Option<IpAddr>,

    /// TCP port for the WebSocket server.
    #[arg(long, env = "PROCWEB_PORT")]
    port: Option<u16>,

    /// Request path upgraded to a session; other paths get 404.
    #[arg(long, env = "PROCWEB_ROUTE")]
    route: Option<String>,

    /// Interpreter binary; the staged program path is its last argument.
    #[arg(long, env = "PROCWEB_INTERPRETER")]
    interpreter: Option<PathBuf>,

    /// Extra interpreter argument placed before the program path.
    #[arg(
        long = "interpreter-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        env = "PROCWEB_INTERPRETER_ARGS",
        value_delimiter = ','
    )]
    interpreter_args: Vec<String>,

    /// File name of the staged program.
    #[arg(long, env = "PROCWEB_PROGRAM_FILE_NAME")]
    program_file_name: Option<String>,

    /// Parent directory for per-session staging directories.
    #[arg(long, env = "PROCWEB_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Working directory of the program.
    #[arg(long, env = "PROCWEB_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Capacity of each per-session channel.
    #[arg(long, env = "PROCWEB_CHANNEL_CAPACITY")]
    channel_capacity: Option<usize>,

    /// Maximum bytes read from program output at once.
    #[arg(long, env = "PROCWEB_READ_CHUNK_SIZE")]
    read_chunk_size: Option<usize>,

    /// Upper bound on submitted program size in bytes.
    #[arg(long, env = "PROCWEB_MAX_PROGRAM_BYTES")]
    max_program_bytes: Option<usize>,

    /// Upper bound on one inbound message in bytes.
    #[arg(long, env = "PROCWEB_MAX_MESSAGE_BYTES")]
    max_message_bytes: Option<usize>,

    /// How long to wait for the client's close reply, in milliseconds.
    #[arg(long = "close-timeout", value_name = "MS", env = "PROCWEB_CLOSE_TIMEOUT_MS")]
    close_timeout_ms: Option<u64>,
}

impl Cli {
    /// Merges defaults, the config file and these arguments into a validated
    /// [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the merged
    /// configuration is invalid.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config =
            load_config(self.config.as_deref()).context("failed to load config file")?;

        if self.bind.is_some() || self.port.is_some() {
            config.bind_addr = SocketAddr::new(
                self.bind.unwrap_or_else(|| config.bind_addr.ip()),
                self.port.unwrap_or_else(|| config.bind_addr.port()),
            );
        }
        if let Some(route) = self.route {
            config.route_path = route;
        }
        if let Some(interpreter) = self.interpreter {
            config.interpreter = interpreter;
        }
        if !self.interpreter_args.is_empty() {
            config.interpreter_args = self.interpreter_args;
        }
        if let Some(name) = self.program_file_name {
            config.program_file_name = name;
        }
        if self.staging_dir.is_some() {
            config.staging_dir = self.staging_dir;
        }
        if self.working_dir.is_some() {
            config.working_dir = self.working_dir;
        }
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity;
        }
        if let Some(size) = self.read_chunk_size {
            config.read_chunk_size = size;
        }
        if let Some(max) = self.max_program_bytes {
            config.max_program_bytes = max;
        }
        if let Some(max) = self.max_message_bytes {
            config.max_message_bytes = max;
        }
        if let Some(ms) = self.close_timeout_ms {
            config.close_timeout = Duration::from_millis(ms);
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. `tracing_subscriber` is initialised; `RUST_LOG` controls the level.
/// 2. CLI arguments are parsed and merged into a [`BridgeConfig`].
/// 3. A Ctrl+C handler cancels the server's shutdown token, which in turn
///    cancels every live session.
/// 4. [`run_server`] accepts connections until shutdown.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;

    info!(
        "procweb bridge starting: bind={}, route={}, interpreter={}",
        config.bind_addr,
        config.route_path,
        config.interpreter.display()
    );

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_server(config, shutdown).await?;

    info!("procweb bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
