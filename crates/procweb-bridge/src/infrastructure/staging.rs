//! Program intake: receives the submitted program over the session's own
//! connection and stages it on disk for the interpreter.
//!
//! The client sends the program as one or more `code` messages followed by an
//! `EOF` message (body `"program"`).  Intake reads frames until that EOF, so
//! it runs before the connection is split for the bridge.  Anything that
//! arrived after the EOF in the same frame stays in the returned decoder and
//! is handed to the connection reader.
//!
//! Each program is written to a fresh directory created with `tempfile`.  The
//! directory is removed when the [`StagedProgram`] is dropped, i.e. when the
//! session ends.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use futures_util::{Stream, StreamExt};
use procweb_core::{CategorizedMessage, InboundMessage, ProtocolError, StreamDecoder};
use tempfile::TempDir;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};

use crate::domain::{BridgeConfig, SessionId};
use crate::infrastructure::context::SessionContext;

/// Why a program could not be received or staged.
#[derive(Debug, Error)]
pub enum StagingError {
    /// The client went away before sending the end-of-program marker.
    #[error("connection closed before the program was complete")]
    ConnectionClosed,

    /// The WebSocket transport failed during intake.
    #[error("transport error during program intake: {0}")]
    Transport(#[from] WsError),

    /// An intake message could not be decoded.
    #[error("malformed message during program intake: {0}")]
    Malformed(#[from] ProtocolError),

    /// The program text is larger than the configured limit.
    #[error("program exceeds the {limit}-byte limit")]
    TooLarge { limit: usize },

    /// The staging directory or file could not be written.
    #[error("failed to stage program at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The session was cancelled (server shutdown) during intake.
    #[error("cancelled during program intake")]
    Cancelled,
}

/// A program written to its own temporary directory.
#[derive(Debug)]
pub struct StagedProgram {
    dir: TempDir,
    path: PathBuf,
}

impl StagedProgram {
    /// Absolute path of the program file, passed to the interpreter.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory holding the program; deleted on drop.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// A staged program plus whatever input followed it on the connection.
#[derive(Debug)]
pub struct Intake {
    pub program: StagedProgram,
    pub decoder: StreamDecoder,
}

/// Reads the program from `source` and stages it.
///
/// # Errors
///
/// See [`StagingError`]; on any error nothing is left on disk.
pub async fn receive_program<St>(
    ctx: &SessionContext,
    source: &mut St,
    config: &BridgeConfig,
) -> Result<Intake, StagingError>
where
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let (text, decoder) = collect_program(ctx, source, config.max_program_bytes).await?;
    info!(
        "session {}: received program ({} bytes)",
        ctx.id(),
        text.len()
    );
    let program = stage_program(config, &text)?;
    debug!(
        "session {}: program staged at {}",
        ctx.id(),
        program.path().display()
    );
    Ok(Intake { program, decoder })
}

/// Room for JSON escaping on top of the program limit: one unfinished intake
/// message may occupy up to twice `max_bytes` plus this many bytes.
const INTAKE_FRAMING_SLACK: usize = 4 * 1024;

/// Concatenates `code` bodies until an `EOF` message.
///
/// Returns the program text and the decoder, which may still hold messages
/// that followed the EOF.  A single message is bounded as well as the total,
/// so a client cannot grow the buffer by never finishing a message.
pub async fn collect_program<St>(
    ctx: &SessionContext,
    source: &mut St,
    max_bytes: usize,
) -> Result<(String, StreamDecoder), StagingError>
where
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let session = ctx.id();
    let message_limit = max_bytes
        .saturating_mul(2)
        .saturating_add(INTAKE_FRAMING_SLACK);
    let mut decoder = StreamDecoder::new().with_limit(message_limit);
    let mut program = String::new();

    loop {
        while let Some(msg) = decoder.next_message().map_err(|e| match e {
            ProtocolError::TooLarge { .. } => StagingError::TooLarge { limit: max_bytes },
            other => StagingError::Malformed(other),
        })? {
            if accept_intake_message(session, msg, &mut program, max_bytes)? {
                return Ok((program, decoder));
            }
        }

        let frame = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(StagingError::Cancelled),
            frame = source.next() => frame,
        };
        match frame {
            Some(Ok(WsMessage::Text(text))) => decoder.feed(text.as_bytes()),
            Some(Ok(WsMessage::Binary(bytes))) => decoder.feed(&bytes),
            Some(Ok(WsMessage::Close(_))) | None => return Err(StagingError::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                return Err(StagingError::ConnectionClosed)
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Applies one intake message.  Returns `true` once intake is complete.
fn accept_intake_message(
    session: SessionId,
    msg: CategorizedMessage,
    program: &mut String,
    max_bytes: usize,
) -> Result<bool, StagingError> {
    match InboundMessage::from(msg) {
        InboundMessage::Code(body) => {
            if program.len() + body.len() > max_bytes {
                return Err(StagingError::TooLarge { limit: max_bytes });
            }
            program.push_str(&body);
            Ok(false)
        }
        InboundMessage::Eof(target) => {
            debug!("session {session}: end of program ({target:?})");
            Ok(true)
        }
        other => {
            warn!("session {session}: ignoring message during program intake: {other:?}");
            Ok(false)
        }
    }
}

/// Writes `prelude + body` to `<fresh dir>/<program_file_name>`.
///
/// # Errors
///
/// [`StagingError::Io`] naming the path that could not be created.
pub fn stage_program(config: &BridgeConfig, body: &str) -> Result<StagedProgram, StagingError> {
    let parent = staging_parent(config.staging_dir.as_deref())?;
    let dir = tempfile::Builder::new()
        .prefix("procweb-")
        .tempdir_in(&parent)
        .map_err(|source| StagingError::Io {
            path: parent.clone(),
            source,
        })?;

    let path = dir.path().join(&config.program_file_name);
    let mut text = String::with_capacity(config.program_prelude.len() + body.len());
    text.push_str(&config.program_prelude);
    text.push_str(body);

    write_owner_only(&path, text.as_bytes()).map_err(|source| StagingError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(StagedProgram { dir, path })
}

/// Resolves the parent directory to an absolute path so the program path
/// stays valid when the child runs in another working directory.
fn staging_parent(configured: Option<&Path>) -> Result<PathBuf, StagingError> {
    let dir = configured.map_or_else(std::env::temp_dir, Path::to_path_buf);
    if dir.is_absolute() {
        return Ok(dir);
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&dir))
        .map_err(|source| StagingError::Io { path: dir, source })
}

fn write_owner_only(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.flush()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
