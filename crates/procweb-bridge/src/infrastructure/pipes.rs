//! Pipe adapters: bridges between raw byte streams and session channels.
//!
//! ```text
//! stdin channel ──▶ [input adapter]  ──▶ process stdin      (AsyncWrite)
//! process stdout ──▶ [output adapter] ──▶ stdout channel    (AsyncRead)
//! process stderr ──▶ [output adapter] ──▶ stderr channel    (AsyncRead)
//! ```
//!
//! Both adapters are generic over `tokio::io::AsyncRead` / `AsyncWrite`, so the
//! same code runs against child-process pipes in production and against
//! `tokio::io::duplex` or `tokio_test::io` mocks in tests.
//!
//! # Termination
//!
//! End of stream and "stream already closed" (`BrokenPipe`) are normal
//! endings and never cancel the session.  Any other I/O error is fatal: it is
//! logged once and the session is cancelled.  Every blocking point races the
//! session's cancellation signal.

use std::io;

use procweb_core::{CategorizedMessage, OutputStream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::infrastructure::context::SessionContext;

/// How a pipe adapter finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    /// The input channel closed, or the output stream reached EOF.
    Eof,
    /// The stream was already closed by the other side.
    Closed,
    /// The consumer of the output channel went away.
    Disconnected,
    /// The session was cancelled.
    Cancelled,
    /// A fatal I/O error; the adapter cancelled the session.
    Failed,
}

/// Returns `true` for errors that mean "the other end already closed".
fn is_stream_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
    )
}

// ── Input adapter ─────────────────────────────────────────────────────────────

/// Drains `input` into `pipe` until the channel closes or the session ends.
///
/// When the router drops the stdin sender, this adapter shuts down and drops
/// `pipe`; that is how the program observes end of input.  The stream is
/// closed on every exit path.
pub async fn run_input_adapter<W>(
    ctx: SessionContext,
    mut pipe: W,
    mut input: mpsc::Receiver<Vec<u8>>,
) -> PipeEnd
where
    W: AsyncWrite + Unpin,
{
    let session = ctx.id();

    let end = loop {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancelled() => break PipeEnd::Cancelled,
            chunk = input.recv() => chunk,
        };
        let Some(chunk) = chunk else {
            break PipeEnd::Eof;
        };
        trace!("session {session}: stdin <- {} bytes", chunk.len());

        let written = tokio::select! {
            biased;
            _ = ctx.cancelled() => break PipeEnd::Cancelled,
            written = write_chunk(&mut pipe, &chunk) => written,
        };
        match written {
            Ok(()) => {}
            Err(e) if is_stream_closed(&e) => break PipeEnd::Closed,
            Err(e) => {
                error!("session {session}: write to program stdin failed: {e}");
                ctx.cancel();
                break PipeEnd::Failed;
            }
        }
    };

    match end {
        PipeEnd::Eof => debug!("session {session}: stdin channel closed; closing stdin pipe"),
        PipeEnd::Closed => debug!("session {session}: stdin pipe already closed"),
        PipeEnd::Cancelled => debug!("session {session}: write to stdin cancelled"),
        PipeEnd::Disconnected | PipeEnd::Failed => {}
    }

    if let Err(e) = pipe.shutdown().await {
        if !is_stream_closed(&e) {
            debug!("session {session}: closing stdin pipe: {e}");
        }
    }
    end
}

async fn write_chunk<W>(pipe: &mut W, chunk: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    pipe.write_all(chunk).await?;
    pipe.flush().await
}

// ── Output adapter ────────────────────────────────────────────────────────────

/// Reads `pipe` in chunks of up to `chunk_size` bytes and publishes each
/// non-empty chunk on `output` as a message labelled with `stream`.
///
/// Dropping `output` on return closes the channel, which tells the connection
/// writer no more messages will come.
pub async fn run_output_adapter<R>(
    ctx: SessionContext,
    mut pipe: R,
    stream: OutputStream,
    output: mpsc::Sender<CategorizedMessage>,
    chunk_size: usize,
) -> PipeEnd
where
    R: AsyncRead + Unpin,
{
    let session = ctx.id();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut text = Utf8Chunker::default();

    let end = loop {
        let read = tokio::select! {
            biased;
            _ = ctx.cancelled() => break PipeEnd::Cancelled,
            read = pipe.read(&mut buf) => read,
        };

        let (body, at_eof) = match read {
            Ok(0) => (text.finish(), true),
            Ok(n) => (text.push(&buf[..n]), false),
            Err(e) if is_stream_closed(&e) => break PipeEnd::Closed,
            Err(e) => {
                error!("session {session}: read from program {stream} failed: {e}");
                ctx.cancel();
                break PipeEnd::Failed;
            }
        };

        if !body.is_empty() {
            trace!("session {session}: {stream} -> {} bytes", body.len());
            if let Err(end) = publish(&ctx, &output, stream.message(body)).await {
                break end;
            }
        }
        if at_eof {
            break PipeEnd::Eof;
        }
    };

    match end {
        PipeEnd::Eof => debug!("session {session}: {stream} pipe EOF"),
        PipeEnd::Closed => debug!("session {session}: {stream} pipe closed"),
        PipeEnd::Disconnected => debug!("session {session}: {stream} consumer gone"),
        PipeEnd::Cancelled => debug!("session {session}: {stream} cancelled"),
        PipeEnd::Failed => {}
    }
    end
}

/// Sends one message, giving up if the session is cancelled first.
///
/// # Errors
///
/// Returns the [`PipeEnd`] the caller should stop with.
pub(crate) async fn publish(
    ctx: &SessionContext,
    output: &mpsc::Sender<CategorizedMessage>,
    msg: CategorizedMessage,
) -> Result<(), PipeEnd> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(PipeEnd::Cancelled),
        sent = output.send(msg) => sent.map_err(|_| PipeEnd::Disconnected),
    }
}

// ── UTF-8 chunking ────────────────────────────────────────────────────────────

/// Turns arbitrary byte chunks into text without splitting characters.
///
/// Read boundaries fall anywhere, including inside a multi-byte character.
/// An incomplete trailing sequence is held back and prefixed to the next
/// chunk; bytes that can never form valid UTF-8 become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    /// Appends `bytes` and returns all text that is complete so far.
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let cut = incomplete_tail_start(&self.pending);
        let tail = self.pending.split_off(cut);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    /// Returns whatever is left, replacing an unfinished sequence.
    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Index where a trailing, still-incomplete UTF-8 sequence starts.
///
/// Returns `bytes.len()` when the buffer does not end mid-sequence.
fn incomplete_tail_start(bytes: &[u8]) -> usize {
    let len = bytes.len();
    // A sequence is at most 4 bytes long, so only the last 3 can be unfinished.
    for back in 1..=len.min(3) {
        let i = len - back;
        let b = bytes[i];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if needed > back { i } else { len };
    }
    len
}

// ── Tests ─────────────────────────────────────────────────────────────────────
