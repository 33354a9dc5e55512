//! Connection reader and writers for one WebSocket session.
//!
//! The WebSocket is split once.  The read half belongs to [`run_reader`]; the
//! write half lives inside a [`ConnectionHandle`] shared by the two
//! [`ConnectionWriter`]s (stdout and stderr) and the reader.
//!
//! ```text
//!                  ┌──────────── ConnectionHandle (Arc<Mutex<sink>>) ───────────┐
//! stdout channel ──▶ ConnectionWriter ──┐                                       │
//! stderr channel ──▶ ConnectionWriter ──┴──▶ text frames ──▶ client             │
//!                                                                               │
//! client ──▶ frames ──▶ run_reader ──▶ StreamDecoder ──▶ inbound channel        │
//!                           └─────────── close() on exit ───────────────────────┘
//! ```
//!
//! # Closing
//!
//! A normal close frame (code 1000) is sent exactly once per connection.
//! Whoever gets there first sends it: the last writer to drain its channel,
//! any writer that stops because the session was cancelled, or the reader on
//! exit.  Later attempts are no-ops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use procweb_core::{encode_message, CategorizedMessage, OutputStream, ProtocolError, StreamDecoder};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::domain::SessionId;
use crate::infrastructure::context::SessionContext;

/// Write half of a split WebSocket.
pub type WsSink<S> = SplitSink<WebSocketStream<S>, WsMessage>;
/// Read half of a split WebSocket.
pub type WsSource<S> = SplitStream<WebSocketStream<S>>;

/// Errors from sending on a session connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The close frame has already been sent.
    #[error("connection already closed")]
    Closed,

    /// The outbound message could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] ProtocolError),

    /// The WebSocket transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] WsError),
}

// ── Connection handle ─────────────────────────────────────────────────────────

struct SinkState<S> {
    sink: WsSink<S>,
    closed: bool,
}

/// Shared, serialized access to the write half of a session's WebSocket.
///
/// Sends from different tasks never interleave: each frame is written under
/// the mutex.  The `closed` flag lives under the same mutex, so no frame can
/// follow the close frame.
pub struct ConnectionHandle<S> {
    session: SessionId,
    state: Arc<Mutex<SinkState<S>>>,
    writers: Arc<AtomicUsize>,
    /// Fired once the close frame is under way.
    close_started: CancellationToken,
    close_timeout: Duration,
}

impl<S> Clone for ConnectionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            state: Arc::clone(&self.state),
            writers: Arc::clone(&self.writers),
            close_started: self.close_started.clone(),
            close_timeout: self.close_timeout,
        }
    }
}

impl<S> ConnectionHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps the write half of a split WebSocket.
    ///
    /// `close_timeout` bounds how long [`close`](Self::close) may block on a
    /// client that stopped reading.
    pub fn new(session: SessionId, sink: WsSink<S>, close_timeout: Duration) -> Self {
        Self {
            session,
            state: Arc::new(Mutex::new(SinkState {
                sink,
                closed: false,
            })),
            writers: Arc::new(AtomicUsize::new(0)),
            close_started: CancellationToken::new(),
            close_timeout,
        }
    }

    /// Encodes `msg` and sends it as one text frame.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] after the close frame went out, otherwise
    /// encode or transport failures.
    pub async fn send(&self, msg: &CategorizedMessage) -> Result<(), ConnectionError> {
        let text = encode_message(msg)?;
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ConnectionError::Closed);
        }
        state.sink.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    /// Sends the normal close frame if nobody has yet.
    ///
    /// Returns `true` if this call was the one that closed the connection.
    /// Failures are logged, never propagated: the session is ending anyway.
    pub async fn close(&self) -> bool {
        let session = self.session;
        let attempt = tokio::time::timeout(self.close_timeout, async {
            let mut state = self.state.lock().await;
            if state.closed {
                return None;
            }
            state.closed = true;
            self.close_started.cancel();
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            Some(state.sink.send(WsMessage::Close(Some(frame))).await)
        })
        .await;

        match attempt {
            Ok(None) => false,
            Ok(Some(Ok(()))) => {
                debug!("session {session}: close frame sent");
                true
            }
            Ok(Some(Err(e))) => {
                debug!("session {session}: sending close frame failed: {e}");
                true
            }
            Err(_) => {
                warn!(
                    "session {session}: close frame not sent within {:?}",
                    self.close_timeout
                );
                true
            }
        }
    }

    /// Returns `true` once the close frame has been sent (or attempted).
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Resolves once some task has started sending the close frame.
    pub async fn close_started(&self) {
        self.close_started.cancelled().await;
    }

    fn register_writer(&self) {
        self.writers.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one writer finished; returns `true` for the last one.
    fn writer_done(&self) -> bool {
        self.writers.fetch_sub(1, Ordering::SeqCst) == 1
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// How a connection writer finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterEnd {
    /// Its outbound channel closed and everything was sent.
    Drained,
    /// The session was cancelled.
    Cancelled,
    /// A send failed; the writer cancelled the session.
    Failed,
}

/// Forwards one output channel to the client.
///
/// Writers register with the handle when constructed, so build every writer
/// of a session before running any of them.
pub struct ConnectionWriter<S> {
    stream: OutputStream,
    conn: ConnectionHandle<S>,
}

impl<S> ConnectionWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: OutputStream, conn: ConnectionHandle<S>) -> Self {
        conn.register_writer();
        Self { stream, conn }
    }

    /// Sends every message from `outbound` until it closes or the session is
    /// cancelled, then closes the connection if this was the last writer.
    pub async fn run(
        self,
        ctx: SessionContext,
        mut outbound: mpsc::Receiver<CategorizedMessage>,
    ) -> WriterEnd {
        let session = ctx.id();
        let stream = self.stream;

        let end = loop {
            let msg = tokio::select! {
                biased;
                _ = ctx.cancelled() => break WriterEnd::Cancelled,
                msg = outbound.recv() => msg,
            };
            let Some(msg) = msg else {
                break WriterEnd::Drained;
            };

            let sent = tokio::select! {
                biased;
                _ = ctx.cancelled() => break WriterEnd::Cancelled,
                sent = self.conn.send(&msg) => sent,
            };
            match sent {
                Ok(()) => trace!("session {session}: sent {msg}"),
                Err(e) => {
                    if !ctx.is_cancelled() {
                        error!("session {session}: {stream} writer failed: {e}");
                        ctx.cancel();
                    }
                    break WriterEnd::Failed;
                }
            }
        };

        debug!("session {session}: {stream} writer finished ({end:?})");
        let last = self.conn.writer_done();
        if last || ctx.is_cancelled() {
            self.conn.close().await;
        }
        end
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// How the connection reader finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderEnd {
    /// The client answered our close frame.  Normal end of a session.
    CloseAcknowledged,
    /// The client closed (or dropped) the connection first.
    ClientClosed,
    /// The session was cancelled elsewhere.
    Cancelled,
    /// A malformed message or transport error; the session was cancelled.
    Failed,
}

/// Decodes client frames and publishes each message on `inbound`.
///
/// `decoder` may already hold bytes that arrived together with the end of the
/// program text; those messages are published first.  A message may span
/// several frames and a frame may carry several messages.
///
/// Returning drops `inbound`, which stops the router, and closes the
/// connection if nobody has yet.
pub async fn run_reader<S>(
    ctx: SessionContext,
    mut source: WsSource<S>,
    mut decoder: StreamDecoder,
    inbound: mpsc::Sender<CategorizedMessage>,
    conn: ConnectionHandle<S>,
) -> ReaderEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let session = ctx.id();

    let end = 'outer: loop {
        // Publish every complete message buffered so far.
        loop {
            match decoder.next_message() {
                Ok(Some(msg)) => {
                    trace!("session {session}: received {msg}");
                    let sent = tokio::select! {
                        biased;
                        _ = ctx.cancelled() => break 'outer ReaderEnd::Cancelled,
                        sent = inbound.send(msg) => sent,
                    };
                    if sent.is_err() {
                        // Only happens once the router has been cancelled.
                        break 'outer ReaderEnd::Cancelled;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("session {session}: {e}");
                    ctx.cancel();
                    break 'outer ReaderEnd::Failed;
                }
            }
        }

        let frame = tokio::select! {
            biased;
            _ = ctx.cancelled() => break ReaderEnd::Cancelled,
            frame = source.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => decoder.feed(text.as_bytes()),
            Some(Ok(WsMessage::Binary(bytes))) => decoder.feed(&bytes),
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {}
            Some(Ok(WsMessage::Close(_))) | None => break client_closed(&ctx, &conn).await,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                break client_closed(&ctx, &conn).await;
            }
            Some(Err(e)) => {
                if conn.is_closed().await {
                    debug!("session {session}: read after close failed: {e}");
                    break ReaderEnd::CloseAcknowledged;
                }
                warn!("session {session}: WebSocket read error: {e}");
                ctx.cancel();
                break ReaderEnd::Failed;
            }
        }
    };

    if let Err(e) = decoder.finish() {
        debug!("session {session}: discarding trailing input: {e}");
    }
    drop(inbound);
    conn.close().await;
    debug!("session {session}: reader finished ({end:?})");
    end
}

/// Classifies the end of the client's stream.
async fn client_closed<S>(ctx: &SessionContext, conn: &ConnectionHandle<S>) -> ReaderEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if conn.is_closed().await {
        debug!("session {}: client acknowledged close", ctx.id());
        ReaderEnd::CloseAcknowledged
    } else {
        info!("session {}: client closed the connection", ctx.id());
        ctx.cancel();
        ReaderEnd::ClientClosed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
