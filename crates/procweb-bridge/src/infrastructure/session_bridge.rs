//! Session bridge: wires one WebSocket connection to one program run.
//!
//! ```text
//! client ─▶ reader ─▶ inbound ─▶ router ─▶ stdin ─▶ input adapter ─▶ process
//! client ◀─ writer ◀─ stdout  ◀──────────────────── output adapter ◀─ process
//! client ◀─ writer ◀─ stderr  ◀──────────────────── output adapter ◀─ process
//! ```
//!
//! Every task is spawned on the session's [`SessionContext`], so they all share
//! one cancellation signal and one completion tracker.  The bridge moves the
//! session through `Created → Running → Draining → Done`:
//!
//! - **Running** once every task is launched.
//! - **Draining** when the process runner returns (the program exited, failed
//!   to launch, or was killed on cancellation).
//! - **Done** when every tracked task has finished.
//!
//! Draining has no deadline of its own: the writers deliver everything the
//! program wrote, however slowly the client reads, and the last of them sends
//! the close frame.  Only the client's reply to that frame is bounded by
//! `close_timeout`; after it the session is cancelled and the wait repeats,
//! which is prompt because every blocking point races the signal.

use std::fmt;
use std::path::Path;

use futures_util::StreamExt;
use procweb_core::{OutputStream, StreamDecoder};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::application::{run_router, RouterStats};
use crate::domain::{BridgeConfig, SessionId, SessionState};
use crate::infrastructure::connection::{run_reader, ConnectionHandle, ConnectionWriter};
use crate::infrastructure::context::SessionContext;
use crate::infrastructure::process::{ProcessChannels, ProcessOutcome, ProcessRunner};

/// Summary of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub id: SessionId,
    pub process: ProcessOutcome,
    /// Whether the session ended through cancellation rather than a normal
    /// drain.
    pub cancelled: bool,
    pub router: RouterStats,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "program {}, {} stdin chunks forwarded, {} messages discarded{}",
            self.process,
            self.router.forwarded,
            self.router.discarded,
            if self.cancelled { ", cancelled" } else { "" }
        )
    }
}

/// Runs one session to completion.
///
/// `decoder` carries any client input that arrived with the end of the
/// program text.  The connection is closed (one normal close frame) before
/// this returns.
pub async fn run_session<S>(
    ctx: SessionContext,
    ws: WebSocketStream<S>,
    decoder: StreamDecoder,
    program: &Path,
    config: &BridgeConfig,
) -> SessionReport
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = ctx.id();
    let mut state = SessionState::Created;

    // ── Created: channels and connection halves ───────────────────────────────
    let capacity = config.channel_capacity;
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (stdin_tx, stdin_rx) = mpsc::channel(capacity);
    let (stdout_tx, stdout_rx) = mpsc::channel(capacity);
    let (stderr_tx, stderr_rx) = mpsc::channel(capacity);

    let (sink, source) = ws.split();
    let conn = ConnectionHandle::new(session, sink, config.close_timeout);
    let stdout_writer = ConnectionWriter::new(OutputStream::Stdout, conn.clone());
    let stderr_writer = ConnectionWriter::new(OutputStream::Stderr, conn.clone());

    ctx.spawn(run_reader(
        ctx.clone(),
        source,
        decoder.with_limit(config.max_message_bytes),
        inbound_tx,
        conn.clone(),
    ));
    ctx.spawn(stdout_writer.run(ctx.clone(), stdout_rx));
    ctx.spawn(stderr_writer.run(ctx.clone(), stderr_rx));
    let router = ctx.spawn(run_router(session, inbound_rx, stdin_tx, ctx.token()));

    let channels = ProcessChannels {
        stdin: stdin_rx,
        stdout: stdout_tx,
        stderr: stderr_tx,
    };

    // ── Running: wait for the process runner ──────────────────────────────────
    let process = if ctx.is_cancelled() {
        // Shut down before launch: dropping the channels unwinds the writers.
        drop(channels);
        ProcessOutcome::NotStarted
    } else {
        let runner = ProcessRunner::from_config(config);
        let program = program.to_path_buf();
        let run_ctx = ctx.clone();
        let handle = ctx.spawn(async move { runner.run(run_ctx, &program, channels).await });
        advance(session, &mut state, SessionState::Running);

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("session {session}: process runner task failed: {e}");
                ctx.cancel();
                ProcessOutcome::WaitFailed
            }
        }
    };

    // ── Draining: every task must observe termination ─────────────────────────
    advance(session, &mut state, SessionState::Draining);
    conn.close_started().await;
    if tokio::time::timeout(config.close_timeout, ctx.wait_for_tasks())
        .await
        .is_err()
    {
        warn!(
            "session {session}: no close reply after {:?}; cancelling {} remaining tasks",
            config.close_timeout,
            ctx.live_tasks()
        );
        ctx.cancel();
        ctx.wait_for_tasks().await;
    }

    let router = router.await.unwrap_or_default();
    advance(session, &mut state, SessionState::Done);

    SessionReport {
        id: session,
        process,
        cancelled: ctx.is_cancelled(),
        router,
    }
}

fn advance(session: SessionId, state: &mut SessionState, next: SessionState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal session transition {state} -> {next}"
    );
    debug!("session {session}: {state} -> {next}");
    *state = next;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use procweb_core::{decode_message, encode_message, CategorizedMessage};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream};
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn sh_config() -> BridgeConfig {
        BridgeConfig {
            interpreter: PathBuf::from("sh"),
            program_file_name: "main.sh".to_string(),
            close_timeout: Duration::from_secs(2),
            ..BridgeConfig::default()
        }
    }

    fn script(body: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.sh");
        std::fs::write(&path, body).unwrap();
        (dir, path)
    }

    async fn ws_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    async fn send(client: &mut WebSocketStream<DuplexStream>, msg: CategorizedMessage) {
        let text = encode_message(&msg).unwrap();
        client.send(WsMessage::Text(text)).await.unwrap();
    }

    /// Reads until the server's close frame; returns (messages, close frames).
    async fn read_until_close(
        client: &mut WebSocketStream<DuplexStream>,
    ) -> (Vec<CategorizedMessage>, usize) {
        let mut messages = Vec::new();
        let mut closes = 0;
        while let Some(Ok(frame)) = client.next().await {
            match frame {
                WsMessage::Text(text) => messages.push(decode_message(text.as_bytes()).unwrap()),
                WsMessage::Close(_) => closes += 1,
                _ => {}
            }
        }
        (messages, closes)
    }

    fn bodies(messages: &[CategorizedMessage], category: &str) -> String {
        messages
            .iter()
            .filter(|m| m.category == category)
            .map(|m| m.body.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_session_echoes_input_and_closes_once() {
        // Arrange
        let (_dir, program) = script("exec cat\n");
        let (server, mut client) = ws_pair().await;
        let ctx = SessionContext::new();
        let config = sh_config();
        let session = tokio::spawn({
            let ctx = ctx.clone();
            async move { run_session(ctx, server, StreamDecoder::new(), &program, &config).await }
        });

        // Act
        send(&mut client, CategorizedMessage::stdin("a")).await;
        send(&mut client, CategorizedMessage::new("bogus", "ignored")).await;
        send(&mut client, CategorizedMessage::stdin("b\n")).await;
        send(&mut client, CategorizedMessage::end_of_input()).await;

        // Assert
        let (messages, closes) = tokio::time::timeout(TIMEOUT, read_until_close(&mut client))
            .await
            .unwrap();
        assert_eq!(bodies(&messages, "stdout"), "ab\n");
        assert_eq!(bodies(&messages, "stderr"), "");
        assert_eq!(closes, 1);

        let report = tokio::time::timeout(TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(report.process, ProcessOutcome::Exited { code: 0 });
        assert!(!report.cancelled);
        assert_eq!(report.router.forwarded, 2);
        assert_eq!(report.router.discarded, 1);
        assert!(report.router.input_closed);
        assert_eq!(ctx.live_tasks(), 0);
    }

    /// Output larger than the transport buffer, read by a client that only
    /// starts reading well after the program has exited and `close_timeout`
    /// has passed.  Every byte must still arrive.
    #[tokio::test]
    async fn test_session_delivers_all_output_to_slow_client() {
        // Arrange
        let (_dir, program) = script("head -c 100000 /dev/zero | tr '\\0' x\n");
        let (server, mut client) = ws_pair().await;
        let config = BridgeConfig {
            close_timeout: Duration::from_secs(1),
            ..sh_config()
        };
        let session = tokio::spawn(async move {
            run_session(SessionContext::new(), server, StreamDecoder::new(), &program, &config)
                .await
        });

        // Act
        tokio::time::sleep(Duration::from_secs(3)).await;
        let (messages, closes) = tokio::time::timeout(TIMEOUT, read_until_close(&mut client))
            .await
            .unwrap();

        // Assert
        let stdout = bodies(&messages, "stdout");
        assert_eq!(stdout.len(), 100_000);
        assert!(stdout.bytes().all(|b| b == b'x'));
        assert_eq!(closes, 1);
        let report = tokio::time::timeout(TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(report.process, ProcessOutcome::Exited { code: 0 });
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_session_oversized_unfinished_input_ends_session() {
        let (_dir, program) = script("exec cat\n");
        let (server, mut client) = ws_pair().await;
        let config = BridgeConfig {
            max_message_bytes: 128,
            ..sh_config()
        };
        let session = tokio::spawn(async move {
            run_session(SessionContext::new(), server, StreamDecoder::new(), &program, &config)
                .await
        });

        client
            .send(WsMessage::Text(r#"{"category":"stdin","body":""#.to_string()))
            .await
            .unwrap();
        client.send(WsMessage::Text("q".repeat(512))).await.unwrap();

        let (messages, closes) = tokio::time::timeout(TIMEOUT, read_until_close(&mut client))
            .await
            .unwrap();
        assert!(messages.is_empty());
        assert_eq!(closes, 1);
        let report = tokio::time::timeout(TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(report.process, ProcessOutcome::Killed);
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_session_uses_prefilled_decoder() {
        let (_dir, program) = script("exec cat\n");
        let (server, mut client) = ws_pair().await;
        let mut decoder = StreamDecoder::new();
        decoder.feed(br#"{"category":"stdin","body":"early\n"}{"category":"EOF","body":"stdin"}"#);
        let config = sh_config();
        let session = tokio::spawn(async move {
            run_session(SessionContext::new(), server, decoder, &program, &config).await
        });

        let (messages, _) = tokio::time::timeout(TIMEOUT, read_until_close(&mut client))
            .await
            .unwrap();

        assert_eq!(bodies(&messages, "stdout"), "early\n");
        tokio::time::timeout(TIMEOUT, session).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_session_client_close_kills_program() {
        // Arrange: a program that never exits by itself
        let (_dir, program) = script("sleep 30\n");
        let (server, mut client) = ws_pair().await;
        let config = sh_config();
        let session = tokio::spawn(async move {
            run_session(SessionContext::new(), server, StreamDecoder::new(), &program, &config)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Act
        client.close(None).await.unwrap();

        // Assert
        let report = tokio::time::timeout(TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(report.process, ProcessOutcome::Killed);
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_session_launch_failure_closes_connection() {
        let (_dir, program) = script("true\n");
        let (server, mut client) = ws_pair().await;
        let config = BridgeConfig {
            interpreter: PathBuf::from("/nonexistent/interpreter"),
            ..sh_config()
        };
        let session = tokio::spawn(async move {
            run_session(SessionContext::new(), server, StreamDecoder::new(), &program, &config)
                .await
        });

        let (messages, closes) = tokio::time::timeout(TIMEOUT, read_until_close(&mut client))
            .await
            .unwrap();

        assert!(messages.is_empty());
        assert_eq!(closes, 1);
        let report = tokio::time::timeout(TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(report.process, ProcessOutcome::LaunchFailed);
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_session_cancelled_before_launch() {
        let (_dir, program) = script("true\n");
        let (server, _client) = ws_pair().await;
        let ctx = SessionContext::new();
        ctx.cancel();

        let report = tokio::time::timeout(
            TIMEOUT,
            run_session(ctx, server, StreamDecoder::new(), &program, &sh_config()),
        )
        .await
        .unwrap();

        assert_eq!(report.process, ProcessOutcome::NotStarted);
        assert!(report.cancelled);
    }

    #[tokio::test]
    async fn test_session_delivers_output_of_failing_program() {
        let (_dir, program) = script("echo out\necho err >&2\nexit 2\n");
        let (server, mut client) = ws_pair().await;
        let config = sh_config();
        let session = tokio::spawn(async move {
            run_session(SessionContext::new(), server, StreamDecoder::new(), &program, &config)
                .await
        });

        let (messages, closes) = tokio::time::timeout(TIMEOUT, read_until_close(&mut client))
            .await
            .unwrap();

        assert_eq!(bodies(&messages, "stdout"), "out\n");
        assert_eq!(bodies(&messages, "stderr"), "err\n");
        assert_eq!(closes, 1);
        let report = tokio::time::timeout(TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(report.process, ProcessOutcome::Exited { code: 2 });
        assert!(!report.cancelled);
    }
}
