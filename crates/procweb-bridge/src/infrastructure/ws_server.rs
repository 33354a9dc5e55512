//! WebSocket server: accept loop and per-connection session handling.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections.
//! 3. Upgrading each connection to a WebSocket, but only on the configured
//!    route path; any other path is answered with `404 Not Found`.
//! 4. Receiving and staging the submitted program (see `staging`).
//! 5. Running the session bridge and logging its report.
//! 6. Stopping when the shutdown token is cancelled, then waiting for the
//!    live sessions to unwind.
//!
//! # Isolation
//!
//! Each connection runs in its own Tokio task with its own
//! [`SessionContext`].  The context's cancellation token is a child of the
//! server's shutdown token: shutting the server down cancels every session
//! (killing their programs), while one session's failure never reaches the
//! server or another session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::domain::BridgeConfig;
use crate::infrastructure::context::SessionContext;
use crate::infrastructure::session_bridge::run_session;
use crate::infrastructure::staging::receive_program;

/// Pause after a failed `accept()` so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves sessions until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(config: BridgeConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;

    let local = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!("session bridge listening on ws://{local}{}", config.route_path);

    serve(listener, Arc::new(config), shutdown).await
}

/// Runs the accept loop on an already bound listener.
///
/// Tests bind to port 0 and call this directly.  Returns once `shutdown` is
/// cancelled and every session it started has finished.
///
/// # Errors
///
/// Currently never fails; accept errors are logged and the loop continues.
pub async fn serve(
    listener: TcpListener,
    config: Arc<BridgeConfig>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let sessions = TaskTracker::new();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                debug!("new connection from {peer_addr}");
                let cfg = Arc::clone(&config);
                let token = shutdown.clone();
                sessions.spawn(async move {
                    handle_connection(stream, peer_addr, cfg, token).await;
                });
            }
            Err(e) => {
                // Transient accept error; log it rather than crash the bridge.
                error!("accept error: {e}");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }

    info!(
        "shutdown requested; waiting for {} live session(s)",
        sessions.len()
    );
    sessions.close();
    sessions.wait().await;
    info!("all sessions finished");
    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Upgrade → program intake → session bridge, for one accepted connection.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<BridgeConfig>,
    shutdown: CancellationToken,
) {
    let route = config.route_path.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        check_route(&route, req)?;
        Ok(resp)
    };

    let mut ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("connection from {peer_addr}: WebSocket handshake failed: {e}");
            return;
        }
    };

    let ctx = SessionContext::child_of(&shutdown);
    let session = ctx.id();
    info!("session {session}: connected from {peer_addr}");

    let intake = match receive_program(&ctx, &mut ws, &config).await {
        Ok(intake) => intake,
        Err(e) => {
            warn!("session {session}: program intake failed: {e}");
            close_before_bridge(session, &mut ws, config.close_timeout).await;
            return;
        }
    };

    let report = run_session(ctx, ws, intake.decoder, intake.program.path(), &config).await;
    info!("session {session}: finished: {report}");
}

/// Rejects upgrade requests for any path other than `route`.
///
/// # Errors
///
/// A `404 Not Found` response naming the requested path.
pub fn check_route(route: &str, req: &Request) -> Result<(), ErrorResponse> {
    let path = req.uri().path();
    if path == route {
        return Ok(());
    }
    let mut response = ErrorResponse::new(Some(format!("no session route at {path}")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    Err(response)
}

/// Sends the normal close frame on a connection that never reached the bridge.
async fn close_before_bridge(
    session: crate::domain::SessionId,
    ws: &mut WebSocketStream<TcpStream>,
    close_timeout: Duration,
) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    match tokio::time::timeout(close_timeout, ws.close(Some(frame))).await {
        Ok(Ok(())) => debug!("session {session}: connection closed"),
        Ok(Err(e)) => debug!("session {session}: close failed: {e}"),
        Err(_) => debug!("session {session}: close timed out"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
