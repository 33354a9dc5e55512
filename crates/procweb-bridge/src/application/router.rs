//! Inbound message routing.
//!
//! The router is the only consumer of the connection reader's channel.  It
//! classifies every inbound [`CategorizedMessage`] and dispatches it:
//!
//! ```text
//! stdin "..."      → forward body bytes onto the stdin channel
//! EOF   "stdin"    → drop the stdin sender (the input adapter sees end of input)
//! anything else    → log "unsupported message category" and continue
//! ```
//!
//! [`route`] is the pure classification step; [`run_router`] is the loop that
//! applies it until the inbound channel closes or the session is cancelled.
//!
//! # After end of input
//!
//! Once `EOF`/`stdin` has been handled, later `stdin` messages are dropped
//! instead of forwarded.  The router keeps draining the inbound channel so the
//! connection reader never stalls on a full channel and can still observe the
//! client's close frame.

use procweb_core::{CategorizedMessage, EofTarget, InboundMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::domain::SessionId;

/// What the router does with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Send these bytes to the program's standard input.
    Forward(Vec<u8>),
    /// Close the program's standard input.
    CloseInput,
    /// Drop the message; `category` is kept for the log line.
    Discard { category: String },
}

/// Classifies one inbound message.
///
/// # Example
///
/// ```rust
/// use procweb_bridge::application::{route, RouteAction};
/// use procweb_core::CategorizedMessage;
///
/// assert_eq!(route(CategorizedMessage::stdin("a")), RouteAction::Forward(b"a".to_vec()));
/// assert_eq!(route(CategorizedMessage::end_of_input()), RouteAction::CloseInput);
/// ```
pub fn route(msg: CategorizedMessage) -> RouteAction {
    match InboundMessage::from(msg) {
        InboundMessage::Stdin(body) => RouteAction::Forward(body.into_bytes()),
        InboundMessage::Eof(EofTarget::Stdin) => RouteAction::CloseInput,
        InboundMessage::Eof(EofTarget::Program | EofTarget::Other(_)) => RouteAction::Discard {
            category: procweb_core::protocol::messages::EOF.to_string(),
        },
        InboundMessage::Code(_) => RouteAction::Discard {
            category: procweb_core::protocol::messages::CODE.to_string(),
        },
        InboundMessage::Unrecognized { category, .. } => RouteAction::Discard { category },
    }
}

/// Counters describing what a router did, for the session's final log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// `stdin` messages delivered to the stdin channel.
    pub forwarded: usize,
    /// Messages dropped (unsupported category, or input already closed).
    pub discarded: usize,
    /// Whether the client ended the program's input.
    pub input_closed: bool,
}

/// Routes inbound messages until the inbound channel closes or `cancel` fires.
///
/// Owns the only sender of the stdin channel; dropping it (on `EOF`/`stdin`,
/// on cancellation, or on return) is how the input adapter learns that no more
/// input will arrive.
///
/// Every blocking point (waiting for the next inbound message, and forwarding
/// into a full stdin channel) races the cancellation signal, so a cancelled
/// session never leaves the router stuck.
pub async fn run_router(
    session: SessionId,
    mut inbound: mpsc::Receiver<CategorizedMessage>,
    stdin_tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) -> RouterStats {
    let mut stats = RouterStats::default();
    let mut stdin_tx = Some(stdin_tx);

    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("session {session}: router cancelled");
                break;
            }
            msg = inbound.recv() => msg,
        };

        let Some(msg) = msg else {
            debug!("session {session}: inbound channel closed; router stopping");
            break;
        };
        trace!("session {session}: routing {msg}");

        match route(msg) {
            RouteAction::Forward(bytes) => {
                let Some(tx) = stdin_tx.as_ref() else {
                    debug!(
                        "session {session}: input already closed; dropping {} bytes",
                        bytes.len()
                    );
                    stats.discarded += 1;
                    continue;
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("session {session}: stdin forward abandoned (cancelled)");
                        break;
                    }
                    sent = tx.send(bytes) => {
                        if sent.is_ok() {
                            stats.forwarded += 1;
                        } else {
                            // The input adapter is gone: the program closed
                            // its stdin or exited.  Not a session fault.
                            debug!("session {session}: stdin adapter has stopped; dropping input");
                            stdin_tx = None;
                            stats.discarded += 1;
                        }
                    }
                }
            }
            RouteAction::CloseInput => {
                if stdin_tx.take().is_some() {
                    info!("session {session}: client ended input; closing program stdin");
                    stats.input_closed = true;
                } else {
                    debug!("session {session}: duplicate end of input ignored");
                }
            }
            RouteAction::Discard { category } => {
                warn!("session {session}: unsupported message category: {category}");
                stats.discarded += 1;
            }
        }
    }

    stats
}

// ── Tests ─────────────────────────────────────────────────────────────────────
