//! # procweb-core
//!
//! Shared protocol library for procweb: the categorized-message wire unit
//! exchanged between a browser terminal and a running program, plus the JSON
//! codec that frames it.
//!
//! This crate has zero dependencies on async runtimes, sockets, or processes,
//! so every type here can be unit tested without I/O.
//!
//! # Architecture overview
//!
//! procweb lets a remote client submit a small program and interact with it as
//! if it were a local terminal session.  Everything that travels over the
//! connection is a [`CategorizedMessage`]: a `category` tag plus a text `body`.
//!
//! - **`protocol::messages`** – The message struct itself and the closed
//!   enums ([`Category`], [`InboundMessage`], [`OutputStream`]) used to
//!   dispatch on it without raw string comparison.
//!
//! - **`protocol::codec`** – How messages become bytes and back.  Each message
//!   is one self-delimiting JSON object; [`StreamDecoder`] extracts objects
//!   incrementally from a stream of transport frames.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `procweb_core::CategorizedMessage` instead of the full module path.
pub use protocol::codec::{decode_message, encode_message, ProtocolError, StreamDecoder};
pub use protocol::messages::{
    CategorizedMessage, Category, EofTarget, InboundMessage, OutputStream,
};
