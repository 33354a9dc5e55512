//! Categorized message types for the procweb wire protocol.
//!
//! Every unit exchanged with the client is a JSON object with two string
//! fields:
//!
//! ```json
//! {"category":"stdin","body":"hello\n"}
//! ```
//!
//! # Message flow
//!
//! ```text
//! Client → Bridge:  code, EOF(program), stdin, EOF(stdin)
//! Bridge → Client:  stdout, stderr
//! ```
//!
//! The category is an open string on the wire, but the bridge never dispatches
//! on raw strings.  [`InboundMessage`] and [`Category`] are closed enums with
//! an explicit fallback variant, so every `match` over them is checked for
//! exhaustiveness at compile time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire string for standard-input data sent by the client.
pub const STDIN: &str = "stdin";
/// Wire string for a chunk of the program's standard output.
pub const STDOUT: &str = "stdout";
/// Wire string for a chunk of the program's standard error.
pub const STDERR: &str = "stderr";
/// Wire string for a chunk of program source text sent before execution.
pub const CODE: &str = "code";
/// Wire string for an end-of-stream marker.  The body names the stream.
pub const EOF: &str = "EOF";
/// Body of an `EOF` message that ends the program's standard input.
pub const EOF_STDIN: &str = "stdin";
/// Body of an `EOF` message that ends program source upload.
pub const EOF_PROGRAM: &str = "program";

// ── Wire unit ─────────────────────────────────────────────────────────────────

/// The wire-level data unit: a category tag and an opaque text payload.
///
/// Equality is structural.  A field missing from the JSON object decodes as an
/// empty string and unknown extra fields are ignored, which matches what
/// existing browser clients produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategorizedMessage {
    /// Dispatch tag, e.g. `"stdin"` or `"stdout"`.
    #[serde(default)]
    pub category: String,
    /// Payload text.  For stream categories this is a chunk of raw stream data.
    #[serde(default)]
    pub body: String,
}

impl CategorizedMessage {
    /// Creates a message from any category and body.
    pub fn new(category: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            body: body.into(),
        }
    }

    /// A `stdin` message carrying input for the running program.
    pub fn stdin(body: impl Into<String>) -> Self {
        Self::new(STDIN, body)
    }

    /// A `stdout` message carrying a chunk of program output.
    pub fn stdout(body: impl Into<String>) -> Self {
        Self::new(STDOUT, body)
    }

    /// A `stderr` message carrying a chunk of program error output.
    pub fn stderr(body: impl Into<String>) -> Self {
        Self::new(STDERR, body)
    }

    /// A `code` message carrying a piece of program source.
    pub fn code(body: impl Into<String>) -> Self {
        Self::new(CODE, body)
    }

    /// The `EOF`/`stdin` message: the client will send no more input.
    pub fn end_of_input() -> Self {
        Self::new(EOF, EOF_STDIN)
    }

    /// The `EOF`/`program` message: program source upload is complete.
    pub fn end_of_program() -> Self {
        Self::new(EOF, EOF_PROGRAM)
    }

    /// Returns the closed [`Category`] for this message's tag.
    pub fn kind(&self) -> Category {
        Category::from(self.category.as_str())
    }
}

impl fmt::Display for CategorizedMessage {
    /// Formats the category and body length, never the body itself.
    ///
    /// Bodies can be large and may contain user data, so log lines use this
    /// compact form instead of `Debug`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.category, self.body.len())
    }
}

// ── Category ──────────────────────────────────────────────────────────────────

/// Closed view of the open category string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Stdin,
    Stdout,
    Stderr,
    Code,
    Eof,
    /// Any tag this protocol version does not recognise.
    Other(String),
}

impl Category {
    /// Returns the wire string for this category.
    pub fn as_str(&self) -> &str {
        match self {
            Category::Stdin => STDIN,
            Category::Stdout => STDOUT,
            Category::Stderr => STDERR,
            Category::Code => CODE,
            Category::Eof => EOF,
            Category::Other(s) => s.as_str(),
        }
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s {
            STDIN => Category::Stdin,
            STDOUT => Category::Stdout,
            STDERR => Category::Stderr,
            CODE => Category::Code,
            EOF => Category::Eof,
            other => Category::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inbound messages ──────────────────────────────────────────────────────────

/// Which stream an inbound `EOF` message ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EofTarget {
    /// The program's standard input.
    Stdin,
    /// The program source upload.
    Program,
    /// A stream name this protocol version does not recognise.
    Other(String),
}

impl From<&str> for EofTarget {
    fn from(s: &str) -> Self {
        match s {
            EOF_STDIN => EofTarget::Stdin,
            EOF_PROGRAM => EofTarget::Program,
            other => EofTarget::Other(other.to_string()),
        }
    }
}

/// A client → bridge message, classified for dispatch.
///
/// Built from a decoded [`CategorizedMessage`] with `InboundMessage::from`.
/// The router and the program-intake phase both `match` on this enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Bytes (as text) to feed to the program's standard input.
    Stdin(String),
    /// A piece of program source.
    Code(String),
    /// End of the named stream.
    Eof(EofTarget),
    /// Any other category, including bridge → client categories echoed back.
    Unrecognized { category: String, body: String },
}

impl From<CategorizedMessage> for InboundMessage {
    fn from(msg: CategorizedMessage) -> Self {
        match msg.kind() {
            Category::Stdin => InboundMessage::Stdin(msg.body),
            Category::Code => InboundMessage::Code(msg.body),
            Category::Eof => InboundMessage::Eof(EofTarget::from(msg.body.as_str())),
            Category::Stdout | Category::Stderr | Category::Other(_) => {
                InboundMessage::Unrecognized {
                    category: msg.category,
                    body: msg.body,
                }
            }
        }
    }
}

// ── Outbound streams ──────────────────────────────────────────────────────────

/// The program output stream an output adapter is attached to.
///
/// Doubles as the fixed label stamped on every message the adapter produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    /// Returns the wire category for messages from this stream.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => STDOUT,
            OutputStream::Stderr => STDERR,
        }
    }

    /// Wraps a chunk of this stream's output as an outbound message.
    pub fn message(self, body: impl Into<String>) -> CategorizedMessage {
        CategorizedMessage::new(self.as_str(), body)
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
