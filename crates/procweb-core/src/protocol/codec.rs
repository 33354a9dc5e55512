//! JSON codec for categorized messages.
//!
//! Wire format: each message is one self-delimiting JSON object.
//!
//! ```text
//! {"category":"stdout","body":"hi\n"}{"category":"stdout","body":"there\n"}
//! ```
//!
//! There is no length prefix.  A message-oriented transport (WebSocket) usually
//! carries one object per frame, but a client may split an object across
//! frames or pack several objects into one; [`StreamDecoder`] handles both by
//! buffering bytes until a complete object is available.

use thiserror::Error;

use crate::protocol::messages::CategorizedMessage;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The bytes are not a complete, well-formed message object.
    ///
    /// Covers invalid JSON, a JSON value that is not a message object,
    /// trailing garbage, and input that ends mid-message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// An unfinished message grew past the decoder's limit.
    #[error("message exceeds {limit} bytes without completing")]
    TooLarge { limit: usize },

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl ProtocolError {
    fn malformed(err: serde_json::Error) -> Self {
        ProtocolError::MalformedMessage(err.to_string())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`CategorizedMessage`] as a compact JSON object.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.  With two `String`
/// fields this cannot happen in practice, but the signature keeps the codec
/// contract explicit.
///
/// # Examples
///
/// ```rust
/// use procweb_core::{encode_message, CategorizedMessage};
///
/// let text = encode_message(&CategorizedMessage::stdout("hi\n")).unwrap();
/// assert_eq!(text, r#"{"category":"stdout","body":"hi\n"}"#);
/// ```
pub fn encode_message(msg: &CategorizedMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes exactly one [`CategorizedMessage`] from `bytes`.
///
/// Leading and trailing whitespace is allowed; anything else after the object
/// is an error.  Use [`StreamDecoder`] when the input may hold several
/// messages or a partial one.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] on truncated or invalid input.
///
/// # Examples
///
/// ```rust
/// use procweb_core::{decode_message, CategorizedMessage};
///
/// let msg = decode_message(br#"{"category":"stdin","body":"a"}"#).unwrap();
/// assert_eq!(msg, CategorizedMessage::stdin("a"));
/// assert!(decode_message(br#"{"category":"std"#).is_err());
/// ```
pub fn decode_message(bytes: &[u8]) -> Result<CategorizedMessage, ProtocolError> {
    serde_json::from_slice(bytes).map_err(ProtocolError::malformed)
}

// ── Incremental decoder ───────────────────────────────────────────────────────

/// Incremental decoder that extracts messages from a stream of byte chunks.
///
/// Feed transport frames with [`feed`](Self::feed) and pull complete messages
/// with [`next_message`](Self::next_message) until it returns `Ok(None)`,
/// which means "wait for more bytes".  At end of stream call
/// [`finish`](Self::finish) to detect a truncated trailing message.
///
/// The decoder scans for the end of the first object itself (tracking nesting
/// and string escapes) and only hands complete objects to serde, so every
/// buffered byte is examined once no matter how many frames a message spans.
/// [`with_limit`](Self::with_limit) bounds how large an unfinished message may
/// grow.
///
/// # Examples
///
/// ```rust
/// use procweb_core::{CategorizedMessage, StreamDecoder};
///
/// let mut decoder = StreamDecoder::new();
/// decoder.feed(br#"{"category":"stdin","#);
/// assert_eq!(decoder.next_message().unwrap(), None);
///
/// decoder.feed(br#""body":"a"}{"category":"EOF","body":"stdin"}"#);
/// assert_eq!(decoder.next_message().unwrap(), Some(CategorizedMessage::stdin("a")));
/// assert_eq!(decoder.next_message().unwrap(), Some(CategorizedMessage::end_of_input()));
/// assert_eq!(decoder.next_message().unwrap(), None);
/// assert!(decoder.finish().is_ok());
/// ```
#[derive(Debug)]
pub struct StreamDecoder {
    /// Bytes received but not yet consumed by a complete message.
    buf: Vec<u8>,
    /// Largest unfinished message tolerated, in bytes.
    limit: usize,
    scan: ObjectScan,
}

/// Progress of the search for the end of the first buffered object.
#[derive(Debug, Default, Clone, Copy)]
struct ObjectScan {
    /// Bytes of `buf` already examined.
    pos: usize,
    /// Open `{`/`[` count; zero before the object starts.
    depth: usize,
    in_string: bool,
    escaped: bool,
}

enum Scanned {
    /// The first object ends just before this offset.
    Complete(usize),
    Incomplete,
    /// Only whitespace is buffered.
    Blank,
    /// The first non-whitespace byte cannot start an object.
    NotAnObject(u8),
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self {
            buf: Vec::new(),
            limit: usize::MAX,
            scan: ObjectScan::default(),
        }
    }
}

impl StreamDecoder {
    /// Creates an empty decoder with no size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest number of bytes an unfinished message may occupy.
    ///
    /// Once more than `limit` bytes are buffered without the message
    /// completing, [`next_message`](Self::next_message) fails with
    /// [`ProtocolError::TooLarge`].
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Appends a chunk of transport bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the number of buffered bytes not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Decodes the next complete message from the buffer, if there is one.
    ///
    /// Returns `Ok(None)` when the buffer holds only whitespace or an
    /// incomplete object.  Consumed bytes are removed from the buffer.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MalformedMessage`] as soon as the buffered bytes can
    /// no longer become a valid message, and [`ProtocolError::TooLarge`] when
    /// an unfinished message outgrows the limit.  The decoder should be
    /// discarded after an error; its buffer still holds the offending bytes.
    pub fn next_message(&mut self) -> Result<Option<CategorizedMessage>, ProtocolError> {
        match self.scan_first_object() {
            Scanned::Complete(end) => {
                let msg: CategorizedMessage =
                    serde_json::from_slice(&self.buf[..end]).map_err(ProtocolError::malformed)?;
                self.buf.drain(..end);
                self.scan = ObjectScan::default();
                Ok(Some(msg))
            }
            Scanned::Incomplete if self.buf.len() > self.limit => {
                Err(ProtocolError::TooLarge { limit: self.limit })
            }
            Scanned::Incomplete => Ok(None),
            Scanned::Blank => {
                self.buf.clear();
                self.scan = ObjectScan::default();
                Ok(None)
            }
            Scanned::NotAnObject(byte) => Err(ProtocolError::MalformedMessage(format!(
                "expected a message object, found {:?}",
                char::from(byte)
            ))),
        }
    }

    /// Continues scanning where the previous call stopped.
    fn scan_first_object(&mut self) -> Scanned {
        let scan = &mut self.scan;
        while let Some(&byte) = self.buf.get(scan.pos) {
            scan.pos += 1;
            if scan.depth == 0 {
                match byte {
                    b'{' => scan.depth = 1,
                    b if b.is_ascii_whitespace() => {}
                    other => return Scanned::NotAnObject(other),
                }
            } else if scan.in_string {
                if scan.escaped {
                    scan.escaped = false;
                } else if byte == b'\\' {
                    scan.escaped = true;
                } else if byte == b'"' {
                    scan.in_string = false;
                }
            } else {
                match byte {
                    b'"' => scan.in_string = true,
                    b'{' | b'[' => scan.depth += 1,
                    b'}' | b']' => {
                        scan.depth -= 1;
                        if scan.depth == 0 {
                            return Scanned::Complete(scan.pos);
                        }
                    }
                    _ => {}
                }
            }
        }
        if scan.depth == 0 {
            Scanned::Blank
        } else {
            Scanned::Incomplete
        }
    }

    /// Checks that no partial message is left at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] if non-whitespace bytes
    /// remain in the buffer.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(ProtocolError::MalformedMessage(format!(
                "stream ended inside a message ({} bytes pending)",
                self.buf.len()
            )))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(msg: &CategorizedMessage) -> CategorizedMessage {
        let text = encode_message(msg).expect("encode must succeed");
        decode_message(text.as_bytes()).expect("decode must succeed")
    }

    #[test]
    fn test_encode_field_names() {
        let text = encode_message(&CategorizedMessage::stdin("a")).unwrap();
        assert_eq!(text, r#"{"category":"stdin","body":"a"}"#);
    }

    #[test]
    fn test_round_trip_empty_fields() {
        let msg = CategorizedMessage::new("", "");
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_round_trip_control_characters_and_unicode() {
        let msg = CategorizedMessage::stdout("tab\tquote\"nl\n\u{0}é漢🙂");
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_decode_field_order_is_irrelevant() {
        let msg = decode_message(br#"{"body":"x","category":"stdin"}"#).unwrap();
        assert_eq!(msg, CategorizedMessage::stdin("x"));
    }

    #[test]
    fn test_decode_missing_body_defaults_to_empty() {
        let msg = decode_message(br#"{"category":"EOF"}"#).unwrap();
        assert_eq!(msg, CategorizedMessage::new("EOF", ""));
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let msg = decode_message(br#"{"category":"stdin","body":"x","seq":4}"#).unwrap();
        assert_eq!(msg, CategorizedMessage::stdin("x"));
    }

    #[test]
    fn test_decode_truncated_is_malformed() {
        let result = decode_message(br#"{"category":"stdin","bo"#);
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_decode_non_object_is_malformed() {
        assert!(matches!(
            decode_message(b"[1,2,3]"),
            Err(ProtocolError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode_message(b"not json"),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_wrong_field_type_is_malformed() {
        let result = decode_message(br#"{"category":"stdin","body":5}"#);
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_decode_trailing_garbage_is_malformed() {
        let result = decode_message(br#"{"category":"stdin","body":"x"} junk"#);
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_stream_decoder_empty_buffer_yields_none() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.next_message().unwrap(), None);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_stream_decoder_message_split_byte_by_byte() {
        // Arrange: feed one encoded message a single byte at a time
        let msg = CategorizedMessage::stdin("hello\n");
        let text = encode_message(&msg).unwrap();
        let mut decoder = StreamDecoder::new();

        // Act / Assert: nothing is produced until the final byte arrives
        let bytes = text.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            decoder.feed(std::slice::from_ref(b));
            let next = decoder.next_message().unwrap();
            if i + 1 < bytes.len() {
                assert_eq!(next, None, "message produced early at byte {i}");
            } else {
                assert_eq!(next, Some(msg.clone()));
            }
        }
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_stream_decoder_several_messages_in_one_chunk() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(
            br#"{"category":"code","body":"print(1)"} {"category":"EOF","body":"program"}
{"category":"stdin","body":"x"}"#,
        );

        assert_eq!(
            decoder.next_message().unwrap(),
            Some(CategorizedMessage::code("print(1)"))
        );
        assert_eq!(
            decoder.next_message().unwrap(),
            Some(CategorizedMessage::end_of_program())
        );
        assert_eq!(
            decoder.next_message().unwrap(),
            Some(CategorizedMessage::stdin("x"))
        );
        assert_eq!(decoder.next_message().unwrap(), None);
    }

    #[test]
    fn test_stream_decoder_keeps_remainder_for_next_feed() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(br#"{"category":"stdin","body":"a"}{"category":"st"#);

        assert_eq!(
            decoder.next_message().unwrap(),
            Some(CategorizedMessage::stdin("a"))
        );
        assert_eq!(decoder.next_message().unwrap(), None);
        assert!(decoder.finish().is_err(), "partial message must be reported");

        decoder.feed(br#"din","body":"b"}"#);
        assert_eq!(
            decoder.next_message().unwrap(),
            Some(CategorizedMessage::stdin("b"))
        );
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_stream_decoder_invalid_bytes_error() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(b"}{");
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_stream_decoder_trailing_whitespace_is_clean() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(b"{\"category\":\"stdin\",\"body\":\"a\"}\n\n  ");
        assert!(decoder.next_message().unwrap().is_some());
        assert_eq!(decoder.next_message().unwrap(), None);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_stream_decoder_braces_inside_strings() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(br#"{"category":"stdin","body":"} { \"}\\"}"#);
        assert_eq!(
            decoder.next_message().unwrap(),
            Some(CategorizedMessage::stdin(r#"} { "}\"#))
        );
    }

    #[test]
    fn test_stream_decoder_rejects_unfinished_message_over_limit() {
        // Arrange: an object that is opened and never closed
        let mut decoder = StreamDecoder::new().with_limit(64);
        decoder.feed(br#"{"category":"code","body":""#);
        assert_eq!(decoder.next_message().unwrap(), None);

        // Act: keep the body growing one frame at a time
        let mut result = Ok(None);
        for _ in 0..16 {
            decoder.feed(&[b'x'; 16]);
            result = decoder.next_message();
            if result.is_err() {
                break;
            }
        }

        // Assert
        assert_eq!(result, Err(ProtocolError::TooLarge { limit: 64 }));
        assert!(decoder.pending() <= 64 + 16);
    }

    #[test]
    fn test_stream_decoder_limit_applies_per_message() {
        let body = "y".repeat(40);
        let one = encode_message(&CategorizedMessage::stdin(body.as_str())).unwrap();
        let mut decoder = StreamDecoder::new().with_limit(one.len());

        for _ in 0..4 {
            decoder.feed(one.as_bytes());
            assert_eq!(
                decoder.next_message().unwrap(),
                Some(CategorizedMessage::stdin(body.as_str()))
            );
        }
    }

    proptest! {
        #[test]
        fn property_encode_decode_is_identity(category in any::<String>(), body in any::<String>()) {
            let msg = CategorizedMessage::new(category, body);
            prop_assert_eq!(round_trip(&msg), msg);
        }

        #[test]
        fn property_stream_decoder_reassembles_any_split(
            bodies in proptest::collection::vec(any::<String>(), 0..8),
            cut in any::<prop::sample::Index>(),
        ) {
            let msgs: Vec<CategorizedMessage> =
                bodies.into_iter().map(CategorizedMessage::stdin).collect();
            let wire: Vec<u8> = msgs
                .iter()
                .flat_map(|m| encode_message(m).unwrap().into_bytes())
                .collect();

            // Split the concatenated wire bytes at an arbitrary point.
            let at = if wire.is_empty() { 0 } else { cut.index(wire.len() + 1) };
            let mut decoder = StreamDecoder::new();
            let mut out = Vec::new();
            for part in [&wire[..at], &wire[at..]] {
                decoder.feed(part);
                while let Some(msg) = decoder.next_message().unwrap() {
                    out.push(msg);
                }
            }

            prop_assert!(decoder.finish().is_ok());
            prop_assert_eq!(out, msgs);
        }
    }
}
