//! Protocol module containing the categorized message types and the JSON codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_message, encode_message, ProtocolError, StreamDecoder};
pub use messages::*;
