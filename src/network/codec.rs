//! Every peer must produce the same bytes for the same value: keyframe checksums are
//! computed over these bytes, so the bincode configuration lives in exactly one place.
//!
//! # Examples
//!
//! ```
//! use keyframe_rollback::network::codec::{decode, encode};
//! use keyframe_rollback::{Frame, InputMessage, Message, PlayerId};
//!
//! let msg: Message<u8, ()> = Message::Input(InputMessage {
//!     frame: Frame::new(3),
//!     player_id: PlayerId::new(1),
//!     input: 7,
//!     frame_sync: Frame::new(0),
//! });
//! let bytes = encode(&msg).expect("encoding should succeed");
//! let decoded: Message<u8, ()> = decode(&bytes).expect("decoding should succeed");
//! assert_eq!(msg, decoded);
//! ```

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

// Fixed-size integers keep encodings identical regardless of value magnitude.
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// What the codec was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecOperation {
    /// Encoding a wire message.
    EncodeMessage,
    /// Decoding a wire message.
    DecodeMessage,
    /// Encoding a game state for checksumming.
    EncodeState,
    /// Appending to a caller-owned buffer.
    AppendToBuffer,
}

impl fmt::Display for CodecOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeMessage => write!(f, "encoding message"),
            Self::DecodeMessage => write!(f, "decoding message"),
            Self::EncodeState => write!(f, "encoding game state"),
            Self::AppendToBuffer => write!(f, "appending to buffer"),
        }
    }
}

/// Errors that can occur during encoding or decoding.
///
/// bincode only exposes its failures through `Display`, so the message is kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The encoding operation failed.
    EncodeError {
        /// The underlying bincode error message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// The decoding operation failed.
    DecodeError {
        /// The underlying bincode error message.
        message: String,
        /// The operation that was being performed.
        operation: CodecOperation,
    },
    /// Decoding succeeded but left unread bytes behind.
    TrailingBytes {
        /// Number of bytes consumed by the value.
        consumed: usize,
        /// Total number of bytes provided.
        provided: usize,
    },
}

impl CodecError {
    /// Creates an encode error for `operation`.
    pub fn encode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::EncodeError {
            message: message.into(),
            operation,
        }
    }

    /// Creates a decode error for `operation`.
    pub fn decode(message: impl Into<String>, operation: CodecOperation) -> Self {
        Self::DecodeError {
            message: message.into(),
            operation,
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeError { message, operation } => {
                write!(f, "encoding failed while {operation}: {message}")
            },
            Self::DecodeError { message, operation } => {
                write!(f, "decoding failed while {operation}: {message}")
            },
            Self::TrailingBytes { consumed, provided } => {
                write!(
                    f,
                    "decoded value used {consumed} of {provided} bytes; trailing data rejected"
                )
            },
        }
    }
}

impl std::error::Error for CodecError {}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a value into a fresh buffer.
pub fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config())
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::EncodeMessage))
}

/// Encodes a game state; used by [`crate::checksum`].
pub(crate) fn encode_state<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config())
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::EncodeState))
}

/// Appends the encoding of `value` to `buffer`, returning the number of bytes written.
///
/// Lets a transport batch several messages into one datagram without reallocating.
pub fn encode_append<T: Serialize>(value: &T, buffer: &mut Vec<u8>) -> CodecResult<usize> {
    let start_len = buffer.len();
    bincode::serde::encode_into_std_write(value, buffer, config())
        .map(|_| buffer.len() - start_len)
        .map_err(|e| CodecError::encode(e.to_string(), CodecOperation::AppendToBuffer))
}

/// Decodes exactly one value from `bytes`. Trailing bytes are an error.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let (value, consumed) = decode_prefix(bytes)?;
    if consumed != bytes.len() {
        return Err(CodecError::TrailingBytes {
            consumed,
            provided: bytes.len(),
        });
    }
    Ok(value)
}

/// Decodes one value from the front of `bytes` and reports how many bytes it used.
pub fn decode_prefix<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<(T, usize)> {
    bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::decode(e.to_string(), CodecOperation::DecodeMessage))
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::network::messages::{InputMessage, Message};
    use crate::{Frame, KeyframeState, PlayerId};

    type TestMessage = Message<u16, Vec<i32>>;

    fn input_message(frame: i32, input: u16) -> TestMessage {
        Message::Input(InputMessage {
            frame: Frame::new(frame),
            player_id: PlayerId::new(1),
            input,
            frame_sync: Frame::new(0),
        })
    }

    #[test]
    fn keyframe_message_survives_the_wire() {
        let msg: TestMessage = Message::State(KeyframeState {
            frame: Frame::new(4),
            state: vec![1, -2, 3],
            player_inputs: vec![5, 6],
        });
        let bytes = encode(&msg).unwrap();
        let decoded: TestMessage = decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode(&input_message(9, 3)).unwrap();
        let b = encode(&input_message(9, 3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fixed_int_encoding_keeps_sizes_stable() {
        let small = encode(&input_message(1, 0)).unwrap();
        let large = encode(&input_message(1_000_000, u16::MAX)).unwrap();
        assert_eq!(small.len(), large.len());
    }

    #[test]
    fn append_batches_messages() {
        let mut buffer = Vec::new();
        let first = encode_append(&input_message(1, 1), &mut buffer).unwrap();
        let second = encode_append(&input_message(2, 2), &mut buffer).unwrap();
        assert_eq!(buffer.len(), first + second);

        let (one, used): (TestMessage, _) = decode_prefix(&buffer).unwrap();
        assert_eq!(one, input_message(1, 1));
        let two: TestMessage = decode(&buffer[used..]).unwrap();
        assert_eq!(two, input_message(2, 2));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = encode(&7u32).unwrap();
        bytes.push(0);
        let result: CodecResult<u32> = decode(&bytes);
        assert!(matches!(
            result,
            Err(CodecError::TrailingBytes {
                consumed: 4,
                provided: 5
            })
        ));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let bytes = encode(&input_message(3, 3)).unwrap();
        let result: CodecResult<TestMessage> = decode(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(CodecError::DecodeError { .. })));
    }

    #[test]
    fn error_display_names_operation() {
        let err = CodecError::encode("boom", CodecOperation::EncodeState);
        let text = err.to_string();
        assert!(text.contains("game state"));
        assert!(text.contains("boom"));
    }
}
