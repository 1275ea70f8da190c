use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::network::codec::CodecError;
use crate::{Frame, PlayerId};

/// Everything the engine and its builder can fail with.
///
/// Stale or duplicate remote inputs are not errors; they are dropped silently. A
/// desync is not an error either: it is reported through
/// [`SyncHealth`](crate::SyncHealth) and an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RollbackError {
    /// A client engine was started without the keyframe received from the host.
    MissingKeyframe,
    /// A host engine was started without a callback to broadcast keyframes.
    MissingStateBroadcast,
    /// The operation does not apply to this peer, e.g. a keyframe handed to a host or a
    /// remote input for the local player.
    InvalidRequest {
        /// What was asked and why it does not apply.
        info: String,
    },
    /// The configuration passed to the builder is inconsistent.
    InvalidConfig {
        /// Which setting was rejected and why.
        info: String,
    },
    /// Input arrived for a player id that was never registered with `add_player`.
    UnknownPlayer {
        /// The unregistered id.
        player: PlayerId,
    },
    /// A frame outside the range the operation accepts.
    InvalidFrame {
        /// The rejected frame.
        frame: Frame,
        /// Which range was expected.
        reason: String,
    },
    /// A state or message could not be encoded or decoded.
    Serialization {
        /// The codec's description of the failure.
        context: String,
    },
    /// The engine's own bookkeeping is inconsistent. Always a bug in this crate.
    InternalError {
        /// What was found inconsistent.
        context: String,
    },
}

impl Display for RollbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKeyframe => {
                write!(f, "A client engine needs the initial keyframe sent by the host.")
            },
            Self::MissingStateBroadcast => {
                write!(f, "A host engine needs a state broadcast callback.")
            },
            Self::InvalidRequest { info } => {
                write!(f, "Invalid request: {}", info)
            },
            Self::InvalidConfig { info } => {
                write!(f, "Invalid configuration: {}", info)
            },
            Self::UnknownPlayer { player } => {
                write!(f, "Unknown player id {}", player)
            },
            Self::InvalidFrame { frame, reason } => {
                write!(f, "Invalid frame {}: {}", frame, reason)
            },
            Self::Serialization { context } => {
                write!(f, "Encoding failed: {}", context)
            },
            Self::InternalError { context } => {
                write!(f, "Engine bookkeeping inconsistent (this is a bug): {}", context)
            },
        }
    }
}

impl Error for RollbackError {}

impl From<CodecError> for RollbackError {
    fn from(err: CodecError) -> Self {
        Self::Serialization {
            context: err.to_string(),
        }
    }
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
    use crate::network::codec::CodecOperation;

    #[test]
    fn display_mentions_the_offending_player() {
        let err = RollbackError::UnknownPlayer {
            player: PlayerId::new(7),
        };
        assert_eq!(err.to_string(), "Unknown player id 7");
    }

    #[test]
    fn display_invalid_frame_includes_reason() {
        let err = RollbackError::InvalidFrame {
            frame: Frame::new(3),
            reason: "older than the confirmed frontier".to_owned(),
        };
        let text = err.to_string();
        assert!(text.contains('3'));
        assert!(text.contains("confirmed frontier"));
    }

    #[test]
    fn codec_errors_become_serialization_errors() {
        let codec = CodecError::DecodeError {
            message: "unexpected end".to_owned(),
            operation: CodecOperation::DecodeMessage,
        };
        let err: RollbackError = codec.into();
        match err {
            RollbackError::Serialization { context } => {
                assert!(context.contains("unexpected end"));
            },
            other => panic!("expected serialization error, got {:?}", other),
        }
    }

    #[test]
    fn errors_are_std_errors() {
        fn assert_error<E: Error>(_: &E) {}
        assert_error(&RollbackError::MissingKeyframe);
    }
}
