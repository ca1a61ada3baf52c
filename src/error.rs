//! Rejection kinds reported by the channel, the binding elements and the stores.
//!
//! Every path on which a message is refused has its own variant so that the hosting application
//! can translate it into a status code or a user message. None of these are retried internally.
//! Only [`Error::Transport`] describes a condition that may go away by retrying the exchange, and
//! the signature, replay and expiry variants indicate a possible attack and must be surfaced.
//!
//! [`Error::Transport`]: enum.Error.html#variant.Transport
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::messaging::MessageKind;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a message, an exchange or a configuration was refused.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A part's wire value could not be decoded.
    #[error("malformed value for message part `{part}`: {reason}")]
    Format {
        /// Name of the offending part, as it appears on the wire.
        part: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A required part was missing or a message-level rule was broken.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The signature of the message did not verify.
    #[error("invalid signature on {kind:?} message")]
    InvalidSignature {
        /// The message type whose signature failed.
        kind: MessageKind,
    },

    /// The nonce of the message was already consumed.
    #[error("replayed {kind:?} message")]
    ReplayedMessage {
        /// The message type that was replayed.
        kind: MessageKind,
    },

    /// The message is older than the configured maximum age.
    #[error("{kind:?} message expired at {expired_at}")]
    ExpiredMessage {
        /// The message type that expired.
        kind: MessageKind,
        /// The instant at which the message stopped being acceptable.
        expired_at: DateTime<Utc>,
    },

    /// No known message type matches the received fields.
    #[error("unrecognized message")]
    UnrecognizedMessage,

    /// The pipeline or a collaborator is configured in a way that cannot work.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Contacting the peer over a direct exchange failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The caller's deadline passed before a blocking step could run.
    #[error("operation cancelled, deadline elapsed")]
    Cancelled,

    /// The association named by a message is unknown or expired.
    ///
    /// This is the signal for a relying party to re-associate with the provider; it does not
    /// mean the message was forged.
    #[error("unknown or expired association `{0}`")]
    UnknownAssociation(String),
}

impl Error {
    /// Shorthand for a `Format` error.
    pub fn format<P: Into<String>, R: Into<String>>(part: P, reason: R) -> Self {
        Error::Format {
            part: part.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `ProtocolViolation` error.
    pub fn violation<M: Into<String>>(message: M) -> Self {
        Error::ProtocolViolation(message.into())
    }

    /// Whether the caller may retry the same exchange later, with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Whether the rejection points at tampering, replay or a stale message.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            Error::InvalidSignature { .. } | Error::ReplayedMessage { .. } | Error::ExpiredMessage { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Error::Transport("connection reset".into()).is_transient());
        assert!(!Error::Transport("connection reset".into()).is_security_failure());

        let forged = Error::InvalidSignature {
            kind: MessageKind::PositiveAssertion,
        };
        assert!(forged.is_security_failure());
        assert!(!forged.is_transient());

        assert!(Error::ReplayedMessage {
            kind: MessageKind::AccessProtectedResourceRequest
        }
        .is_security_failure());
        assert!(!Error::UnknownAssociation("h".into()).is_security_failure());
        assert!(!Error::Configuration("x".into()).is_transient());
    }

    #[test]
    fn format_names_the_part() {
        let err = Error::format("oauth_timestamp", "not a number");
        assert!(err.to_string().contains("oauth_timestamp"));
    }
}
