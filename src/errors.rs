//! All the errors defined by this crate.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// A violation of the RCON wire format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RconProtocolError {
    /// The declared frame length is smaller than the fixed header and
    /// terminators, or larger than any frame this crate accepts.
    #[error("frame length {0} out of range")]
    LengthOutOfRange(i32),

    /// The two bytes closing the frame were not both null.
    #[error("missing null terminators")]
    MissingTerminator,

    /// Invalid or unexpected packet type for the direction it travelled in.
    ///
    /// | Type | Serverbound  | Clientbound    |
    /// | ---- | ------------ | -------------- |
    /// | 0    | -            | RESPONSE_VALUE |
    /// | 2    | EXECCOMMAND  | AUTH_RESPONSE  |
    /// | 3    | AUTH         | -              |
    #[error("invalid packet type {0}")]
    InvalidPacketType(i32),
}

/// Why an authentication handshake did not reach the ready state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The server answered with a negative request id, -1 by convention. You
    /// probably entered the wrong RCON password.
    #[error("password rejected by server")]
    Rejected,

    /// No `AUTH_RESPONSE` arrived in time.
    #[error("no auth response within {0:?}")]
    TimedOut(Duration),

    /// The server sent something other than an auth response, or closed the
    /// socket mid-handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Errors surfaced by connections and the command client.
///
/// Every variant ends the operation that produced it. Only
/// [`RconError::ConnectionLost`] and [`RconError::Malformed`] also end the
/// connection.
#[derive(Error, Debug)]
pub enum RconError {
    /// The TCP socket could not be opened (DNS failure, refused, timed out).
    #[error("could not connect to {addr}: {source}")]
    Connect {
        /// `host:port` that was dialed.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The handshake failed. Retrying with the same password is pointless
    /// when the cause is [`AuthError::Rejected`].
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// The socket failed after authentication succeeded.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The fragment terminator for a command never arrived.
    #[error("no complete response within {0:?}")]
    ResponseTimeout(Duration),

    /// The operation needs a ready connection and there is none.
    #[error("not connected")]
    NotConnected,

    /// The server sent a frame that violates the wire format.
    #[error("malformed frame: {0}")]
    Malformed(#[from] RconProtocolError),

    /// The command does not fit in a single serverbound packet.
    #[error("command is {len} bytes, limit is {max}")]
    CommandTooLong {
        /// Length of the rejected command in bytes.
        len: usize,
        /// Largest accepted command body.
        max: usize,
    },
}

impl RconError {
    /// Whether this error also ended the connection it came from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::Malformed(_))
    }
}
