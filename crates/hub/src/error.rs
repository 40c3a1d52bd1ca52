use std::io;

use crate::ConnectionId;

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by channel management and transports.
///
/// `Clone` so a single in-flight connect can hand the same outcome to every
/// waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The transport's inbound event stream was already handed out.
	#[error("transport event stream already taken")]
	EventsTaken,
	/// The transport could not establish a connection for a channel.
	#[error("failed to connect channel {channel}: {reason}")]
	Connect {
		/// Channel name.
		channel: String,
		/// Transport-provided reason.
		reason: String,
	},
	/// The remote hub refused the handshake.
	#[error("handshake rejected: {0}")]
	Handshake(String),
	/// The peer sent something that is not a valid hub frame.
	#[error("protocol error: {0}")]
	Protocol(String),
	/// A complete frame whose payload is not valid JSON.
	#[error("undecodable frame: {0}")]
	Decode(String),
	/// Input/output errors from the underlying stream.
	#[error("io error: {0}")]
	Io(String),
	/// The connection is no longer open.
	#[error("connection {0} is closed")]
	ConnectionClosed(ConnectionId),
	/// The connect attempt was abandoned before it completed.
	#[error("connect aborted for channel {0}")]
	Aborted(String),
	/// A handshake or frame read did not finish in time.
	#[error("timed out: {0}")]
	Timeout(String),
}

impl From<io::Error> for Error {
	fn from(err: io::Error) -> Self {
		Self::Io(err.to_string())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Protocol(err.to_string())
	}
}
