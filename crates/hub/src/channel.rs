//! Channel identity and state types.

use std::fmt;

/// Identifier for one transport connection.
///
/// A channel that reconnects gets a fresh id, so events still in flight from
/// the previous connection can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "conn#{}", self.0)
	}
}

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum ChannelState {
	/// No live transport connection.
	#[default]
	Disconnected,
	/// A connect attempt is in flight.
	Connecting,
	/// Connected and receiving events.
	Connected,
}

impl ChannelState {
	/// Stable lowercase name for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Disconnected => "disconnected",
			Self::Connecting => "connecting",
			Self::Connected => "connected",
		}
	}
}

impl fmt::Display for ChannelState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Who is listening on a channel, announced to the hub after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
	/// Caller identity (user id) from the host session.
	pub identity: i64,
	/// Caller role, e.g. `"Manager"`.
	pub role: String,
}

impl Listener {
	/// Creates a listener announcement.
	pub fn new(identity: i64, role: impl Into<String>) -> Self {
		Self {
			identity,
			role: role.into(),
		}
	}
}
