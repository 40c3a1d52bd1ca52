//! Transport boundary between channel management and the wire.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{ConnectionId, Result};

/// An inbound hub invocation as it arrives on the wire: a target event name and
/// its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
	/// Event name, e.g. `"ReceiveNewFailure"`.
	pub target: String,
	/// Positional payload.
	pub arguments: Vec<Value>,
}

impl WireEvent {
	/// Creates a wire event.
	pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
		Self {
			target: target.into(),
			arguments,
		}
	}
}

/// Events emitted by a transport, in the order the transport observed them.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
	/// An invocation received on a connection.
	Message {
		/// Connection the event arrived on.
		connection: ConnectionId,
		/// The invocation.
		event: WireEvent,
	},
	/// The remote side closed the connection or the stream failed.
	Closed {
		/// Connection that closed.
		connection: ConnectionId,
		/// Close reason, if the peer sent one.
		error: Option<String>,
	},
}

/// A bidirectional push transport.
///
/// Implementations must deliver events for a given connection in order through
/// the receiver returned by [`HubTransport::events`].
#[async_trait]
pub trait HubTransport: Send + Sync {
	/// Takes the inbound event stream. Can be called once.
	fn events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>>;

	/// Opens `connection` to `channel`.
	///
	/// The id is assigned by the caller, which routes events for it from the
	/// moment this is called, so implementations may emit before returning.
	async fn start(&self, connection: ConnectionId, channel: &str) -> Result<()>;

	/// Sends an outbound invocation.
	async fn invoke(&self, connection: ConnectionId, method: &str, arguments: Vec<Value>) -> Result<()>;

	/// Closes a connection. Closing an unknown connection is not an error.
	async fn stop(&self, connection: ConnectionId) -> Result<()>;
}
