//! Push-notification channels for live collections.
//!
//! A [`ChannelManager`] owns at most one transport connection per channel name and
//! shares it between consumers by reference count. Inbound events are pumped in
//! transport order through an [`EventHandlerRegistry`], which keeps exactly one
//! handler per `(channel, event)` pair.
//!
//! The transport itself sits behind [`HubTransport`]. Two implementations ship
//! with this crate:
//! - [`LoopbackTransport`]: in-process hub for tests and demos.
//! - [`StreamTransport`]: JSON hub frames over any byte stream (TCP by default),
//!   framed by [`protocol::RECORD_SEPARATOR`].

#![warn(missing_docs)]

mod channel;
mod error;
pub mod handlers;
mod loopback;
pub mod manager;
pub mod protocol;
pub mod stream;
mod transport;

pub use channel::{ChannelState, ConnectionId, Listener};
pub use error::{Error, Result};
pub use handlers::{DispatchOutcome, EventHandlerRegistry, HandlerError, HandlerResult, RegistrationId};
pub use loopback::{Invocation, LoopbackTransport};
pub use manager::{ChannelManager, ManagerOptions};
pub use serde_json::Value as JsonValue;
pub use stream::{Connector, StreamTransport, TcpConnector};
pub use transport::{HubTransport, TransportEvent, WireEvent};
