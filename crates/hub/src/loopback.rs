//! In-process hub transport.
//!
//! Connections live entirely in memory. Tests and the demo mode drive it by
//! emitting events into open channels and inspecting what consumers invoked.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tracing::debug;

use crate::transport::{HubTransport, TransportEvent, WireEvent};
use crate::{ConnectionId, Error, Result};

/// An outbound invocation recorded by [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
	/// Connection the invocation was sent on.
	pub connection: ConnectionId,
	/// Channel of that connection.
	pub channel: String,
	/// Hub method name.
	pub method: String,
	/// Positional arguments.
	pub arguments: Vec<Value>,
}

/// In-memory [`HubTransport`].
pub struct LoopbackTransport {
	events_tx: mpsc::UnboundedSender<TransportEvent>,
	events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
	/// Open connections and the channel each one serves.
	open: Mutex<HashMap<ConnectionId, String>>,
	refused: Mutex<HashSet<String>>,
	invocations: Mutex<Vec<Invocation>>,
	start_gate: Mutex<Option<Arc<Semaphore>>>,
	starts: AtomicUsize,
	stops: AtomicUsize,
}

impl std::fmt::Debug for LoopbackTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LoopbackTransport")
			.field("open", &*self.open.lock())
			.field("starts", &self.starts.load(Ordering::Relaxed))
			.field("stops", &self.stops.load(Ordering::Relaxed))
			.finish_non_exhaustive()
	}
}

impl LoopbackTransport {
	/// Creates an empty transport.
	pub fn new() -> Arc<Self> {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			events_tx,
			events_rx: Mutex::new(Some(events_rx)),
			open: Mutex::new(HashMap::new()),
			refused: Mutex::new(HashSet::new()),
			invocations: Mutex::new(Vec::new()),
			start_gate: Mutex::new(None),
			starts: AtomicUsize::new(0),
			stops: AtomicUsize::new(0),
		})
	}

	/// Makes every future `start` for `channel` fail.
	pub fn refuse(&self, channel: &str) {
		self.refused.lock().insert(channel.to_string());
	}

	/// Lets `start` for `channel` succeed again.
	pub fn accept(&self, channel: &str) {
		self.refused.lock().remove(channel);
	}

	/// Holds every subsequent `start` until a permit is added to the returned
	/// semaphore.
	pub fn gate_starts(&self) -> Arc<Semaphore> {
		let gate = Arc::new(Semaphore::new(0));
		*self.start_gate.lock() = Some(gate.clone());
		gate
	}

	/// Delivers an event to every open connection of `channel`.
	///
	/// Returns how many connections received it.
	pub fn emit(&self, channel: &str, target: &str, arguments: Vec<Value>) -> usize {
		let connections: Vec<ConnectionId> = self
			.open
			.lock()
			.iter()
			.filter(|(_, name)| name.as_str() == channel)
			.map(|(id, _)| *id)
			.collect();
		for connection in &connections {
			let _ = self.events_tx.send(TransportEvent::Message {
				connection: *connection,
				event: WireEvent::new(target, arguments.clone()),
			});
		}
		connections.len()
	}

	/// Delivers an event on a specific connection, open or not.
	pub fn emit_on(&self, connection: ConnectionId, target: &str, arguments: Vec<Value>) {
		let _ = self.events_tx.send(TransportEvent::Message {
			connection,
			event: WireEvent::new(target, arguments),
		});
	}

	/// Simulates the remote hub closing every connection of `channel`.
	pub fn drop_channel(&self, channel: &str, error: Option<&str>) {
		let mut open = self.open.lock();
		let closing: Vec<ConnectionId> = open
			.iter()
			.filter(|(_, name)| name.as_str() == channel)
			.map(|(id, _)| *id)
			.collect();
		for connection in closing {
			open.remove(&connection);
			let _ = self.events_tx.send(TransportEvent::Closed {
				connection,
				error: error.map(str::to_string),
			});
		}
	}

	/// Connections currently open for `channel`.
	pub fn open_connections(&self, channel: &str) -> usize {
		self.open
			.lock()
			.values()
			.filter(|name| name.as_str() == channel)
			.count()
	}

	/// Every invocation sent so far, in order.
	pub fn invocations(&self) -> Vec<Invocation> {
		self.invocations.lock().clone()
	}

	/// Number of `start` calls observed, including refused ones.
	pub fn start_count(&self) -> usize {
		self.starts.load(Ordering::SeqCst)
	}

	/// Number of `stop` calls for connections that were open.
	pub fn stop_count(&self) -> usize {
		self.stops.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl HubTransport for LoopbackTransport {
	fn events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
		self.events_rx.lock().take().ok_or(Error::EventsTaken)
	}

	async fn start(&self, connection: ConnectionId, channel: &str) -> Result<()> {
		self.starts.fetch_add(1, Ordering::SeqCst);
		let gate = self.start_gate.lock().clone();
		if let Some(gate) = gate {
			gate.acquire().await.map_err(|_| Error::Aborted(channel.to_string()))?.forget();
		}
		if self.refused.lock().contains(channel) {
			return Err(Error::Connect {
				channel: channel.to_string(),
				reason: "refused by loopback hub".into(),
			});
		}
		self.open.lock().insert(connection, channel.to_string());
		debug!(target: "kettle::hub", channel, %connection, "Loopback connection opened");
		Ok(())
	}

	async fn invoke(&self, connection: ConnectionId, method: &str, arguments: Vec<Value>) -> Result<()> {
		let channel = self
			.open
			.lock()
			.get(&connection)
			.cloned()
			.ok_or(Error::ConnectionClosed(connection))?;
		self.invocations.lock().push(Invocation {
			connection,
			channel,
			method: method.to_string(),
			arguments,
		});
		Ok(())
	}

	async fn stop(&self, connection: ConnectionId) -> Result<()> {
		if self.open.lock().remove(&connection).is_some() {
			self.stops.fetch_add(1, Ordering::SeqCst);
		}
		Ok(())
	}
}
