//! Channel connection manager.
//!
//! Owns one transport connection per channel name and shares it between
//! consumers by reference count.
//!
//! # Single-flight connect
//!
//! 1. Fast path: the channel already has a live connection, take a reference.
//! 2. Leader election: the first caller to find no connection and no attempt
//!    in flight becomes the leader and marks the channel `Connecting`.
//! 3. Waiters subscribe to the leader's `watch` channel and start over once a
//!    result is published, which lands them on the fast path after a success.
//! 4. If the leader is cancelled, its guard publishes [`Error::Aborted`] and
//!    clears the attempt so a waiter can take over.
//!
//! # Inbound events
//!
//! A single pump task drains the transport's event stream and dispatches
//! events synchronously, so per-channel ordering is exactly transport order.
//! Events from a connection that is no longer current for its channel are
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::handlers::{DispatchOutcome, EventHandlerRegistry, HandlerResult, RegistrationId};
use crate::transport::{HubTransport, TransportEvent};
use crate::{ChannelState, ConnectionId, Error, Listener, Result};

/// Default hub method used to announce a listener.
pub const DEFAULT_REGISTER_METHOD: &str = "RegisterConnection";

/// Options for a [`ChannelManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
	/// Hub method invoked by [`ChannelManager::register_connection`].
	pub register_method: String,
}

impl Default for ManagerOptions {
	fn default() -> Self {
		Self {
			register_method: DEFAULT_REGISTER_METHOD.to_string(),
		}
	}
}

type ConnectOutcome = Option<Result<ConnectionId>>;

/// Per-channel bookkeeping.
struct ChannelEntry {
	/// Consumers currently holding a reference.
	holders: usize,
	/// Live connection, if any.
	connection: Option<ConnectionId>,
	/// Result channel of the connect attempt in flight.
	inflight: Option<watch::Receiver<ConnectOutcome>>,
	/// Announcements requested before the connection was up.
	pending: Vec<Listener>,
	state_tx: watch::Sender<ChannelState>,
}

impl ChannelEntry {
	fn new() -> Self {
		let (state_tx, _) = watch::channel(ChannelState::Disconnected);
		Self {
			holders: 0,
			connection: None,
			inflight: None,
			pending: Vec::new(),
			state_tx,
		}
	}

	fn set_state(&self, state: ChannelState) {
		self.state_tx.send_replace(state);
	}
}

/// Shared state behind a single lock.
///
/// `channels` and `by_connection` must change together so the pump never
/// routes an event to a channel that has already released its connection.
/// A connection is in `by_connection` from just before its transport start
/// until it closes or is released.
#[derive(Default)]
struct ManagerState {
	channels: HashMap<String, ChannelEntry>,
	by_connection: HashMap<ConnectionId, String>,
}

impl ManagerState {
	fn entry(&mut self, channel: &str) -> &mut ChannelEntry {
		self.channels
			.entry(channel.to_string())
			.or_insert_with(ChannelEntry::new)
	}
}

enum Attempt {
	Lead(watch::Sender<ConnectOutcome>),
	Wait(watch::Receiver<ConnectOutcome>),
}

/// Reference-counted registry of push channels.
///
/// # Concurrency
///
/// - `state`: synchronous lock, never held across an `.await`
/// - `pump`: the only reader of the transport event stream
pub struct ChannelManager {
	transport: Arc<dyn HubTransport>,
	handlers: EventHandlerRegistry,
	state: Arc<Mutex<ManagerState>>,
	options: ManagerOptions,
	next_connection: AtomicU64,
	pump: JoinHandle<()>,
}

impl std::fmt::Debug for ChannelManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("ChannelManager")
			.field("channels", &state.channels.len())
			.field("connections", &state.by_connection.len())
			.field("handlers", &self.handlers)
			.finish_non_exhaustive()
	}
}

impl ChannelManager {
	/// Creates a manager over `transport` and starts its inbound pump.
	///
	/// # Errors
	///
	/// Returns [`Error::EventsTaken`] if the transport's event stream is already
	/// owned by another manager.
	pub fn new(transport: Arc<dyn HubTransport>, options: ManagerOptions) -> Result<Arc<Self>> {
		let events = transport.events()?;
		let handlers = EventHandlerRegistry::new();
		let state = Arc::new(Mutex::new(ManagerState::default()));
		let pump = kettle_worker::spawn(kettle_worker::TaskClass::Pump, pump(events, state.clone(), handlers.clone()));
		Ok(Arc::new(Self {
			transport,
			handlers,
			state,
			options,
			next_connection: AtomicU64::new(1),
			pump,
		}))
	}

	/// The handler registry events are dispatched through.
	pub fn handlers(&self) -> &EventHandlerRegistry {
		&self.handlers
	}

	/// Installs `handler` as the sole callback for `(channel, event)`.
	pub fn on<F>(&self, channel: &str, event: &str, handler: F) -> RegistrationId
	where
		F: Fn(&[Value]) -> HandlerResult + Send + Sync + 'static,
	{
		self.handlers.on(channel, event, handler)
	}

	/// Removes the callback for `(channel, event)`, if any.
	pub fn off(&self, channel: &str, event: &str) -> bool {
		self.handlers.off(channel, event)
	}

	/// Current state of `channel`.
	pub fn state(&self, channel: &str) -> ChannelState {
		self.state
			.lock()
			.channels
			.get(channel)
			.map_or(ChannelState::Disconnected, |entry| *entry.state_tx.borrow())
	}

	/// Subscribes to state changes of `channel`.
	pub fn subscribe_state(&self, channel: &str) -> watch::Receiver<ChannelState> {
		self.state.lock().entry(channel).state_tx.subscribe()
	}

	/// Number of consumers holding `channel`.
	pub fn holders(&self, channel: &str) -> usize {
		self.state
			.lock()
			.channels
			.get(channel)
			.map_or(0, |entry| entry.holders)
	}

	/// Acquires a reference on `channel`, connecting it if needed.
	///
	/// Concurrent callers share one transport start. Each successful call must
	/// be paired with one [`Self::disconnect`].
	///
	/// # Errors
	///
	/// Returns the transport's error when the connection cannot be established.
	/// No reference is held in that case.
	pub async fn connect(&self, channel: &str) -> Result<()> {
		loop {
			let attempt = {
				let mut state = self.state.lock();
				let entry = state.entry(channel);
				if entry.connection.is_some() {
					entry.holders += 1;
					debug!(target: "kettle::hub", channel, holders = entry.holders, "Reusing channel connection");
					return Ok(());
				}
				match &entry.inflight {
					Some(rx) => Attempt::Wait(rx.clone()),
					None => {
						let (tx, rx) = watch::channel(None);
						entry.inflight = Some(rx);
						entry.set_state(ChannelState::Connecting);
						Attempt::Lead(tx)
					}
				}
			};

			match attempt {
				Attempt::Wait(mut rx) => {
					let outcome = rx.wait_for(Option::is_some).await.map(|v| v.clone());
					match outcome {
						Ok(Some(Err(err))) if !matches!(err, Error::Aborted(_)) => return Err(err),
						// Success or an abandoned leader: start over and take the fast path or lead.
						_ => continue,
					}
				}
				Attempt::Lead(tx) => return self.lead_connect(channel, tx).await,
			}
		}
	}

	async fn lead_connect(&self, channel: &str, tx: watch::Sender<ConnectOutcome>) -> Result<()> {
		let connection = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
		self.state.lock().by_connection.insert(connection, channel.to_string());
		let guard = ConnectGuard {
			channel: channel.to_string(),
			connection,
			state: self.state.clone(),
			transport: self.transport.clone(),
			tx,
			completed: false,
		};

		info!(target: "kettle::hub", channel, %connection, "Connecting channel");
		let started = self.transport.start(connection, channel).await;

		let (result, announcements) = {
			let mut state = self.state.lock();
			let result = match started {
				// The pump already saw this connection close.
				Ok(()) if !state.by_connection.contains_key(&connection) => Err(Error::ConnectionClosed(connection)),
				Ok(()) => Ok(connection),
				Err(err) => {
					state.by_connection.remove(&connection);
					Err(err)
				}
			};
			let entry = state.entry(channel);
			entry.inflight = None;
			let announcements = match &result {
				Ok(connection) => {
					entry.connection = Some(*connection);
					entry.holders += 1;
					entry.set_state(ChannelState::Connected);
					std::mem::take(&mut entry.pending)
				}
				Err(_) => {
					entry.set_state(ChannelState::Disconnected);
					Vec::new()
				}
			};
			(result, announcements)
		};
		guard.complete(result.clone());

		let connection = match result {
			Ok(connection) => connection,
			Err(err) => {
				warn!(target: "kettle::hub", channel, error = %err, "Channel connect failed");
				return Err(err);
			}
		};
		info!(target: "kettle::hub", channel, %connection, "Channel connected");

		for listener in announcements {
			if let Err(err) = self.announce(connection, &listener).await {
				warn!(target: "kettle::hub", channel, identity = listener.identity, error = %err, "Queued listener announcement failed");
			}
		}
		Ok(())
	}

	/// Announces `listener` on `channel`.
	///
	/// If the channel is not connected yet the announcement is queued and sent
	/// right after the next successful connect.
	pub async fn register_connection(&self, channel: &str, listener: Listener) -> Result<()> {
		let connection = {
			let mut state = self.state.lock();
			let entry = state.entry(channel);
			match entry.connection {
				Some(connection) => connection,
				None => {
					if !entry.pending.contains(&listener) {
						entry.pending.push(listener);
					}
					debug!(target: "kettle::hub", channel, "Channel not connected, announcement queued");
					return Ok(());
				}
			}
		};
		self.announce(connection, &listener).await
	}

	async fn announce(&self, connection: ConnectionId, listener: &Listener) -> Result<()> {
		debug!(target: "kettle::hub", %connection, identity = listener.identity, role = %listener.role, "Announcing listener");
		self.transport
			.invoke(connection, &self.options.register_method, vec![json!(listener.identity), json!(listener.role)])
			.await
	}

	/// Releases one reference on `channel`.
	///
	/// The transport connection is stopped when the last holder releases.
	/// Releasing a channel that holds no references is a no-op.
	pub async fn disconnect(&self, channel: &str) -> Result<()> {
		let to_stop = {
			let mut state = self.state.lock();
			let Some(entry) = state.channels.get_mut(channel) else {
				return Ok(());
			};
			if entry.holders == 0 {
				return Ok(());
			}
			entry.holders -= 1;
			if entry.holders > 0 {
				debug!(target: "kettle::hub", channel, holders = entry.holders, "Released channel reference");
				return Ok(());
			}
			entry.pending.clear();
			entry.set_state(ChannelState::Disconnected);
			let connection = entry.connection.take();
			if let Some(connection) = connection {
				state.by_connection.remove(&connection);
			}
			connection
		};

		if let Some(connection) = to_stop {
			info!(target: "kettle::hub", channel, %connection, "Closing channel, last holder released");
			self.transport.stop(connection).await?;
		}
		Ok(())
	}

	/// Stops every open connection and forgets all holders.
	pub async fn shutdown(&self) {
		let connections: Vec<ConnectionId> = {
			let mut state = self.state.lock();
			for entry in state.channels.values_mut() {
				entry.holders = 0;
				entry.connection = None;
				entry.pending.clear();
				entry.set_state(ChannelState::Disconnected);
			}
			state.by_connection.drain().map(|(connection, _)| connection).collect()
		};
		for connection in connections {
			if let Err(err) = self.transport.stop(connection).await {
				warn!(target: "kettle::hub", %connection, error = %err, "Failed to stop connection during shutdown");
			}
		}
	}
}

impl Drop for ChannelManager {
	fn drop(&mut self) {
		self.pump.abort();
	}
}

/// Publishes an outcome to waiters even if the leader is cancelled mid-start.
struct ConnectGuard {
	channel: String,
	connection: ConnectionId,
	state: Arc<Mutex<ManagerState>>,
	transport: Arc<dyn HubTransport>,
	tx: watch::Sender<ConnectOutcome>,
	completed: bool,
}

impl ConnectGuard {
	fn complete(mut self, result: Result<ConnectionId>) {
		self.completed = true;
		self.tx.send_replace(Some(result));
	}
}

impl Drop for ConnectGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		{
			let mut state = self.state.lock();
			state.by_connection.remove(&self.connection);
			let entry = state.entry(&self.channel);
			entry.inflight = None;
			if entry.connection.is_none() {
				entry.set_state(ChannelState::Disconnected);
			}
		}
		self.tx.send_replace(Some(Err(Error::Aborted(self.channel.clone()))));

		// The transport may have opened the connection before the leader was dropped.
		let transport = self.transport.clone();
		let connection = self.connection;
		kettle_worker::spawn(kettle_worker::TaskClass::Lifecycle, async move {
			if let Err(err) = transport.stop(connection).await {
				debug!(target: "kettle::hub", %connection, error = %err, "Stopping abandoned connection failed");
			}
		});
	}
}

async fn pump(mut events: mpsc::UnboundedReceiver<TransportEvent>, state: Arc<Mutex<ManagerState>>, handlers: EventHandlerRegistry) {
	while let Some(event) = events.recv().await {
		match event {
			TransportEvent::Message { connection, event } => {
				let channel = state.lock().by_connection.get(&connection).cloned();
				let Some(channel) = channel else {
					debug!(target: "kettle::hub", %connection, target_event = %event.target, "Dropping event from stale connection");
					continue;
				};
				if handlers.dispatch(&channel, &event.target, &event.arguments) == DispatchOutcome::Delivered {
					debug!(target: "kettle::hub", channel, target_event = %event.target, "Dispatched event");
				}
			}
			TransportEvent::Closed { connection, error } => {
				let mut state = state.lock();
				let Some(channel) = state.by_connection.remove(&connection) else {
					continue;
				};
				let entry = state.entry(&channel);
				if entry.connection != Some(connection) {
					debug!(target: "kettle::hub", channel, %connection, "Connection closed before connect completed");
					continue;
				}
				entry.connection = None;
				entry.set_state(ChannelState::Disconnected);
				warn!(target: "kettle::hub", channel, %connection, error = error.as_deref().unwrap_or("none"), "Channel closed by transport");
			}
		}
	}
	debug!(target: "kettle::hub", "Transport event stream ended");
}
