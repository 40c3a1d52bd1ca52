//! Event handler registry.
//!
//! Maps `(channel, event)` to exactly one callback. Installing a handler for a
//! pair that already has one replaces it, so repeated activate/deactivate
//! cycles never stack duplicate callbacks.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, warn};

/// Error returned by a handler that could not process an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
	/// Creates a handler error from any displayable reason.
	pub fn new(reason: impl std::fmt::Display) -> Self {
		Self(reason.to_string())
	}
}

/// Result type returned by event handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

type EventHandler = Arc<dyn Fn(&[Value]) -> HandlerResult + Send + Sync>;

/// Token identifying one installation of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

/// What happened to a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
	/// The installed handler accepted the event.
	Delivered,
	/// No handler is installed for the pair.
	Unhandled,
	/// The handler returned an error. It stays installed.
	Failed,
	/// The handler panicked. It stays installed.
	Panicked,
}

struct Installed {
	id: RegistrationId,
	handler: EventHandler,
}

/// Registry of single active handlers keyed by `(channel, event)`.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct EventHandlerRegistry {
	handlers: Arc<RwLock<HashMap<(String, String), Installed>>>,
	next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventHandlerRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventHandlerRegistry")
			.field("installed", &self.handlers.read().len())
			.finish_non_exhaustive()
	}
}

impl EventHandlerRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Installs `handler` as the sole callback for `(channel, event)`.
	///
	/// Any previously installed handler for the pair is dropped.
	pub fn on<F>(&self, channel: &str, event: &str, handler: F) -> RegistrationId
	where
		F: Fn(&[Value]) -> HandlerResult + Send + Sync + 'static,
	{
		let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let previous = self.handlers.write().insert(
			(channel.to_string(), event.to_string()),
			Installed {
				id,
				handler: Arc::new(handler),
			},
		);
		if previous.is_some() {
			debug!(target: "kettle::hub", channel, event, "Replaced event handler");
		}
		id
	}

	/// Removes the handler for `(channel, event)`. Returns whether one was installed.
	pub fn off(&self, channel: &str, event: &str) -> bool {
		self.handlers
			.write()
			.remove(&(channel.to_string(), event.to_string()))
			.is_some()
	}

	/// Removes the handler for `(channel, event)` only if it is still the one
	/// installed under `id`.
	pub fn off_registration(&self, channel: &str, event: &str, id: RegistrationId) -> bool {
		let mut handlers = self.handlers.write();
		let key = (channel.to_string(), event.to_string());
		match handlers.get(&key) {
			Some(installed) if installed.id == id => {
				handlers.remove(&key);
				true
			}
			Some(_) => {
				debug!(target: "kettle::hub", channel, event, "Handler was replaced, leaving newer registration");
				false
			}
			None => false,
		}
	}

	/// Returns true if a handler is installed for `(channel, event)`.
	pub fn is_registered(&self, channel: &str, event: &str) -> bool {
		self.handlers
			.read()
			.contains_key(&(channel.to_string(), event.to_string()))
	}

	/// Number of installed handlers across all channels.
	pub fn len(&self) -> usize {
		self.handlers.read().len()
	}

	/// Returns true when no handlers are installed.
	pub fn is_empty(&self) -> bool {
		self.handlers.read().is_empty()
	}

	/// Invokes the installed handler for `(channel, event)` with `args`.
	///
	/// Runs synchronously on the caller. Handler errors and panics are logged
	/// and reported in the outcome; they never propagate.
	pub fn dispatch(&self, channel: &str, event: &str, args: &[Value]) -> DispatchOutcome {
		let handler = {
			let handlers = self.handlers.read();
			handlers
				.get(&(channel.to_string(), event.to_string()))
				.map(|installed| installed.handler.clone())
		};
		let Some(handler) = handler else {
			debug!(target: "kettle::hub", channel, event, "Unhandled event");
			return DispatchOutcome::Unhandled;
		};

		match catch_unwind(AssertUnwindSafe(|| handler(args))) {
			Ok(Ok(())) => DispatchOutcome::Delivered,
			Ok(Err(err)) => {
				warn!(target: "kettle::hub", channel, event, error = %err, "Event handler failed");
				DispatchOutcome::Failed
			}
			Err(payload) => {
				let message = kettle_worker::panic_message(payload.as_ref()).unwrap_or_else(|| "<non-string panic>".into());
				error!(target: "kettle::hub", channel, event, panic = %message, "Event handler panicked");
				DispatchOutcome::Panicked
			}
		}
	}
}
