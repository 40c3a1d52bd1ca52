//! Per-consumer lifecycle of a live collection.
//!
//! Activation loads a snapshot, installs push handlers, then acquires the
//! channel. Deactivation undoes all three. Every piece of async work, push
//! handlers included, holds the activation's [`CancellationToken`]; results that
//! land after it is cancelled are dropped, so a disposed collection never changes
//! again.

use std::sync::{Arc, Weak};

use kettle_hub::{ChannelManager, HandlerError, Listener, RegistrationId};
use kettle_worker::TaskClass;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::event::SyncEvent;
use crate::reconciler::{Applied, Reconciler};
use crate::record::Record;
use crate::snapshot::{FetchError, SnapshotFetcher, SnapshotSource};

/// Event announcing a newly created record.
pub const DEFAULT_NEW_RECORD_EVENT: &str = "ReceiveNewFailure";
/// Event carrying a partial record update.
pub const DEFAULT_UPDATE_EVENT: &str = "ReceiveStatusUpdate";

/// Where a collection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
	/// Not activated yet.
	#[default]
	Idle,
	/// Snapshot fetch in progress.
	Loading,
	/// The snapshot failed; push setup continues.
	Error,
	/// Snapshot applied and push setup attempted.
	Ready,
	/// Deactivated. Terminal.
	Disposed,
}

impl Phase {
	/// Lowercase name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::Loading => "loading",
			Self::Error => "error",
			Self::Ready => "ready",
			Self::Disposed => "disposed",
		}
	}
}

impl std::fmt::Display for Phase {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// What the presentation layer renders.
#[derive(Debug, Clone)]
pub struct SyncView<R> {
	/// Current collection.
	pub records: Arc<[R]>,
	/// Lifecycle phase.
	pub phase: Phase,
	/// Whether the snapshot is still loading.
	pub loading: bool,
	/// Last snapshot failure.
	pub error: Option<FetchError>,
	/// Collection revision, bumped on every change.
	pub revision: u64,
}

/// Channel and event names a collection listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
	/// Channel name.
	pub channel: String,
	/// Event carrying new records.
	pub new_record_event: String,
	/// Event carrying partial updates.
	pub update_event: String,
	/// Identity announced after connecting.
	pub listener: Option<Listener>,
}

impl Subscription {
	/// Subscription to `channel` with the default event names.
	pub fn new(channel: impl Into<String>) -> Self {
		Self {
			channel: channel.into(),
			new_record_event: DEFAULT_NEW_RECORD_EVENT.into(),
			update_event: DEFAULT_UPDATE_EVENT.into(),
			listener: None,
		}
	}

	/// Overrides the event names.
	pub fn with_events(mut self, new_record: impl Into<String>, update: impl Into<String>) -> Self {
		self.new_record_event = new_record.into();
		self.update_event = update.into();
		self
	}

	/// Announces `listener` once connected.
	pub fn with_listener(mut self, listener: Listener) -> Self {
		self.listener = Some(listener);
		self
	}

	/// Subscription described by `config`.
	pub fn from_config(config: &SyncConfig) -> Self {
		Self {
			channel: config.hub.channel.clone(),
			new_record_event: config.hub.new_record_event.clone(),
			update_event: config.hub.update_event.clone(),
			listener: config.listener(),
		}
	}
}

struct State<R> {
	reconciler: Reconciler<R>,
	phase: Phase,
	error: Option<FetchError>,
	/// Token of the current activation.
	token: Option<CancellationToken>,
	/// Handlers this collection installed, by event name.
	registrations: Vec<(String, RegistrationId)>,
	/// Whether this collection holds a channel reference.
	holds_channel: bool,
}

/// State reachable from push handlers.
struct Shared<R> {
	state: Mutex<State<R>>,
	view_tx: watch::Sender<SyncView<R>>,
}

impl<R: Record> Shared<R> {
	fn publish(&self, state: &State<R>) {
		self.view_tx.send_replace(SyncView {
			records: state.reconciler.records(),
			phase: state.phase,
			loading: state.phase == Phase::Loading,
			error: state.error.clone(),
			revision: state.reconciler.revision(),
		});
	}

	fn apply(&self, token: &CancellationToken, event: SyncEvent<R>) -> Applied {
		let mut state = self.state.lock();
		if token.is_cancelled() {
			debug!(target: "kettle::sync", id = %event.id(), "Dropping event for disposed collection");
			return Applied::Stale;
		}
		let applied = state.reconciler.apply(event);
		if applied.changed() {
			self.publish(&state);
		}
		applied
	}
}

/// A collection kept in sync with a snapshot endpoint and a push channel.
pub struct LiveCollection<R: Record> {
	channels: Arc<ChannelManager>,
	fetcher: SnapshotFetcher<R>,
	subscription: Subscription,
	shared: Arc<Shared<R>>,
}

impl<R: Record> LiveCollection<R> {
	/// Creates an idle collection.
	pub fn new(channels: Arc<ChannelManager>, source: Arc<dyn SnapshotSource>, subscription: Subscription) -> Arc<Self> {
		let state = State {
			reconciler: Reconciler::new(),
			phase: Phase::Idle,
			error: None,
			token: None,
			registrations: Vec::new(),
			holds_channel: false,
		};
		let (view_tx, _) = watch::channel(SyncView {
			records: state.reconciler.records(),
			phase: Phase::Idle,
			loading: false,
			error: None,
			revision: 0,
		});
		Arc::new(Self {
			channels,
			fetcher: SnapshotFetcher::new(source),
			subscription,
			shared: Arc::new(Shared {
				state: Mutex::new(state),
				view_tx,
			}),
		})
	}

	/// Latest view.
	pub fn view(&self) -> SyncView<R> {
		self.shared.view_tx.borrow().clone()
	}

	/// Receiver notified on every view change.
	pub fn subscribe(&self) -> watch::Receiver<SyncView<R>> {
		self.shared.view_tx.subscribe()
	}

	/// Current collection.
	pub fn records(&self) -> Arc<[R]> {
		self.shared.state.lock().reconciler.records()
	}

	/// Current phase.
	pub fn phase(&self) -> Phase {
		self.shared.state.lock().phase
	}

	/// Channel and events this collection listens on.
	pub fn subscription(&self) -> &Subscription {
		&self.subscription
	}

	/// Spawns [`Self::run`] in the background.
	pub fn activate(self: &Arc<Self>) -> JoinHandle<()> {
		let this = self.clone();
		kettle_worker::spawn(TaskClass::Lifecycle, async move { this.run().await })
	}

	/// Runs activation to completion.
	///
	/// Only the first activation does anything; later calls and calls after
	/// [`Self::deactivate`] return immediately.
	pub async fn run(&self) {
		let Some(token) = self.begin() else {
			return;
		};
		let channel = self.subscription.channel.as_str();

		let Some(snapshot) = self.fetcher.fetch_all_with(&token).await else {
			debug!(target: "kettle::sync", channel, "Activation cancelled during snapshot fetch");
			return;
		};
		{
			let mut state = self.shared.state.lock();
			if token.is_cancelled() {
				debug!(target: "kettle::sync", channel, "Discarding snapshot of disposed collection");
				return;
			}
			state.reconciler.replace_all(snapshot.records);
			state.error = snapshot.error;
			if state.error.is_some() {
				state.phase = Phase::Error;
			}
			self.shared.publish(&state);
			state.registrations = self.install_handlers(&token);
		}

		match self.channels.connect(channel).await {
			Ok(()) => {
				let disposed = {
					let mut state = self.shared.state.lock();
					if !token.is_cancelled() {
						state.holds_channel = true;
					}
					token.is_cancelled()
				};
				if disposed {
					debug!(target: "kettle::sync", channel, "Releasing channel acquired after deactivation");
					self.release_channel().await;
					return;
				}
				if let Some(listener) = &self.subscription.listener
					&& let Err(err) = self.channels.register_connection(channel, listener.clone()).await
				{
					warn!(target: "kettle::sync", channel, error = %err, "Listener announcement failed");
				}
			}
			Err(err) => {
				warn!(target: "kettle::sync", channel, error = %err, "Push channel unavailable, continuing without live updates");
			}
		}

		let mut state = self.shared.state.lock();
		if token.is_cancelled() {
			return;
		}
		state.phase = Phase::Ready;
		self.shared.publish(&state);
		info!(target: "kettle::sync", channel, records = state.reconciler.len(), "Live collection ready");
	}

	/// Re-reads the snapshot and replaces the collection.
	///
	/// A failed read keeps the current records and surfaces the error in the
	/// view. Returns [`Applied::Stale`] when the collection is not active.
	pub async fn refresh(&self) -> Applied {
		let Some(token) = self.shared.state.lock().token.clone() else {
			return Applied::Stale;
		};
		let Some(snapshot) = self.fetcher.fetch_all_with(&token).await else {
			return Applied::Stale;
		};

		let mut state = self.shared.state.lock();
		if token.is_cancelled() {
			return Applied::Stale;
		}
		let applied = match snapshot.error {
			Some(err) => {
				state.error = Some(err);
				Applied::Rejected
			}
			None => {
				state.error = None;
				state.reconciler.replace_all(snapshot.records)
			}
		};
		self.shared.publish(&state);
		applied
	}

	/// Appends a record created locally, unless a push event already delivered it.
	pub fn insert_local(&self, record: R) -> Applied {
		let mut state = self.shared.state.lock();
		if state.phase == Phase::Disposed {
			return Applied::Stale;
		}
		let applied = state.reconciler.apply_new_record(record);
		if applied.changed() {
			self.shared.publish(&state);
		}
		applied
	}

	/// Cancels pending work, removes handlers and releases the channel.
	///
	/// The collection keeps the records it had. Idempotent.
	pub async fn deactivate(&self) {
		let Some(release) = self.dispose() else {
			return;
		};
		if release {
			self.release_channel().await;
		}
		info!(target: "kettle::sync", channel = %self.subscription.channel, "Live collection disposed");
	}

	fn begin(&self) -> Option<CancellationToken> {
		let mut state = self.shared.state.lock();
		if state.phase == Phase::Disposed {
			debug!(target: "kettle::sync", channel = %self.subscription.channel, "Ignoring activation of disposed collection");
			return None;
		}
		if state.token.is_some() {
			debug!(target: "kettle::sync", channel = %self.subscription.channel, "Collection already active");
			return None;
		}
		let token = CancellationToken::new();
		state.token = Some(token.clone());
		state.phase = Phase::Loading;
		self.shared.publish(&state);
		Some(token)
	}

	fn install_handlers(&self, token: &CancellationToken) -> Vec<(String, RegistrationId)> {
		let sub = &self.subscription;

		let (shared, live) = (Arc::downgrade(&self.shared), token.clone());
		let on_new = self.channels.on(&sub.channel, &sub.new_record_event, move |args| {
			let event = SyncEvent::<R>::decode_new(args).map_err(HandlerError::new)?;
			deliver(&shared, &live, event);
			Ok(())
		});

		let (shared, live) = (Arc::downgrade(&self.shared), token.clone());
		let on_update = self.channels.on(&sub.channel, &sub.update_event, move |args| {
			let event = SyncEvent::<R>::decode_update(args).map_err(HandlerError::new)?;
			deliver(&shared, &live, event);
			Ok(())
		});

		vec![(sub.new_record_event.clone(), on_new), (sub.update_event.clone(), on_update)]
	}

	/// Marks the collection disposed and removes its handlers.
	///
	/// Returns whether a channel reference must be released, or `None` when
	/// already disposed.
	fn dispose(&self) -> Option<bool> {
		let (registrations, release) = {
			let mut state = self.shared.state.lock();
			if state.phase == Phase::Disposed {
				return None;
			}
			if let Some(token) = state.token.take() {
				token.cancel();
			}
			state.phase = Phase::Disposed;
			self.shared.publish(&state);
			(std::mem::take(&mut state.registrations), std::mem::take(&mut state.holds_channel))
		};
		for (event, id) in registrations {
			self.channels.handlers().off_registration(&self.subscription.channel, &event, id);
		}
		Some(release)
	}

	async fn release_channel(&self) {
		if let Err(err) = self.channels.disconnect(&self.subscription.channel).await {
			warn!(target: "kettle::sync", channel = %self.subscription.channel, error = %err, "Channel release failed");
		}
	}
}

fn deliver<R: Record>(shared: &Weak<Shared<R>>, token: &CancellationToken, event: SyncEvent<R>) {
	if let Some(shared) = shared.upgrade() {
		shared.apply(token, event);
	}
}

impl<R: Record> Drop for LiveCollection<R> {
	fn drop(&mut self) {
		if let Some(true) = self.dispose() {
			let channels = self.channels.clone();
			let channel = self.subscription.channel.clone();
			kettle_worker::spawn(TaskClass::Lifecycle, async move {
				if let Err(err) = channels.disconnect(&channel).await {
					warn!(target: "kettle::sync", channel = %channel, error = %err, "Channel release on drop failed");
				}
			});
		}
	}
}
