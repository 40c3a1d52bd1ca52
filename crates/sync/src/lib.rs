//! Live collections kept in sync from two sources.
//!
//! A [`LiveCollection`] loads an authoritative snapshot through a
//! [`SnapshotFetcher`], then follows incremental push events from a
//! [`kettle_hub::ChannelManager`] channel. Events are decoded into
//! [`SyncEvent`]s at the boundary and applied by the [`Reconciler`]:
//! insert-if-absent for new records, shallow merge for updates.
//!
//! Snapshot failures are fail-open: the collection stays empty and the error is
//! surfaced in [`SyncView::error`]. Push is best effort and never blocks the
//! collection from becoming ready.

#![warn(missing_docs)]

pub mod config;
pub mod controller;
pub mod event;
pub mod reconciler;
pub mod record;
pub mod snapshot;

pub use config::{ConfigError, SessionConfig, SyncConfig};
pub use controller::{LiveCollection, Phase, Subscription, SyncView};
pub use event::{EventError, SyncEvent};
pub use reconciler::{Applied, Reconciler};
pub use record::{EquipmentLog, FailureStatus, MergeError, Record, RecordId};
pub use snapshot::{FetchError, HttpSnapshotSource, Snapshot, SnapshotFetcher, SnapshotSource};
