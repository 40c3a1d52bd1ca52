//! Applies snapshots and push events onto an in-memory collection.
//!
//! Every mutation that changes the collection swaps in a fresh `Arc<[R]>` and
//! bumps the revision, so readers holding an older reference never observe a
//! partial change.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::event::SyncEvent;
use crate::record::{Record, RecordId};

/// Result of applying one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
	/// A new record was appended.
	Inserted,
	/// A record with that identity already existed; nothing changed.
	Duplicate,
	/// An existing record was merged.
	Updated,
	/// No record has that identity; nothing changed.
	UnknownIdentity,
	/// The merged fields did not form a valid record; nothing changed.
	Rejected,
	/// The whole collection was replaced with this many records.
	Replaced(usize),
	/// The owning consumer is disposed; nothing was applied.
	Stale,
}

impl Applied {
	/// Whether the collection changed.
	pub const fn changed(self) -> bool {
		matches!(self, Self::Inserted | Self::Updated | Self::Replaced(_))
	}
}

/// Owns one collection and applies changes in call order.
#[derive(Debug, Clone)]
pub struct Reconciler<R> {
	records: Arc<[R]>,
	revision: u64,
}

impl<R> Default for Reconciler<R> {
	fn default() -> Self {
		Self {
			records: Arc::from(Vec::new()),
			revision: 0,
		}
	}
}

impl<R: Record> Reconciler<R> {
	/// Creates an empty collection.
	pub fn new() -> Self {
		Self::default()
	}

	/// Current collection.
	pub fn records(&self) -> Arc<[R]> {
		self.records.clone()
	}

	/// Number of changes applied so far.
	pub fn revision(&self) -> u64 {
		self.revision
	}

	/// Number of records.
	pub fn len(&self) -> usize {
		self.records.len()
	}

	/// Whether the collection is empty.
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Record with identity `id`.
	pub fn get(&self, id: RecordId) -> Option<&R> {
		self.records.iter().find(|record| record.id() == id)
	}

	/// Replaces the whole collection. Later duplicates of an identity are dropped.
	pub fn replace_all(&mut self, records: Vec<R>) -> Applied {
		let mut seen = HashSet::with_capacity(records.len());
		let total = records.len();
		let unique: Vec<R> = records.into_iter().filter(|record| seen.insert(record.id())).collect();
		if unique.len() != total {
			warn!(target: "kettle::sync", dropped = total - unique.len(), "Snapshot contained duplicate identities");
		}
		let count = unique.len();
		self.swap(unique);
		Applied::Replaced(count)
	}

	/// Appends `record` unless its identity is already present.
	pub fn apply_new_record(&mut self, record: R) -> Applied {
		let id = record.id();
		if self.get(id).is_some() {
			debug!(target: "kettle::sync", %id, "Ignoring duplicate record");
			return Applied::Duplicate;
		}
		let mut next = Vec::with_capacity(self.records.len() + 1);
		next.extend_from_slice(&self.records);
		next.push(record);
		self.swap(next);
		Applied::Inserted
	}

	/// Shallow-merges `fields` into the record with identity `id`.
	pub fn apply_update(&mut self, id: RecordId, fields: &Map<String, Value>) -> Applied {
		let Some(index) = self.records.iter().position(|record| record.id() == id) else {
			debug!(target: "kettle::sync", %id, "Update for unknown record discarded");
			return Applied::UnknownIdentity;
		};
		let merged = match self.records[index].merged(fields) {
			Ok(merged) => merged,
			Err(err) => {
				warn!(target: "kettle::sync", %id, error = %err, "Rejected update");
				return Applied::Rejected;
			}
		};
		let mut next = self.records.to_vec();
		next[index] = merged;
		self.swap(next);
		Applied::Updated
	}

	/// Applies a decoded push event.
	pub fn apply(&mut self, event: SyncEvent<R>) -> Applied {
		match event {
			SyncEvent::New(record) => self.apply_new_record(record),
			SyncEvent::Update { id, fields } => self.apply_update(id, &fields),
		}
	}

	fn swap(&mut self, records: Vec<R>) {
		self.records = records.into();
		self.revision += 1;
	}
}

#[cfg(test)]
mod tests;
