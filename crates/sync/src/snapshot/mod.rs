//! Authoritative full-collection reads.
//!
//! A [`SnapshotSource`] returns the raw JSON body; [`SnapshotFetcher`]
//! normalizes it into records. Fetching is fail-open: every failure becomes an
//! empty [`Snapshot`] carrying the error, never an `Err` to the caller.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::record::Record;

mod http;

pub use http::HttpSnapshotSource;

/// Why a snapshot could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
	/// The request never produced a response.
	#[error("request failed: {0}")]
	Transport(String),
	/// The request exceeded its deadline.
	#[error("request timed out")]
	Timeout,
	/// The server answered with a non-success status.
	#[error("server returned status {0}")]
	Status(u16),
	/// The server answered `{ "success": false }`.
	#[error("server reported failure: {0}")]
	Rejected(String),
	/// The body is neither an array nor an object with a `data` array.
	#[error("malformed snapshot body: {0}")]
	Malformed(String),
}

/// Produces the raw snapshot body.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
	/// Performs one read.
	async fn fetch(&self) -> Result<Value, FetchError>;
}

/// Outcome of one fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<R> {
	/// Decoded records; empty on failure.
	pub records: Vec<R>,
	/// Failure, if any.
	pub error: Option<FetchError>,
	/// Array elements that did not decode and were skipped.
	pub skipped: usize,
}

impl<R> Snapshot<R> {
	fn failed(error: FetchError) -> Self {
		Self {
			records: Vec::new(),
			error: Some(error),
			skipped: 0,
		}
	}
}

/// Loads snapshots from a [`SnapshotSource`].
pub struct SnapshotFetcher<R> {
	source: Arc<dyn SnapshotSource>,
	last_error: Mutex<Option<FetchError>>,
	_record: PhantomData<fn() -> R>,
}

impl<R: Record> SnapshotFetcher<R> {
	/// Creates a fetcher reading from `source`.
	pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
		Self {
			source,
			last_error: Mutex::new(None),
			_record: PhantomData,
		}
	}

	/// Reads the full collection.
	pub async fn fetch_all(&self) -> Snapshot<R> {
		let snapshot = match self.source.fetch().await {
			Ok(body) => match decode_body(body) {
				Ok((records, skipped)) => Snapshot {
					records,
					error: None,
					skipped,
				},
				Err(err) => Snapshot::failed(err),
			},
			Err(err) => Snapshot::failed(err),
		};
		match &snapshot.error {
			Some(err) => warn!(target: "kettle::sync", error = %err, "Snapshot fetch failed"),
			None => debug!(target: "kettle::sync", records = snapshot.records.len(), skipped = snapshot.skipped, "Snapshot loaded"),
		}
		*self.last_error.lock() = snapshot.error.clone();
		snapshot
	}

	/// Reads the full collection unless `cancel` fires first.
	///
	/// Returns `None` when cancelled; [`Self::last_error`] is left untouched.
	pub async fn fetch_all_with(&self, cancel: &CancellationToken) -> Option<Snapshot<R>> {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				debug!(target: "kettle::sync", "Snapshot fetch cancelled");
				None
			}
			snapshot = self.fetch_all() => Some(snapshot),
		}
	}

	/// Most recent failure, cleared by the next successful fetch.
	pub fn last_error(&self) -> Option<FetchError> {
		self.last_error.lock().clone()
	}
}

/// Normalizes a snapshot body into records.
///
/// Returns the decoded records and the count of elements skipped because they
/// did not decode as `R`.
pub fn decode_body<R: Record>(body: Value) -> Result<(Vec<R>, usize), FetchError> {
	let items = match body {
		Value::Array(items) => items,
		Value::Object(mut object) => {
			if object.get("success").and_then(Value::as_bool) == Some(false) {
				let message = object
					.get("message")
					.and_then(Value::as_str)
					.unwrap_or("request was not successful");
				return Err(FetchError::Rejected(message.to_string()));
			}
			match object.remove("data") {
				Some(Value::Array(items)) => items,
				Some(_) => return Err(FetchError::Malformed("`data` is not an array".into())),
				None => return Err(FetchError::Malformed("object without `data`".into())),
			}
		}
		other => return Err(FetchError::Malformed(format!("unexpected {}", kind(&other)))),
	};

	let mut skipped = 0;
	let records = items
		.into_iter()
		.enumerate()
		.filter_map(|(index, item)| match serde_json::from_value::<R>(item) {
			Ok(record) => Some(record),
			Err(err) => {
				warn!(target: "kettle::sync", index, error = %err, "Skipping undecodable snapshot item");
				skipped += 1;
				None
			}
		})
		.collect();
	Ok((records, skipped))
}

fn kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

#[cfg(test)]
mod tests;
