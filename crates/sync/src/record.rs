//! Records tracked by live collections.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Immutable identity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}

/// Why a partial update could not be merged.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
	/// The record does not serialize to a JSON object.
	#[error("record is not a JSON object")]
	NotAnObject,
	/// The merged fields do not form a valid record.
	#[error("merged record is invalid: {0}")]
	Invalid(#[from] serde_json::Error),
	/// The update tried to change the record's identity.
	#[error("update would change identity {from} to {to}")]
	IdentityChanged {
		/// Identity before the merge.
		from: RecordId,
		/// Identity the fields asked for.
		to: RecordId,
	},
}

/// A domain item held in a live collection.
///
/// Records travel as JSON objects. Partial updates are shallow merges of a
/// field map into that object, validated by decoding the result back into
/// `Self`.
pub trait Record: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
	/// Field names carried positionally after the identity in an update event.
	const UPDATE_FIELDS: &'static [&'static str] = &[];

	/// The record's identity.
	fn id(&self) -> RecordId;

	/// Returns a copy of `self` with `fields` shallow-merged in.
	///
	/// Either every field applies or none does.
	fn merged(&self, fields: &Map<String, Value>) -> Result<Self, MergeError> {
		let mut value = serde_json::to_value(self)?;
		let Value::Object(object) = &mut value else {
			return Err(MergeError::NotAnObject);
		};
		for (key, field) in fields {
			object.insert(key.clone(), field.clone());
		}
		let merged: Self = serde_json::from_value(value)?;
		if merged.id() != self.id() {
			return Err(MergeError::IdentityChanged {
				from: self.id(),
				to: merged.id(),
			});
		}
		Ok(merged)
	}
}

/// Lifecycle of a reported equipment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureStatus {
	/// Reported, nobody assigned yet.
	Pending,
	/// A fix is scheduled or underway.
	InProgress,
	/// Fixed.
	Resolved,
	/// Dismissed without a fix.
	Rejected,
}

impl FailureStatus {
	/// Whether the failure still needs attention.
	pub const fn is_open(self) -> bool {
		matches!(self, Self::Pending | Self::InProgress)
	}

	/// Wire name of the status.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "Pending",
			Self::InProgress => "InProgress",
			Self::Resolved => "Resolved",
			Self::Rejected => "Rejected",
		}
	}
}

impl fmt::Display for FailureStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.pad(self.as_str())
	}
}

/// Equipment condition log entry: one reported failure of a rental unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentLog {
	/// Log identity.
	pub id: RecordId,
	/// Equipment the failure was reported for.
	#[serde(alias = "name")]
	pub equipment_name: String,
	/// Equipment category, e.g. `"Burner"`.
	#[serde(default)]
	pub equipment_type: Option<String>,
	/// What went wrong.
	#[serde(default)]
	pub issue_description: String,
	/// Current status.
	pub status: FailureStatus,
	/// Notes left when the failure was resolved or rejected.
	#[serde(default)]
	pub resolution_notes: Option<String>,
	/// Who reported the failure.
	#[serde(default)]
	pub reported_by: Option<String>,
	/// When the failure was reported.
	#[serde(default)]
	pub reported_date: Option<DateTime<Utc>>,
	/// When a fix is scheduled.
	#[serde(default)]
	pub scheduled_fix_date: Option<DateTime<Utc>>,
	/// When the failure was resolved.
	#[serde(default)]
	pub resolution_date: Option<DateTime<Utc>>,
}

impl Record for EquipmentLog {
	const UPDATE_FIELDS: &'static [&'static str] = &["status", "resolutionNotes"];

	fn id(&self) -> RecordId {
		self.id
	}
}

impl EquipmentLog {
	/// A freshly reported failure.
	pub fn reported(id: i64, equipment_name: impl Into<String>, issue_description: impl Into<String>) -> Self {
		Self {
			id: RecordId(id),
			equipment_name: equipment_name.into(),
			equipment_type: None,
			issue_description: issue_description.into(),
			status: FailureStatus::Pending,
			resolution_notes: None,
			reported_by: None,
			reported_date: None,
			scheduled_fix_date: None,
			resolution_date: None,
		}
	}
}
