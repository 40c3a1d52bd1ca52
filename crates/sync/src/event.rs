//! Push events decoded from positional hub arguments.

use serde_json::{Map, Value};

use crate::record::{Record, RecordId};

/// Why a push payload could not be decoded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventError {
	/// The event carried no arguments at all.
	#[error("event carries no arguments")]
	MissingArguments,
	/// The new-record payload does not decode as a record.
	#[error("invalid record payload: {0}")]
	InvalidRecord(String),
	/// The update identity is not an integer.
	#[error("identity must be an integer, got {0}")]
	InvalidIdentity(Value),
	/// More positional fields than the record declares.
	#[error("update carries {got} fields, at most {max} expected")]
	TooManyFields {
		/// Positional fields received after the identity.
		got: usize,
		/// Fields declared by the record type.
		max: usize,
	},
	/// The update named no fields.
	#[error("update for record {0} carries no fields")]
	EmptyUpdate(RecordId),
}

/// A decoded push event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent<R> {
	/// A record was created on the server.
	New(R),
	/// Some fields of an existing record changed.
	Update {
		/// Record to merge into.
		id: RecordId,
		/// Changed fields, keyed by wire name.
		fields: Map<String, Value>,
	},
}

impl<R: Record> SyncEvent<R> {
	/// Decodes a new-record event: a single record object.
	pub fn decode_new(args: &[Value]) -> Result<Self, EventError> {
		let payload = args.first().ok_or(EventError::MissingArguments)?;
		let record: R = serde::Deserialize::deserialize(payload).map_err(|err: serde_json::Error| EventError::InvalidRecord(err.to_string()))?;
		Ok(Self::New(record))
	}

	/// Decodes an update event.
	///
	/// Accepts either `[id, field, ..]` with fields in [`Record::UPDATE_FIELDS`]
	/// order, `[id, {fields}]`, or a single object carrying `id` alongside the
	/// changed fields. A positional null clears its field.
	pub fn decode_update(args: &[Value]) -> Result<Self, EventError> {
		let (id, fields) = match args {
			[] => return Err(EventError::MissingArguments),
			[Value::Object(object)] => {
				let mut fields = object.clone();
				let id = fields.remove("id").unwrap_or(Value::Null);
				(parse_id(&id)?, fields)
			}
			[id, Value::Object(object)] => (parse_id(id)?, object.clone()),
			[id, rest @ ..] => {
				let id = parse_id(id)?;
				if rest.len() > R::UPDATE_FIELDS.len() {
					return Err(EventError::TooManyFields {
						got: rest.len(),
						max: R::UPDATE_FIELDS.len(),
					});
				}
				let fields = R::UPDATE_FIELDS
					.iter()
					.zip(rest)
					.map(|(name, value)| ((*name).to_string(), value.clone()))
					.collect();
				(id, fields)
			}
		};
		if fields.is_empty() {
			return Err(EventError::EmptyUpdate(id));
		}
		Ok(Self::Update { id, fields })
	}

	/// Identity the event refers to.
	pub fn id(&self) -> RecordId {
		match self {
			Self::New(record) => record.id(),
			Self::Update { id, .. } => *id,
		}
	}
}

fn parse_id(value: &Value) -> Result<RecordId, EventError> {
	let id = match value {
		Value::Number(n) => n.as_i64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	};
	id.map(RecordId).ok_or_else(|| EventError::InvalidIdentity(value.clone()))
}
