use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::record::{EquipmentLog, FailureStatus};

fn log(id: i64) -> EquipmentLog {
	EquipmentLog::reported(id, format!("unit-{id}"), "broken")
}

fn ids(reconciler: &Reconciler<EquipmentLog>) -> Vec<i64> {
	reconciler.records().iter().map(|r| r.id.0).collect()
}

fn resolved() -> Map<String, Value> {
	let Value::Object(fields) = json!({ "status": "Resolved", "resolutionNotes": "fixed" }) else {
		unreachable!()
	};
	fields
}

#[test]
fn insert_is_idempotent() {
	let mut reconciler = Reconciler::new();

	assert_eq!(reconciler.apply_new_record(log(5)), Applied::Inserted);
	let before = reconciler.records();
	assert_eq!(reconciler.apply_new_record(log(5)), Applied::Duplicate);

	assert_eq!(ids(&reconciler), vec![5]);
	assert!(Arc::ptr_eq(&before, &reconciler.records()));
	assert_eq!(reconciler.revision(), 1);
}

#[test]
fn insert_appends_in_arrival_order() {
	let mut reconciler = Reconciler::new();
	for id in [3, 1, 2] {
		reconciler.apply_new_record(log(id));
	}
	assert_eq!(ids(&reconciler), vec![3, 1, 2]);
}

#[test]
fn update_applies_only_when_present() {
	let mut reconciler = Reconciler::new();
	reconciler.replace_all(vec![log(1), log(2)]);
	let before = reconciler.records();

	assert_eq!(reconciler.apply_update(RecordId(9), &resolved()), Applied::UnknownIdentity);
	assert!(Arc::ptr_eq(&before, &reconciler.records()));

	assert_eq!(reconciler.apply_update(RecordId(2), &resolved()), Applied::Updated);
	assert!(!Arc::ptr_eq(&before, &reconciler.records()));
	let updated = reconciler.get(RecordId(2)).unwrap();
	assert_eq!(updated.status, FailureStatus::Resolved);
	assert_eq!(updated.resolution_notes.as_deref(), Some("fixed"));
	assert_eq!(reconciler.get(RecordId(1)).unwrap().status, FailureStatus::Pending);
	assert_eq!(before[1].status, FailureStatus::Pending);
}

#[test]
fn positional_null_clears_notes() {
	let mut reconciler = Reconciler::new();
	reconciler.apply_new_record(log(1));
	reconciler.apply_update(RecordId(1), &resolved());

	let reopened = SyncEvent::<EquipmentLog>::decode_update(&[json!(1), json!("InProgress"), Value::Null]).unwrap();
	assert_eq!(reconciler.apply(reopened), Applied::Updated);

	let record = reconciler.get(RecordId(1)).unwrap();
	assert_eq!(record.status, FailureStatus::InProgress);
	assert_eq!(record.resolution_notes, None);
}

#[test]
fn invalid_update_is_rejected_whole() {
	let mut reconciler = Reconciler::new();
	reconciler.apply_new_record(log(1));
	let Value::Object(fields) = json!({ "status": 42, "resolutionNotes": "never applied" }) else {
		unreachable!()
	};

	assert_eq!(reconciler.apply_update(RecordId(1), &fields), Applied::Rejected);
	assert_eq!(reconciler.get(RecordId(1)).unwrap(), &log(1));
}

#[test]
fn last_update_wins() {
	let mut reconciler = Reconciler::new();
	reconciler.apply_new_record(log(1));
	for status in ["InProgress", "Resolved", "Rejected"] {
		reconciler.apply(SyncEvent::Update {
			id: RecordId(1),
			fields: [("status".to_string(), json!(status))].into_iter().collect(),
		});
	}
	assert_eq!(reconciler.get(RecordId(1)).unwrap().status, FailureStatus::Rejected);
}

#[test]
fn replace_keeps_first_duplicate() {
	let mut reconciler = Reconciler::new();
	let mut second = log(1);
	second.issue_description = "second copy".into();

	assert_eq!(reconciler.replace_all(vec![log(1), log(2), second]), Applied::Replaced(2));
	assert_eq!(ids(&reconciler), vec![1, 2]);
	assert_eq!(reconciler.get(RecordId(1)).unwrap().issue_description, "broken");
}

#[test]
fn events_replayed_after_snapshot_converge() {
	let events = || {
		vec![
			SyncEvent::New(log(2)),
			SyncEvent::Update {
				id: RecordId(1),
				fields: resolved(),
			},
		]
	};

	let mut fetch_first = Reconciler::new();
	fetch_first.replace_all(vec![log(1)]);
	events().into_iter().for_each(|event| {
		fetch_first.apply(event);
	});

	let mut events_first = Reconciler::new();
	events().into_iter().for_each(|event| {
		events_first.apply(event);
	});
	events_first.replace_all(vec![log(1)]);
	events().into_iter().for_each(|event| {
		events_first.apply(event);
	});

	assert_eq!(&*fetch_first.records(), &*events_first.records());
	assert_eq!(ids(&fetch_first), vec![1, 2]);
	assert_eq!(fetch_first.get(RecordId(1)).unwrap().status, FailureStatus::Resolved);
}

#[test]
fn changed_flags() {
	assert!(Applied::Inserted.changed());
	assert!(Applied::Updated.changed());
	assert!(Applied::Replaced(0).changed());
	assert!(!Applied::Duplicate.changed());
	assert!(!Applied::UnknownIdentity.changed());
	assert!(!Applied::Rejected.changed());
	assert!(!Applied::Stale.changed());
}
