use std::collections::VecDeque;

use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::json;

use super::*;
use crate::record::{EquipmentLog, RecordId};

struct Scripted {
	replies: Mutex<VecDeque<Result<Value, FetchError>>>,
}

impl Scripted {
	fn new(replies: impl IntoIterator<Item = Result<Value, FetchError>>) -> Arc<Self> {
		Arc::new(Self {
			replies: Mutex::new(replies.into_iter().collect()),
		})
	}
}

#[async_trait]
impl SnapshotSource for Scripted {
	async fn fetch(&self) -> Result<Value, FetchError> {
		self.replies.lock().pop_front().unwrap_or_else(|| Ok(json!([])))
	}
}

/// Never answers.
struct Hanging;

#[async_trait]
impl SnapshotSource for Hanging {
	async fn fetch(&self) -> Result<Value, FetchError> {
		std::future::pending().await
	}
}

fn item(id: i64) -> Value {
	json!({ "id": id, "equipmentName": "Burner", "status": "Pending" })
}

#[rstest]
#[case::bare_array(json!([item(1), item(2)]))]
#[case::wrapped(json!({ "data": [item(1), item(2)] }))]
#[case::wrapped_success(json!({ "success": true, "data": [item(1), item(2)] }))]
fn accepted_shapes(#[case] body: Value) {
	let (records, skipped) = decode_body::<EquipmentLog>(body).unwrap();
	assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![RecordId(1), RecordId(2)]);
	assert_eq!(skipped, 0);
}

#[rstest]
#[case::unsuccessful(json!({ "success": false, "message": "no access" }), FetchError::Rejected("no access".into()))]
#[case::unsuccessful_silent(json!({ "success": false }), FetchError::Rejected("request was not successful".into()))]
#[case::data_not_array(json!({ "data": { "id": 1 } }), FetchError::Malformed("`data` is not an array".into()))]
#[case::no_data(json!({ "items": [] }), FetchError::Malformed("object without `data`".into()))]
#[case::scalar(json!("oops"), FetchError::Malformed("unexpected string".into()))]
fn rejected_shapes(#[case] body: Value, #[case] expected: FetchError) {
	assert_eq!(decode_body::<EquipmentLog>(body).unwrap_err(), expected);
}

#[test]
fn bad_items_are_skipped() {
	let (records, skipped) = decode_body::<EquipmentLog>(json!([item(1), { "id": "x" }, item(3)])).unwrap();
	assert_eq!(records.len(), 2);
	assert_eq!(skipped, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn failure_is_fail_open_and_recorded() {
	let fetcher = SnapshotFetcher::<EquipmentLog>::new(Scripted::new([Err(FetchError::Status(503)), Ok(json!([item(4)]))]));

	let failed = fetcher.fetch_all().await;
	assert!(failed.records.is_empty());
	assert_eq!(failed.error, Some(FetchError::Status(503)));
	assert_eq!(fetcher.last_error(), Some(FetchError::Status(503)));

	let loaded = fetcher.fetch_all().await;
	assert_eq!(loaded.records.len(), 1);
	assert_eq!(loaded.error, None);
	assert_eq!(fetcher.last_error(), None);
}

#[tokio::test(flavor = "current_thread")]
async fn cancelled_fetch_returns_none() {
	let fetcher = SnapshotFetcher::<EquipmentLog>::new(Arc::new(Hanging));
	let cancel = CancellationToken::new();

	let fetch = fetcher.fetch_all_with(&cancel);
	cancel.cancel();
	assert_eq!(fetch.await, None);
	assert_eq!(fetcher.last_error(), None);
}

#[tokio::test(flavor = "current_thread")]
async fn uncancelled_fetch_completes() {
	let fetcher = SnapshotFetcher::<EquipmentLog>::new(Scripted::new([Ok(json!({ "data": [item(9)] }))]));
	let snapshot = fetcher.fetch_all_with(&CancellationToken::new()).await.unwrap();
	assert_eq!(snapshot.records[0].id, RecordId(9));
}
