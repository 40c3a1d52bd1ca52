//! In-process hub that invents equipment failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kettle_hub::LoopbackTransport;
use kettle_sync::{FetchError, SnapshotSource, Subscription};
use kettle_worker::TaskClass;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::debug;

const EQUIPMENT: &[(&str, &str)] = &[
	("Burner 2", "Burner"),
	("Chafing dish", "Warmer"),
	("Urn 40L", "Kettle"),
	("Griddle", "Burner"),
];

const TICK: Duration = Duration::from_secs(2);

/// Snapshot with a couple of open failures.
pub struct DemoSource;

#[async_trait]
impl SnapshotSource for DemoSource {
	async fn fetch(&self) -> Result<Value, FetchError> {
		Ok(json!({
			"success": true,
			"data": [
				{ "id": 1, "equipmentName": "Urn 20L", "equipmentType": "Kettle", "issueDescription": "Thermostat stuck", "status": "InProgress" },
				{ "id": 2, "equipmentName": "Gas ring", "equipmentType": "Burner", "issueDescription": "Igniter dead", "status": "Pending" },
			],
		}))
	}
}

/// Emits a new failure every tick and resolves the one reported two ticks earlier.
pub fn spawn_emitter(transport: Arc<LoopbackTransport>, subscription: Subscription) -> JoinHandle<()> {
	kettle_worker::spawn(TaskClass::Io, async move {
		let mut ticker = tokio::time::interval(TICK);
		ticker.tick().await;
		for id in 3_i64.. {
			ticker.tick().await;
			let (name, kind) = EQUIPMENT[id as usize % EQUIPMENT.len()];
			let record = json!({
				"id": id,
				"equipmentName": name,
				"equipmentType": kind,
				"issueDescription": "Reported by demo hub",
				"status": "Pending",
			});
			let reached = transport.emit(&subscription.channel, &subscription.new_record_event, vec![record]);
			debug!(id, reached, "Demo failure reported");

			if id > 4 {
				transport.emit(
					&subscription.channel,
					&subscription.update_event,
					vec![json!(id - 2), json!("Resolved"), json!("Fixed on site")],
				);
			}
		}
	})
}
