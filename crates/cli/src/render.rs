use kettle_sync::{EquipmentLog, SyncView};

/// Prints one frame of the collection to stdout.
pub fn print_view(view: &SyncView<EquipmentLog>) {
	println!("{}", header(view));
	for log in view.records.iter() {
		println!("{}", line(log));
	}
}

fn header(view: &SyncView<EquipmentLog>) -> String {
	let open = view.records.iter().filter(|log| log.status.is_open()).count();
	let mut header = format!(
		"-- {} | {} records, {} open | rev {}",
		view.phase,
		view.records.len(),
		open,
		view.revision
	);
	if let Some(error) = &view.error {
		header.push_str(&format!(" | snapshot failed: {error}"));
	}
	header
}

fn line(log: &EquipmentLog) -> String {
	let mut line = format!("#{:<5} {:<10} {}", log.id, log.status, log.equipment_name);
	if !log.issue_description.is_empty() {
		line.push_str(&format!(": {}", log.issue_description));
	}
	if let Some(notes) = &log.resolution_notes {
		line.push_str(&format!(" ({notes})"));
	}
	line
}
