/// Execution classes used for task tagging and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Long-lived loops draining ordered inbound event streams.
	Pump,
	/// Transport reads and writes.
	Io,
	/// Consumer activation sequences (snapshot fetch, channel connect).
	Lifecycle,
}

impl TaskClass {
	/// Stable name used in log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pump => "pump",
			Self::Io => "io",
			Self::Lifecycle => "lifecycle",
		}
	}
}
