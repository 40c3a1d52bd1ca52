use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

use crate::TaskClass;

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("kettle-worker-global")
			.build()
			.expect("failed to build kettle-worker global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task tagged with a [`TaskClass`].
///
/// Uses the ambient runtime when called from inside one, otherwise a small
/// process-wide fallback runtime.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	runtime_handle().spawn(fut)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn spawn_runs_on_ambient_runtime() {
		let value = spawn(TaskClass::Lifecycle, async { 21 * 2 }).await.unwrap();
		assert_eq!(value, 42);
	}

	#[test]
	fn spawn_without_runtime_uses_fallback() {
		let handle = spawn(TaskClass::Io, async { "done" });
		let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
		assert_eq!(rt.block_on(handle).unwrap(), "done");
	}
}
