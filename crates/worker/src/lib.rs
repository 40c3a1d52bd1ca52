//! Shared task primitives for kettle crates.
//!
//! * [`spawn`]: runs a future on the ambient tokio runtime, tagged with a [`TaskClass`]
//! * [`panic_message`]: extracts a readable message from a caught panic payload

mod class;
mod panic;
mod spawn;

pub use class::TaskClass;
pub use panic::panic_message;
pub use spawn::spawn;
