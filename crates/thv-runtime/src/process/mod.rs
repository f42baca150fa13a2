//! Child-process workloads.

mod handle;
mod runtime;

pub use handle::ProcessHandle;
pub use runtime::ProcessRuntime;
