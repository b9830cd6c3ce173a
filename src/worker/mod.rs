//! Process execution for indexer jobs.
//!
//! # Components
//!
//! - [`ProcessRunner`]: spawns one `rc` process, feeds it input, collects
//!   merged stdout/stderr, enforces a timeout and supports forced termination
//!
//! # Execution Flow
//!
//! 1. The scheduler creates one runner per job
//! 2. [`ProcessRunner::execute`] spawns `<rc> <args...>` and writes the input
//! 3. Output is collected (one-shot) or forwarded line by line (streaming)
//! 4. Returns [`ProcessOutput`] with exit code and output bytes
//!
//! The child is spawned with `kill_on_drop`, so the process is released on
//! every exit path, including a dropped or aborted task.

pub mod executor;

pub use executor::{ProcessOutput, ProcessRunner};
