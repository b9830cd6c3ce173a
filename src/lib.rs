pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod navigation;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod stream;
pub mod worker;

pub use config::IndexerConfig;
pub use error::{BridgeError, JobError, Result};
pub use session::Session;
