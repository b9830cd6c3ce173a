//! Decoding of the indexer's streaming monitor feed (`rc -m`).
//!
//! The feed is a sequence of top-level XML elements written line by line:
//!
//! ```text
//! <?xml version="1.0" encoding="utf-8"?>
//! <progress index="12" total="12"></progress>
//! <checkstyle>
//!   <file name="/src/main.cpp">
//!     <error line="4" column="9" length="3" severity="warning" message="unused variable"/>
//!   </file>
//! </checkstyle>
//! ```
//!
//! [`StreamDecoder`] turns lines into [`StreamEvent`]s; [`MonitorEvents`]
//! wraps it as a lazy sequence over any async line source.

pub mod decoder;
pub mod event;

pub use decoder::{MonitorEvents, StreamDecoder, CONNECTION_FAILURE_MARKER};
pub use event::StreamEvent;
