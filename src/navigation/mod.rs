//! Symbol navigation: location results, rename planning, jump history and
//! the reindex-before-navigate handshake.

pub mod history;
pub mod location;
pub mod state;

pub use history::{HistoryEntry, JumpHistory};
pub use location::{Location, LocationList, RenamePlan};
pub use state::{NavigationFlag, NavigationPayload, NavigationState};
