//! Core domain values: the persisted layout and build status.

pub mod layout;
pub mod status;

pub use layout::Layout;
pub use status::{BuildStatus, StatusCell, StatusMarker, StatusReport};
