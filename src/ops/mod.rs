//! High-level operations.
//!
//! This module contains the implementation of berth commands and the
//! long-lived service a host embeds.

pub mod berth_build;
pub mod berth_init;
pub mod berth_lib;
pub mod berth_status;
pub mod service;

pub use berth_build::{build, build_with, clean, BuildOptions, CleanResult};
pub use berth_init::{default_config, init_layout, InitResult};
pub use berth_lib::{add_library, list_libraries, open_manager, remove_library, LibraryListing};
pub use berth_status::{format_status, status, StatusSummary};
pub use service::{recover_layout, Service};
