//! Command implementations

pub mod build;
pub mod clean;
pub mod completions;
pub mod init;
pub mod lib;
pub mod request;
pub mod status;
pub mod watch;
