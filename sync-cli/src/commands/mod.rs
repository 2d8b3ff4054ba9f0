//! CLI command implementations.

pub mod home;
pub mod init;
pub mod status;
pub mod sync;
pub mod todo;
