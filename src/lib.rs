//! Backup and restore of self-hosted application state.
//!
//! Known state directories are copied into timestamped staging directories,
//! optionally packed into compressed archives, and restored later either by
//! extracting an archive or by syncing a staged directory back with rsync.

pub mod backup;
pub mod cli;
pub mod error;
pub mod utils;

pub use error::{RescueError, Result};
