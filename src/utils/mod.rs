pub mod config;
pub mod logging;
pub mod privilege;
pub mod progress;

pub use progress::{Progress, TransferProgress};
