//! Utility modules shared across the backplane's stores and pipelines.

pub mod db_retry;
pub mod pool_monitor;
pub mod sha256;

pub use db_retry::retry_on_lock;
pub use pool_monitor::{begin_monitored, MonitoredTransaction};
pub use sha256::hash_file;
