//! # backplane-common
//!
//! Shared types for the media processing backplane:
//! - Common error type and result alias
//! - Structured, classified processor errors (download/processing/not-found/system/invalid-payload)
//! - Configuration loading (CLI > env > TOML > default)
//! - The SSE event bus and event envelope
//! - Small timestamp/UUID helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod structured_error;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use events::{BackplaneEvent, EventBus};
pub use structured_error::{ErrorKind, StructuredError};
