//! # RecallForge Common Library
//!
//! Shared code for the RecallForge crates:
//! - Error type
//! - Bootstrap configuration and root folder resolution
//! - Source status state machine
//! - Event types and broadcast bus
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod status;
pub mod time;

pub use error::{Error, Result};
pub use status::SourceStatus;
