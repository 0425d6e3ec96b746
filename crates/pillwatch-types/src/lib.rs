//! Shared domain types for the Pillwatch project.

pub mod config;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod status;

mod errors;

pub use errors::{PillwatchError, Result};
