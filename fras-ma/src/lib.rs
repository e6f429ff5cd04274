//! Mark-attendance service (fras-ma)
//!
//! Runs one attendance session at a time: fetches the roster, consumes
//! recognition events, and submits newly present students to the
//! attendance partitions. Exposes an HTTP control surface with an SSE feed.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;

pub use error::{Error, Result};
