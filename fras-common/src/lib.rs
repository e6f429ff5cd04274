//! # FRAS Common Library
//!
//! Shared code for the face-recognition attendance services:
//! - CSV codec and record/schema types
//! - Student and attendance data model
//! - Error taxonomy
//! - Configuration loading
//! - Event types (FrasEvent enum) and event bus
//! - Storage handles, partition store, student directory

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{Error, Result};
