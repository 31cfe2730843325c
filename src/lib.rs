//! mp4forge - MP4 inspection and rewriting tool
//!
//! This library crate exposes the command implementations for integration testing.

pub mod config;
pub mod remux;
pub mod report;
