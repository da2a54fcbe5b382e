//! Vidconvert - MP4 video conversion through a hardware-codec style pipeline
//!
//! This library crate exposes the core functionality for integration testing.

pub mod codec;
pub mod config;
pub mod conversion;
pub mod pipeline;
pub mod planner;
pub mod probe;
pub mod quirks;
pub mod state;
