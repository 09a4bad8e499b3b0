//! Core utilities for the Ember renderer.
//!
//! This crate provides foundational types used across the renderer:
//! - Error types and result aliases
//! - Logging initialization
//! - Renderer configuration (frames in flight, vsync, descriptor pool sizing)
//! - The fatal-failure helper used for unrecoverable driver states

mod config;
mod error;
mod logging;

pub use config::{
    BackendKind, DescriptorKind, DescriptorPoolSizes, RendererConfig, DEFAULT_FRAMES_IN_FLIGHT,
};
pub use error::{fatal, Error, Result};
pub use logging::init_logging;
