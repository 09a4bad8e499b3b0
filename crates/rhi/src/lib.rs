//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate,
//! scoped to what the frame-scheduling engine needs:
//! - Instance, surface, and device creation
//! - Swapchain management with recreation support
//! - Per-frame-slot command buffers and synchronization primitives
//! - A per-frame-slot descriptor allocator with bulk reset
//! - An arena-style GPU memory allocator with generation-indexed handles
//! - Shader modules and pipelines that survive hot reload

mod error;

pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
