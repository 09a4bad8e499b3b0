//! Frame scheduling and GPU resource lifecycle for the Ember renderer.
//!
//! This crate owns the per-frame machinery:
//! - A deferred command queue drained once per frame on the render thread
//! - Per-slot release queues that destroy resources one full frame cycle
//!   after the request, proven safe by the slot fence
//! - The frame slot state machine and swapchain present loop
//! - The shader dependency registry with macro fan-out and hot reload
//! - The [`GpuBackend`] trait with its Vulkan implementation, and the
//!   [`Renderer`] facade over all of it

pub mod backend;
mod error;
pub mod frame;
pub mod queue;
pub mod registry;
pub mod release;
pub mod renderer;
pub mod vulkan;
pub mod watcher;

pub use backend::{AcquireOutcome, GpuBackend, PresentOutcome};
pub use error::{EngineError, EngineResult};
pub use queue::DeferredCommandQueue;
pub use registry::{ShaderDependent, ShaderId, ShaderRegistry};
pub use release::ReleaseRing;
pub use renderer::Renderer;
pub use vulkan::VulkanBackend;

pub use ember_core::{BackendKind, RendererConfig};
pub use ember_rhi::shader::ShaderStage;
