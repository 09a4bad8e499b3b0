//! GPU backend abstraction.
//!
//! The frame scheduler drives a [`GpuBackend`] through the per-slot
//! operations it needs, without knowing which API sits behind it. Exactly
//! one production implementation exists ([`crate::vulkan::VulkanBackend`]),
//! chosen at startup from `RendererConfig::backend`; tests drive the
//! scheduler with a mock.

use std::path::Path;

use ember_rhi::shader::ShaderStage;

use crate::error::EngineResult;
use crate::registry::ShaderId;

/// Result of acquiring a presentation image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready; its index may differ from the frame slot index.
    Ready { image_index: u32 },
    /// The swapchain was out of date and has been recreated; this frame
    /// should be skipped and retried on the same slot.
    Skipped,
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was handed to the presentation engine.
    Presented,
    /// Presentation succeeded or was dropped, and the swapchain was
    /// recreated for the next frame.
    Recreated,
}

/// Per-frame-slot operations the scheduler needs from a graphics API.
///
/// Slot indices passed in are always in `[0, slot_count)`. Unrecoverable
/// driver states (device lost, fence timeout) must not be returned as
/// errors; implementations terminate through `ember_core::fatal`.
pub trait GpuBackend: Send {
    /// Number of frame slots this backend was built with.
    fn slot_count(&self) -> usize;

    /// Blocks until `slot`'s fence signals, then resets it.
    ///
    /// Proves all GPU work submitted on this slot's previous cycle has
    /// retired. Exceeding the configured timeout is fatal.
    fn wait_slot_fence(&mut self, slot: usize) -> EngineResult<()>;

    /// Bulk-resets `slot`'s descriptor pool.
    fn reset_descriptors(&mut self, slot: usize) -> EngineResult<()>;

    /// Acquires the next presentation image for `slot`.
    ///
    /// Out-of-date surfaces are handled internally (recreate, report
    /// [`AcquireOutcome::Skipped`]); they never surface as errors.
    fn acquire(&mut self, slot: usize) -> EngineResult<AcquireOutcome>;

    /// Begins command recording on `slot`'s command buffer.
    fn begin_recording(&mut self, slot: usize, image_index: u32) -> EngineResult<()>;

    /// Ends command recording on `slot`'s command buffer.
    fn end_recording(&mut self, slot: usize) -> EngineResult<()>;

    /// Submits `slot`'s recorded work, signaling the slot fence.
    fn submit(&mut self, slot: usize) -> EngineResult<()>;

    /// Presents `image_index`, waiting on `slot`'s render-finished
    /// semaphore.
    fn present(&mut self, slot: usize, image_index: u32) -> EngineResult<PresentOutcome>;

    /// Notes the new target surface size, picked up at the next
    /// recreation.
    fn note_resize(&mut self, width: u32, height: u32);

    /// Loads the SPIR-V at `path` as the module backing `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the module cannot
    /// be created.
    fn register_shader_source(
        &mut self,
        id: ShaderId,
        path: &Path,
        stage: ShaderStage,
    ) -> EngineResult<()>;

    /// Reloads the shader registered under `id` from its source.
    ///
    /// # Errors
    ///
    /// Returns an error if the shader is unknown to the backend or the
    /// reload fails; the previous module stays in use.
    fn reload_shader(&mut self, id: ShaderId, name: &str) -> EngineResult<()>;

    /// Blocks until the device is idle. Shutdown path.
    fn wait_idle(&mut self) -> EngineResult<()>;
}
