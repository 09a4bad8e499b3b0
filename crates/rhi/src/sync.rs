//! Synchronization primitives.
//!
//! - [`Semaphore`] - GPU-to-GPU ordering between queue operations
//! - [`Fence`] - GPU-to-CPU completion signalling, with a bounded wait
//! - [`FrameSync`] - the per-frame-slot trio the scheduler owns
//!
//! The fence wait inside `begin_frame` is the renderer's only blocking
//! operation; its bound comes from `RendererConfig::fence_timeout`, and
//! exceeding that bound is treated as fatal by the caller.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Vulkan semaphore wrapper.
///
/// Used to order swapchain acquisition before rendering and rendering
/// before presentation.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    /// Returns the raw semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Vulkan fence wrapper.
///
/// Signaled by the GPU when a submission retires; the CPU waits on it
/// before reusing that frame slot's resources.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// Frame-slot fences are created signaled so the first wait on a slot
    /// that has never been submitted to returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        Ok(Self { device, fence })
    }

    /// Returns the raw fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits for the fence, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`] if the bound is exceeded - the
    /// caller decides that this is fatal; this function never retries.
    /// Other wait failures (device lost) are returned as-is.
    pub fn wait(&self, timeout: Duration) -> RhiResult<()> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let fences = [self.fence];
        let result = unsafe { self.device.handle().wait_for_fences(&fences, true, timeout_ns) };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                debug!("Fence wait exceeded {:?}", timeout);
                Err(RhiError::FenceTimeout(timeout))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }

    /// Non-blocking signal check.
    pub fn is_signaled(&self) -> bool {
        let result = unsafe { self.device.handle().get_fence_status(self.fence) };
        matches!(result, Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Per-frame-slot synchronization primitives.
///
/// ```text
/// 1. Wait in_flight fence   (CPU waits for the slot's previous submission)
/// 2. Acquire image          (signals image_available)
/// 3. Submit commands        (waits image_available, signals render_finished
///                            and the in_flight fence)
/// 4. Present                (waits render_finished)
/// ```
pub struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// Creates the trio for one frame slot. The fence starts signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if any primitive creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        // Signaled so the first frame on this slot does not block forever.
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Semaphore signaled when the acquired swapchain image is ready.
    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    /// Semaphore signaled when the slot's rendering completes.
    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    /// Fence proving the slot's previous submission has retired.
    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }

    /// Replaces both semaphores with fresh ones.
    ///
    /// Called after swapchain recreation, when a signaled-but-unconsumed
    /// acquire semaphore would otherwise leak into the next cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn reset_semaphores(&mut self, device: Arc<Device>) -> RhiResult<()> {
        self.image_available = Semaphore::new(device.clone())?;
        self.render_finished = Semaphore::new(device)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }
}
