//! Command pool and command buffer management.
//!
//! Each frame slot owns one [`CommandBuffer`] allocated from a shared
//! [`CommandPool`]; the buffer is reset and re-recorded every time its slot
//! comes around.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan command pool wrapper.
///
/// Created with `RESET_COMMAND_BUFFER` so per-slot buffers can be reset
/// individually. Not thread-safe; the frame engine records from a single
/// thread.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Creates a command pool for the given queue family.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        info!("Command pool created for queue family {}", queue_family);

        Ok(Self {
            device,
            pool,
            queue_family,
        })
    }

    /// Returns the raw pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the queue family this pool submits to.
    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
    }
}

/// Primary command buffer bound to one frame slot.
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates a primary command buffer from `pool`.
    ///
    /// The buffer is freed with the pool; no explicit free path is needed.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { device.handle().allocate_command_buffers(&alloc_info)? };

        Ok(Self {
            device,
            buffer: buffers[0],
        })
    }

    /// Returns the raw command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Resets the buffer, releasing its previous recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    /// Begins a one-time recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the begin fails.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Ends the recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the end fails (invalid recording state).
    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }
}
