//! Vulkan logical device and queue management.
//!
//! Handles VkDevice creation, graphics/present queue retrieval, and
//! gpu-allocator initialization. The device is the hub every other RHI
//! object holds an `Arc` to.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Device extensions the engine requires.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] =
    &[ash::khr::swapchain::NAME, ash::khr::dynamic_rendering::NAME];

/// Vulkan logical device wrapper.
///
/// Shared across the renderer via `Arc`. The gpu-allocator instance lives
/// behind a `Mutex` so deferred-destroy thunks can free memory from the
/// drain point without holding `&mut Device`.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    allocator: Mutex<Allocator>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    /// Total device-local heap bytes, captured at creation for budget queries.
    device_local_budget: u64,
}

impl Device {
    /// Creates the logical device for the selected GPU.
    ///
    /// Enables the swapchain and dynamic-rendering extensions plus the
    /// Vulkan 1.3 dynamic rendering / synchronization2 features the frame
    /// engine records against.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization fails.
    pub fn new(instance: &Instance, info: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let queue_families = info.queue_families;
        let unique_families = queue_families.unique_families();
        let priorities = [1.0f32];

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        debug!("Creating device queues for families {:?}", unique_families);

        let mut features_1_2 =
            vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extension_names: Vec<*const i8> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(info.device, &create_info, None)?
        };

        let graphics_family = queue_families
            .graphics
            .ok_or(RhiError::NoSuitableGpu)?;
        let present_family = queue_families.present.ok_or(RhiError::NoSuitableGpu)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: info.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        info!(
            "Logical device created on '{}' ({} device-local GiB)",
            info.device_name(),
            info.device_local_bytes() >> 30
        );

        Ok(Arc::new(Self {
            device,
            physical_device: info.device,
            allocator: Mutex::new(allocator),
            graphics_queue,
            present_queue,
            queue_families,
            device_local_budget: info.device_local_bytes(),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Returns the gpu-allocator instance.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Total device-local memory in bytes, for budget reporting.
    #[inline]
    pub fn device_local_budget(&self) -> u64 {
        self.device_local_budget
    }

    /// Blocks until all queues are idle.
    ///
    /// Used before swapchain recreation and at shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails (device lost).
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// Command buffers must be fully recorded and the fence must not be in
    /// use by a previous submission.
    pub unsafe fn submit_graphics(
        &self,
        submits: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submits, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("wait_idle during device drop failed: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send+Sync, queue/physical-device handles are plain
// Copy handles, and the allocator is Mutex-guarded.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_extensions() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::dynamic_rendering::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
