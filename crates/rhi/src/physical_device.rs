//! Physical device (GPU) selection.
//!
//! Enumerates available GPUs, filters by the queue families and features the
//! engine needs, and picks the highest-scoring candidate (discrete GPUs
//! preferred).

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue family indices the engine submits to.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilyIndices {
    /// Queue family supporting graphics operations.
    pub graphics: Option<u32>,
    /// Queue family supporting presentation to the target surface.
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both required families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Unique family indices, for device queue creation.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics {
            families.push(graphics);
        }
        if let Some(present) = self.present {
            if !families.contains(&present) {
                families.push(present);
            }
        }
        families
    }
}

/// Everything the device layer needs to know about the selected GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version).
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory properties (heap sizes, memory types).
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue families the engine will use.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Total size of device-local memory heaps in bytes.
    ///
    /// This is the budget the memory allocator reports usage against.
    pub fn device_local_bytes(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable GPU for the given surface.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device supports both a graphics
/// queue and presentation to `surface`.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    let mut best: Option<(PhysicalDeviceInfo, u32)> = None;
    for device in devices {
        let Some(info) = suitability(instance, device, surface, surface_loader)? else {
            continue;
        };
        let score = rate(&info);
        debug!("GPU candidate '{}' scored {}", info.device_name(), score);
        if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
            best = Some((info, score));
        }
    }

    let (info, score) = best.ok_or(RhiError::NoSuitableGpu)?;
    info!("Selected GPU '{}' (score {})", info.device_name(), score);
    Ok(info)
}

/// Returns device info if the device meets all requirements.
fn suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<Option<PhysicalDeviceInfo>> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

    let queue_families = find_queue_families(instance, device, surface, surface_loader)?;
    if !queue_families.is_complete() {
        return Ok(None);
    }

    // Swapchain support is required; extension presence is the cheap proxy.
    let extensions = unsafe { instance.enumerate_device_extension_properties(device)? };
    let has_swapchain = extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == ash::khr::swapchain::NAME
    });
    if !has_swapchain {
        return Ok(None);
    }

    Ok(Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    }))
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<QueueFamilyIndices> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut indices = QueueFamilyIndices::default();
    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }

        if indices.present.is_none() {
            let supported = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)?
            };
            if supported {
                indices.present = Some(index);
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Rates a device; higher is better. Discrete GPUs win, device-local memory
/// breaks ties.
fn rate(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 10,
    };
    // One point per GiB of device-local memory.
    score += (info.device_local_bytes() >> 30) as u32;
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_families_deduplicates() {
        let same = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
        };
        assert_eq!(same.unique_families(), vec![0]);

        let distinct = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(2),
        };
        assert_eq!(distinct.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_is_complete() {
        let mut indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        indices.graphics = Some(0);
        assert!(!indices.is_complete());
        indices.present = Some(1);
        assert!(indices.is_complete());
    }
}
