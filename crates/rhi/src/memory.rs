//! GPU memory arena.
//!
//! All buffer and image allocations flow through [`GpuMemory`], which pairs
//! gpu-allocator suballocation with a generational arena of allocation
//! records. Callers hold [`ResourceId`] keys, never raw Vulkan handles plus
//! memory; freeing through a stale key is a logged no-op rather than a
//! double-free.
//!
//! The arena keeps a live-byte ledger so the frame layer can report memory
//! pressure against the device-local budget.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use slotmap::SlotMap;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

slotmap::new_key_type! {
    /// Generational handle to an allocation record.
    ///
    /// The generation is embedded in the key: a key survives as a value type
    /// after its record is freed, but no longer resolves.
    pub struct ResourceId;
}

/// Buffer usage class, mapped to Vulkan usage flags and a memory location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Storage,
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::CpuToGpu,
            BufferUsage::Uniform => MemoryLocation::CpuToGpu,
            BufferUsage::Storage => MemoryLocation::GpuOnly,
            BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Description of a 2D image allocation.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// The Vulkan object backing an allocation record.
enum Backing {
    Buffer(vk::Buffer),
    Image {
        image: vk::Image,
        view: vk::ImageView,
    },
}

struct Record {
    backing: Backing,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

/// Point-in-time view of the arena's ledger against the device budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes currently held by live allocations.
    pub live_bytes: u64,
    /// Total device-local heap size reported by the adapter.
    pub budget_bytes: u64,
    /// Number of live allocation records.
    pub live_allocations: usize,
}

/// Arena of GPU allocations with generational keys and a live-byte ledger.
///
/// Interior mutation of the gpu-allocator instance goes through the
/// device's mutex, so [`GpuMemory`] itself only needs `&mut self` for the
/// record table.
pub struct GpuMemory {
    device: Arc<Device>,
    records: SlotMap<ResourceId, Record>,
    live_bytes: u64,
}

impl GpuMemory {
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            records: SlotMap::with_key(),
            live_bytes: 0,
        }
    }

    /// Allocates a buffer and registers it in the arena.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or buffer/memory creation fails.
    pub fn allocate_buffer(
        &mut self,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<(ResourceId, vk::Buffer)> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = self.device.allocator().lock().unwrap();
            allocator.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            self.device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        let charged = allocation.size();
        let id = self.records.insert(Record {
            backing: Backing::Buffer(buffer),
            allocation: Some(allocation),
            size: charged,
        });
        self.live_bytes += charged;

        debug!(
            "Allocated {} buffer: {} bytes ({} live)",
            usage.name(),
            charged,
            self.live_bytes
        );
        Ok((id, buffer))
    }

    /// Allocates a 2D image with a matching view and registers it.
    ///
    /// # Errors
    ///
    /// Returns an error if image, memory, or view creation fails.
    pub fn allocate_image(
        &mut self,
        desc: &ImageDesc,
    ) -> RhiResult<(ResourceId, vk::Image, vk::ImageView)> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { self.device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { self.device.handle().get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = self.device.allocator().lock().unwrap();
            allocator.allocate(&AllocationCreateDesc {
                name: "image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            self.device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = unsafe { self.device.handle().create_image_view(&view_info, None)? };

        let charged = allocation.size();
        let id = self.records.insert(Record {
            backing: Backing::Image { image, view },
            allocation: Some(allocation),
            size: charged,
        });
        self.live_bytes += charged;

        debug!(
            "Allocated {}x{} image {:?}: {} bytes ({} live)",
            desc.width, desc.height, desc.format, charged, self.live_bytes
        );
        Ok((id, image, view))
    }

    /// Writes `data` into a CPU-visible allocation at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is stale, the allocation is not host
    /// mapped, or the write would run past the end.
    pub fn write(&mut self, id: ResourceId, offset: usize, data: &[u8]) -> RhiResult<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RhiError::InvalidHandle("stale resource key in write".to_string()))?;
        let allocation = record
            .allocation
            .as_mut()
            .ok_or_else(|| RhiError::InvalidHandle("allocation already released".to_string()))?;

        let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
            RhiError::InvalidHandle("allocation is not host visible".to_string())
        })?;
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= mapped.len())
            .ok_or_else(|| RhiError::InvalidHandle("write past end of allocation".to_string()))?;

        mapped[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Frees the record behind `id` and credits the ledger.
    ///
    /// A stale key (already freed, or from a previous arena) is a logged
    /// no-op. Double-free through a reused key cannot happen: the key's
    /// generation no longer matches.
    pub fn free(&mut self, id: ResourceId) {
        let Some(record) = self.records.remove(id) else {
            warn!("Ignoring free of stale resource key {:?}", id);
            return;
        };

        match record.backing {
            Backing::Buffer(buffer) => unsafe {
                self.device.handle().destroy_buffer(buffer, None);
            },
            Backing::Image { image, view } => unsafe {
                self.device.handle().destroy_image_view(view, None);
                self.device.handle().destroy_image(image, None);
            },
        }

        if let Some(allocation) = record.allocation {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                warn!("Allocator free failed: {}", e);
            }
        }

        self.live_bytes = self.live_bytes.saturating_sub(record.size);
        debug!(
            "Freed {} bytes ({} live, {} records)",
            record.size,
            self.live_bytes,
            self.records.len()
        );
    }

    /// Whether `id` still resolves to a live record.
    #[inline]
    pub fn is_live(&self, id: ResourceId) -> bool {
        self.records.contains_key(id)
    }

    /// Returns the current ledger against the device-local budget.
    pub fn usage(&self) -> MemoryUsage {
        MemoryUsage {
            live_bytes: self.live_bytes,
            budget_bytes: self.device.device_local_budget(),
            live_allocations: self.records.len(),
        }
    }
}

impl Drop for GpuMemory {
    fn drop(&mut self) {
        if !self.records.is_empty() {
            warn!(
                "GpuMemory dropped with {} live allocations ({} bytes)",
                self.records.len(),
                self.live_bytes
            );
        }
        let ids: Vec<ResourceId> = self.records.keys().collect();
        for id in ids {
            self.free(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_flags() {
        assert!(BufferUsage::Vertex
            .to_vk_usage()
            .contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(BufferUsage::Staging
            .to_vk_usage()
            .contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert_eq!(BufferUsage::Storage.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Uniform.memory_location(), MemoryLocation::CpuToGpu);
    }

    #[test]
    fn test_stale_key_does_not_resolve() {
        // Keys are generational: a key minted by one arena slot never
        // resolves after removal, even if the slot is reused.
        let mut map: SlotMap<ResourceId, u32> = SlotMap::with_key();
        let key = map.insert(7);
        map.remove(key);
        let reused = map.insert(9);
        assert!(!map.contains_key(key));
        assert!(map.contains_key(reused));
        assert_ne!(key, reused);
    }
}
