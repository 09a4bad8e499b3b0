//! Per-frame-slot descriptor allocation.
//!
//! Transient descriptor sets are carved from one pool per frame slot and
//! reclaimed in a single O(1) bulk reset when the slot comes around again.
//! There is no per-set free path. Capacity is fixed from the configured
//! sizing table; exhausting it is fatal by policy rather than a growth
//! trigger.
//!
//! Handles returned by [`FrameDescriptorAllocator::allocate`] carry the slot
//! index and the slot's generation at allocation time, so a set that
//! survived past its slot's reset is detectable instead of silently
//! dangling.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use ember_core::{fatal, DescriptorKind, DescriptorPoolSizes};

use crate::device::Device;
use crate::error::RhiResult;

/// Descriptor set layout wrapper.
///
/// Immutable after creation; shared via `Arc` where a layout outlives one
/// frame.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    /// Descriptor counts this layout consumes per allocated set, used to
    /// charge the slot ledger.
    demand: Vec<(DescriptorKind, u32)>,
}

impl DescriptorSetLayout {
    /// Creates a descriptor set layout.
    ///
    /// `demand` mirrors `bindings`: the per-kind descriptor counts one set
    /// of this layout consumes from a slot's pool.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
        demand: Vec<(DescriptorKind, u32)>,
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!("Created descriptor set layout ({} bindings)", bindings.len());
        Ok(Self {
            device,
            layout,
            demand,
        })
    }

    /// Returns the raw layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Per-kind descriptor counts one set of this layout consumes.
    #[inline]
    pub fn demand(&self) -> &[(DescriptorKind, u32)] {
        &self.demand
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Handle to a transient descriptor set.
///
/// Becomes stale the moment its slot is bulk-reset; staleness is checked
/// with [`FrameDescriptorAllocator::is_valid`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetHandle {
    set: vk::DescriptorSet,
    slot: usize,
    generation: u64,
}

impl SetHandle {
    /// Returns the raw descriptor set handle.
    #[inline]
    pub fn raw(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Returns the frame slot this set was carved from.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Bookkeeping for one frame slot's pool.
///
/// Pure accounting, kept separate from the Vulkan calls so the overflow
/// policy and generation tracking are testable without a device.
#[derive(Debug)]
pub(crate) struct SlotLedger {
    capacity_sets: u32,
    allocated_sets: u32,
    /// (kind, capacity, allocated) per descriptor kind in the table.
    counts: Vec<(DescriptorKind, u32, u32)>,
    generation: u64,
}

/// The descriptor kind that overflowed, or the set budget itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exhausted {
    Sets,
    Kind(DescriptorKind),
}

impl SlotLedger {
    pub(crate) fn new(sizes: &DescriptorPoolSizes) -> Self {
        Self {
            capacity_sets: sizes.max_sets,
            allocated_sets: 0,
            counts: sizes.counts.iter().map(|&(k, n)| (k, n, 0)).collect(),
            generation: 0,
        }
    }

    /// Charges one set plus its per-kind demand against the slot's budget.
    pub(crate) fn charge(&mut self, demand: &[(DescriptorKind, u32)]) -> Result<(), Exhausted> {
        if self.allocated_sets == self.capacity_sets {
            return Err(Exhausted::Sets);
        }
        for &(kind, wanted) in demand {
            let entry = self.counts.iter().find(|(k, _, _)| *k == kind);
            match entry {
                Some(&(_, capacity, used)) if used + wanted <= capacity => {}
                _ => return Err(Exhausted::Kind(kind)),
            }
        }
        self.allocated_sets += 1;
        for &(kind, wanted) in demand {
            if let Some(entry) = self.counts.iter_mut().find(|(k, _, _)| *k == kind) {
                entry.2 += wanted;
            }
        }
        Ok(())
    }

    /// Bulk reclaim: zeroes the counters and bumps the generation,
    /// invalidating every handle issued under the old one.
    pub(crate) fn reset(&mut self) {
        self.allocated_sets = 0;
        for entry in &mut self.counts {
            entry.2 = 0;
        }
        self.generation += 1;
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub(crate) fn allocated_sets(&self) -> u32 {
        self.allocated_sets
    }
}

/// Per-frame-slot descriptor allocator.
///
/// One `vk::DescriptorPool` per slot, all sized identically from the
/// configured table.
pub struct FrameDescriptorAllocator {
    device: Arc<Device>,
    pools: Vec<vk::DescriptorPool>,
    ledgers: Vec<SlotLedger>,
}

impl FrameDescriptorAllocator {
    /// Creates one pool per frame slot from the sizing table.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        slots: usize,
        sizes: &DescriptorPoolSizes,
    ) -> RhiResult<Self> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes
            .counts
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|&(kind, n)| {
                vk::DescriptorPoolSize::default()
                    .ty(to_vk_descriptor_type(kind))
                    .descriptor_count(n)
            })
            .collect();

        let mut pools = Vec::with_capacity(slots);
        for _ in 0..slots {
            // No FREE_DESCRIPTOR_SET: sets are only ever reclaimed in bulk.
            let create_info = vk::DescriptorPoolCreateInfo::default()
                .max_sets(sizes.max_sets)
                .pool_sizes(&pool_sizes);
            let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
            pools.push(pool);
        }

        let ledgers = (0..slots).map(|_| SlotLedger::new(sizes)).collect();

        info!(
            "Descriptor allocator created: {} slots, {} sets/slot",
            slots, sizes.max_sets
        );

        Ok(Self {
            device,
            pools,
            ledgers,
        })
    }

    /// Carves one transient set for `layout` from `slot`'s pool.
    ///
    /// Pool exhaustion terminates the process: fixed capacity is the
    /// stated policy, not a transient limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying Vulkan allocation fails for a
    /// reason other than exhaustion.
    pub fn allocate(&mut self, slot: usize, layout: &DescriptorSetLayout) -> RhiResult<SetHandle> {
        if let Err(exhausted) = self.ledgers[slot].charge(layout.demand()) {
            fatal(
                "descriptor allocation",
                format!("slot {} pool exhausted: {:?}", slot, exhausted),
            );
        }

        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pools[slot])
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };

        Ok(SetHandle {
            set: sets[0],
            slot,
            generation: self.ledgers[slot].generation(),
        })
    }

    /// Bulk-resets `slot`'s pool, invalidating every set carved from it.
    ///
    /// The caller must have proven (via the slot's fence) that no in-flight
    /// GPU work still reads those sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan reset fails.
    pub fn reset_slot(&mut self, slot: usize) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pools[slot], vk::DescriptorPoolResetFlags::empty())?;
        }
        self.ledgers[slot].reset();
        debug!("Descriptor slot {} reset", slot);
        Ok(())
    }

    /// Whether `handle` is still backed by live pool storage.
    #[inline]
    pub fn is_valid(&self, handle: SetHandle) -> bool {
        handle.slot < self.ledgers.len()
            && self.ledgers[handle.slot].generation() == handle.generation
    }

    /// Number of sets currently allocated from `slot`.
    #[inline]
    pub fn allocated_sets(&self, slot: usize) -> u32 {
        self.ledgers[slot].allocated_sets()
    }
}

impl Drop for FrameDescriptorAllocator {
    fn drop(&mut self) {
        for &pool in &self.pools {
            unsafe {
                self.device.handle().destroy_descriptor_pool(pool, None);
            }
        }
    }
}

/// Maps the engine's descriptor kinds onto Vulkan descriptor types.
pub fn to_vk_descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_sizes() -> DescriptorPoolSizes {
        DescriptorPoolSizes {
            max_sets: 2,
            counts: vec![
                (DescriptorKind::UniformBuffer, 3),
                (DescriptorKind::CombinedImageSampler, 1),
            ],
        }
    }

    #[test]
    fn test_ledger_charges_until_set_budget() {
        let mut ledger = SlotLedger::new(&small_sizes());
        let demand = [(DescriptorKind::UniformBuffer, 1)];
        assert!(ledger.charge(&demand).is_ok());
        assert!(ledger.charge(&demand).is_ok());
        assert_eq!(ledger.charge(&demand), Err(Exhausted::Sets));
        assert_eq!(ledger.allocated_sets(), 2);
    }

    #[test]
    fn test_ledger_charges_until_kind_budget() {
        let sizes = DescriptorPoolSizes {
            max_sets: 10,
            counts: vec![(DescriptorKind::UniformBuffer, 2)],
        };
        let mut ledger = SlotLedger::new(&sizes);
        let demand = [(DescriptorKind::UniformBuffer, 2)];
        assert!(ledger.charge(&demand).is_ok());
        assert_eq!(
            ledger.charge(&demand),
            Err(Exhausted::Kind(DescriptorKind::UniformBuffer))
        );
    }

    #[test]
    fn test_unknown_kind_is_exhausted() {
        let mut ledger = SlotLedger::new(&small_sizes());
        let demand = [(DescriptorKind::StorageImage, 1)];
        assert_eq!(
            ledger.charge(&demand),
            Err(Exhausted::Kind(DescriptorKind::StorageImage))
        );
    }

    #[test]
    fn test_reset_reclaims_everything_and_bumps_generation() {
        let mut ledger = SlotLedger::new(&small_sizes());
        let demand = [(DescriptorKind::UniformBuffer, 1)];
        ledger.charge(&demand).unwrap();
        ledger.charge(&demand).unwrap();

        let before = ledger.generation();
        ledger.reset();

        assert_eq!(ledger.allocated_sets(), 0);
        assert_eq!(ledger.generation(), before + 1);
        // Full budget available again after the bulk reset.
        assert!(ledger.charge(&demand).is_ok());
        assert!(ledger.charge(&demand).is_ok());
    }

    #[test]
    fn test_descriptor_kind_mapping() {
        assert_eq!(
            to_vk_descriptor_type(DescriptorKind::UniformBuffer),
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(
            to_vk_descriptor_type(DescriptorKind::CombinedImageSampler),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(
            to_vk_descriptor_type(DescriptorKind::StorageImage),
            vk::DescriptorType::STORAGE_IMAGE
        );
    }
}
