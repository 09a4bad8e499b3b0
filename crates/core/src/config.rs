//! Renderer configuration.
//!
//! The renderer is an embedded library; its entire configuration surface is
//! the [`RendererConfig`] value passed at initialization. There is no CLI or
//! file surface.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default number of frames the CPU may record ahead of GPU completion.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 3;

/// Graphics backend selection.
///
/// Exactly one backend implementation is chosen at startup from this value.
/// There is currently a single production backend; the indirection exists so
/// a build artifact carries no compile-time backend branching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Vulkan via `ash`.
    #[default]
    Vulkan,
}

/// Descriptor kinds recognized by the per-frame descriptor allocator.
///
/// This mirrors the subset of Vulkan descriptor types the engine allocates
/// transiently; the backend maps each kind to its native counterpart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    UniformBufferDynamic,
    StorageBuffer,
    CombinedImageSampler,
    SampledImage,
    Sampler,
    StorageImage,
}

impl DescriptorKind {
    /// All kinds, in the order the sizing table lists them.
    pub const ALL: [DescriptorKind; 7] = [
        DescriptorKind::UniformBuffer,
        DescriptorKind::UniformBufferDynamic,
        DescriptorKind::StorageBuffer,
        DescriptorKind::CombinedImageSampler,
        DescriptorKind::SampledImage,
        DescriptorKind::Sampler,
        DescriptorKind::StorageImage,
    ];
}

/// Per-frame-slot descriptor pool sizing table.
///
/// Capacity is fixed for the lifetime of the renderer: each frame slot gets
/// one pool sized from this table, and exhausting it is fatal by policy.
/// There is no dynamic growth path.
#[derive(Clone, Debug)]
pub struct DescriptorPoolSizes {
    /// Maximum number of descriptor sets per frame slot.
    pub max_sets: u32,
    /// Maximum descriptor count per kind, per frame slot.
    pub counts: Vec<(DescriptorKind, u32)>,
}

impl DescriptorPoolSizes {
    /// Returns the configured capacity for a descriptor kind (0 if absent).
    pub fn count_for(&self, kind: DescriptorKind) -> u32 {
        self.counts
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

impl Default for DescriptorPoolSizes {
    fn default() -> Self {
        Self {
            max_sets: 1024,
            counts: DescriptorKind::ALL.iter().map(|&k| (k, 1024)).collect(),
        }
    }
}

/// Renderer configuration.
///
/// # Example
/// ```
/// use ember_core::RendererConfig;
///
/// let config = RendererConfig {
///     frames_in_flight: 2,
///     vsync: false,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Number of frame slots (frames in flight). Small positive integer.
    pub frames_in_flight: usize,
    /// Whether presentation waits for vertical blank.
    pub vsync: bool,
    /// Per-slot descriptor pool sizing table.
    pub descriptor_pool_sizes: DescriptorPoolSizes,
    /// Upper bound on the per-frame fence wait. Exceeding it is fatal,
    /// never retried.
    pub fence_timeout: Duration,
    /// Enable the validation layer (debug builds by default).
    pub validation: bool,
    /// Which backend implementation to construct at startup.
    pub backend: BackendKind,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            vsync: true,
            descriptor_pool_sizes: DescriptorPoolSizes::default(),
            fence_timeout: Duration::from_secs(5),
            validation: cfg!(debug_assertions),
            backend: BackendKind::default(),
        }
    }
}

impl RendererConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `frames_in_flight` is zero or implausibly large,
    /// or if the fence timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.frames_in_flight > 8 {
            return Err(Error::Config(format!(
                "frames_in_flight of {} is not a sane frame-buffering depth",
                self.frames_in_flight
            )));
        }
        if self.fence_timeout.is_zero() {
            return Err(Error::Config("fence_timeout must be non-zero".to_string()));
        }
        if self.descriptor_pool_sizes.max_sets == 0 {
            return Err(Error::Config(
                "descriptor pool max_sets must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the fence timeout in nanoseconds, saturating on overflow.
    #[inline]
    pub fn fence_timeout_ns(&self) -> u64 {
        u64::try_from(self.fence_timeout.as_nanos()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, DEFAULT_FRAMES_IN_FLIGHT);
        assert!(config.vsync);
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let config = RendererConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_excessive_frames_in_flight_rejected() {
        let config = RendererConfig {
            frames_in_flight: 64,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_fence_timeout_rejected() {
        let config = RendererConfig {
            fence_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_sizes_lookup() {
        let sizes = DescriptorPoolSizes::default();
        assert_eq!(sizes.count_for(DescriptorKind::UniformBuffer), 1024);

        let sparse = DescriptorPoolSizes {
            max_sets: 8,
            counts: vec![(DescriptorKind::StorageBuffer, 16)],
        };
        assert_eq!(sparse.count_for(DescriptorKind::StorageBuffer), 16);
        assert_eq!(sparse.count_for(DescriptorKind::Sampler), 0);
    }

    #[test]
    fn test_fence_timeout_ns() {
        let config = RendererConfig {
            fence_timeout: Duration::from_millis(1),
            ..Default::default()
        };
        assert_eq!(config.fence_timeout_ns(), 1_000_000);
    }
}
