//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A fence wait exceeded its configured bound
    #[error("Fence wait timed out after {0:?}")]
    FenceTimeout(std::time::Duration),

    /// Shader load or module creation error
    #[error("Shader error: {0}")]
    Shader(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    Surface(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// A stale or otherwise invalid resource handle was used
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl RhiError {
    /// Whether this error indicates the device context is gone.
    ///
    /// Device loss has no safe continuation; callers treat it as fatal.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, RhiError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST))
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_classification() {
        let lost = RhiError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST);
        assert!(lost.is_device_lost());

        let oom = RhiError::Vulkan(ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(!oom.is_device_lost());

        let timeout = RhiError::FenceTimeout(std::time::Duration::from_secs(5));
        assert!(!timeout.is_device_lost());
    }
}
