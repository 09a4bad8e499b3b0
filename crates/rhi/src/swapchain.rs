//! Swapchain creation, acquisition, and presentation.
//!
//! The [`Swapchain`] owns `VkSwapchainKHR` and the image views for its
//! images. Acquisition and presentation never surface
//! `ERROR_OUT_OF_DATE_KHR` to the caller as an error; out-of-date is an
//! ordinary outcome ([`SurfaceState::OutOfDate`]) that the frame layer
//! resolves by recreating the swapchain and retrying, invisibly to the
//! application.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Outcome of an acquire or present call, with out-of-date folded in as a
/// non-error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// The surface matches the swapchain.
    Optimal,
    /// The call succeeded but the swapchain no longer matches the surface
    /// exactly; recreation should happen soon.
    Suboptimal,
    /// The swapchain is unusable and must be recreated before the frame
    /// can continue.
    OutOfDate,
}

/// Surface capabilities, formats, and present modes for one device/surface
/// pair.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the surface queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes",
            formats.len(),
            present_modes.len()
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Vulkan swapchain wrapper.
///
/// Not thread-safe; acquisition and presentation happen on the frame
/// thread only.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    vsync: bool,
}

impl Swapchain {
    /// Creates a swapchain for the given surface and size.
    ///
    /// `vsync` selects FIFO presentation; otherwise MAILBOX is preferred
    /// with IMMEDIATE as the fallback.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface reports no usable formats or present
    /// modes, or if swapchain or image view creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> RhiResult<Self> {
        Self::create_internal(
            instance,
            device,
            surface,
            width,
            height,
            vsync,
            vk::SwapchainKHR::null(),
        )
    }

    fn create_internal(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::Swapchain(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, vsync);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let queue_families = device.queue_families();
        let graphics = queue_families
            .graphics
            .ok_or_else(|| RhiError::Swapchain("missing graphics queue family".to_string()))?;
        let present = queue_families
            .present
            .ok_or_else(|| RhiError::Swapchain("missing present queue family".to_string()))?;
        let family_indices = [graphics, present];

        let (sharing_mode, family_slice) = if graphics != present {
            (vk::SharingMode::CONCURRENT, family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_slice)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        let image_views = create_image_views(&device, &images, surface_format.format)?;

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
            present_mode,
            vsync,
        })
    }

    /// Recreates the swapchain for a new surface size, reusing the old
    /// swapchain handle for resource carry-over.
    ///
    /// Waits for the device to go idle first, so no in-flight work still
    /// references the old images.
    ///
    /// # Errors
    ///
    /// Returns an error if recreation fails.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;
        info!("Recreating swapchain at {}x{}", width, height);

        self.destroy_image_views();

        let old_swapchain = self.swapchain;
        let mut replacement = Self::create_internal(
            instance,
            self.device.clone(),
            surface,
            width,
            height,
            self.vsync,
            old_swapchain,
        )?;

        unsafe {
            self.swapchain_loader.destroy_swapchain(old_swapchain, None);
        }

        self.swapchain = replacement.swapchain;
        self.images = std::mem::take(&mut replacement.images);
        self.image_views = std::mem::take(&mut replacement.image_views);
        self.format = replacement.format;
        self.extent = replacement.extent;
        self.present_mode = replacement.present_mode;

        // Prevent the temporary from destroying the handle we just adopted.
        replacement.swapchain = vk::SwapchainKHR::null();

        Ok(())
    }

    /// Acquires the next swapchain image.
    ///
    /// Returns the image index and the surface state. On
    /// [`SurfaceState::OutOfDate`] the index is meaningless and the caller
    /// must recreate before retrying.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than out-of-date.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
    ) -> RhiResult<(u32, SurfaceState)> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok((index, SurfaceState::Optimal)),
            Ok((index, true)) => Ok((index, SurfaceState::Suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((0, SurfaceState::OutOfDate)),
            Err(e) => Err(e.into()),
        }
    }

    /// Presents `image_index` after `wait_semaphore` signals.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than out-of-date or
    /// suboptimal, which are reported through [`SurfaceState`].
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<SurfaceState> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(SurfaceState::Optimal),
            Ok(true) => Ok(SurfaceState::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SurfaceState::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the swapchain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Returns the swapchain image at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    /// Returns the image view at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    fn destroy_image_views(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
        self.image_views.clear();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            }
            info!(
                "Swapchain destroyed ({}x{}, {} images)",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

/// Prefers B8G8R8A8_SRGB with the SRGB_NONLINEAR color space, then the
/// UNORM variant, then whatever the surface lists first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    if let Some(&format) = preferred {
        return format;
    }

    let alternative = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    if let Some(&format) = alternative {
        return format;
    }

    warn!("Using first available surface format: {:?}", formats[0].format);
    formats[0]
}

/// Present mode selection.
///
/// FIFO when vsync is requested (always available). Otherwise MAILBOX,
/// falling back to IMMEDIATE, falling back to FIFO.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    if present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        return vk::PresentModeKHR::IMMEDIATE;
    }
    vk::PresentModeKHR::FIFO
}

/// Uses the surface's current extent when set, otherwise clamps the
/// requested size to the surface limits.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped at the maximum when the surface has
/// one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let image_view = unsafe { device.handle().create_image_view(&create_info, None)? };
        image_views.push(image_view);
    }

    Ok(image_views)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_vsync_forces_fifo() {
        let modes = vec![
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_no_vsync_prefers_mailbox_then_immediate() {
        let with_mailbox = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&with_mailbox, false),
            vk::PresentModeKHR::MAILBOX
        );

        let without_mailbox = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&without_mailbox, false),
            vk::PresentModeKHR::IMMEDIATE
        );

        let fifo_only = vec![vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&fifo_only, false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_uses_current_when_defined() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_extent_clamps_to_surface_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));
    }

    #[test]
    fn test_image_count_respects_max() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 2);

        let uncapped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&uncapped), 3);
    }
}
