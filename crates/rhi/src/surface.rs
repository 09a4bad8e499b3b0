//! Window surface creation.
//!
//! The renderer is an embedded library; windowing lives with the host
//! application. The only thing crossing the boundary is a raw window/display
//! handle pair, from which a `vk::SurfaceKHR` is created here.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::error::RhiResult;
use crate::instance::Instance;

/// RAII wrapper for a Vulkan surface.
///
/// The surface is destroyed on drop. The instance it was created from must
/// outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for the given raw window and display handles.
    ///
    /// # Errors
    ///
    /// Returns an error if surface creation fails (unsupported platform,
    /// invalid handles).
    pub fn new(
        instance: &Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RhiResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display,
                window,
                None,
            )?
        };
        let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        info!("Vulkan surface created");
        Ok(Self { handle, loader })
    }

    /// Returns the raw surface handle.
    ///
    /// Valid only while this `Surface` is alive.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Returns the surface extension loader, for capability queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}
