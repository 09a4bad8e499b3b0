//! Vulkan instance management.
//!
//! Handles VkInstance creation, the optional Khronos validation layer, and
//! the debug messenger that routes validation output into `tracing`.

use std::ffi::CStr;

use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use tracing::{error, info, warn};

use crate::error::{RhiError, RhiResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with optional validation support.
///
/// Owns the entry loader, the instance handle, and (when validation is on)
/// the debug messenger. All three are torn down together on drop.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// Instance extensions are derived from the display handle the surface
    /// will be created against, so a single build runs on any platform
    /// `ash-window` knows about.
    ///
    /// # Arguments
    ///
    /// * `display` - Display handle of the window the renderer will present to
    /// * `enable_validation` - Request the Khronos validation layer; silently
    ///   downgraded if the layer is not installed
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan library cannot be loaded, required
    /// surface extensions are missing, or instance creation fails.
    pub fn new(display: RawDisplayHandle, enable_validation: bool) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && validation_layer_present(&entry)?;
        if enable_validation && !validation {
            warn!("Validation layer requested but not installed; continuing without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"ember")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"ember")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .map_err(RhiError::from)?
            .to_vec();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers: Vec<*const i8> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created (API 1.3, validation: {})",
            validation
        );

        let (debug_utils, debug_messenger) = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = create_debug_messenger(&loader)?;
            (Some(loader), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether the validation layer is active.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(loader), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

fn validation_layer_present(entry: &Entry) -> RhiResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    let wanted = VALIDATION_LAYER.to_bytes_with_nul();
    Ok(layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name.to_bytes_with_nul() == wanted
    }))
}

fn create_debug_messenger(
    loader: &ash::ext::debug_utils::Instance,
) -> RhiResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };
    info!("Vulkan debug messenger installed");
    Ok(messenger)
}

/// Routes validation layer output into tracing.
///
/// # Safety
///
/// Called by the driver; must follow the Vulkan debug-callback contract.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }

    let data = unsafe { &*data };
    let message = if data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(data.p_message).to_string_lossy() }
    };

    let kind = match ty {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vk {}] {}", kind, message);
    } else {
        warn!("[vk {}] {}", kind, message);
    }

    vk::FALSE
}
