//! Shader module loading and in-place reload.
//!
//! SPIR-V binaries become `VkShaderModule`s through [`Shader`]. A shader can
//! be reloaded in place: the module handle is swapped under the same
//! [`Shader`] value, so pipeline rebuild logic only needs the stage info,
//! not a new object graph.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Pipeline stage a shader module targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Vulkan shader module with stage and entry point information.
///
/// Immutable from the pipeline's point of view; only
/// [`Shader::reload_from_file`] replaces the module, and callers of that
/// must rebuild dependent pipelines afterwards.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
    /// Source path when file-loaded, used for reload.
    path: Option<PathBuf>,
}

impl Shader {
    /// Creates a shader module from a SPIR-V file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the data is not valid
    /// SPIR-V, or module creation fails.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::Shader(format!("failed to read shader file {:?}: {}", path, e))
        })?;

        let mut shader = Self::from_spirv_bytes(device, &bytes, stage, entry_point)?;
        shader.path = Some(path.to_path_buf());
        Ok(shader)
    }

    /// Creates a shader module from SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte length is not 4-byte aligned, the entry
    /// point name contains null bytes, or module creation fails.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        let module = create_module(&device, bytes)?;

        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::Shader(format!("invalid entry point name: {}", e)))?;

        info!("Created {} shader module", stage);

        Ok(Self {
            device,
            module,
            stage,
            entry_point,
            path: None,
        })
    }

    /// Re-reads the source file and swaps the module in place.
    ///
    /// The old module is destroyed immediately; the caller must guarantee
    /// no in-flight GPU work still references it and must rebuild any
    /// pipeline that baked the old module in.
    ///
    /// # Errors
    ///
    /// Returns an error if the shader was not file-loaded, or if the read
    /// or module creation fails. On error the old module stays intact.
    pub fn reload_from_file(&mut self) -> RhiResult<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| RhiError::Shader("shader has no source path to reload".to_string()))?;

        let bytes = std::fs::read(&path).map_err(|e| {
            RhiError::Shader(format!("failed to re-read shader file {:?}: {}", path, e))
        })?;
        let new_module = create_module(&self.device, &bytes)?;

        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
        self.module = new_module;

        info!("Reloaded {} shader from {:?}", self.stage, path);
        Ok(())
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Returns the shader stage.
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Returns the source path if this shader was loaded from a file.
    #[inline]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Builds the pipeline stage info for this module.
    ///
    /// The returned structure borrows from this shader and must not
    /// outlive it.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

fn create_module(device: &Device, bytes: &[u8]) -> RhiResult<vk::ShaderModule> {
    if bytes.len() % 4 != 0 {
        return Err(RhiError::Shader(format!(
            "SPIR-V code must be 4-byte aligned, got {} bytes",
            bytes.len()
        )));
    }

    let code: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
    let module = unsafe { device.handle().create_shader_module(&create_info, None)? };
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(
            ShaderStage::Compute.to_vk_stage(),
            vk::ShaderStageFlags::COMPUTE
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Vertex), "vertex");
        assert_eq!(format!("{}", ShaderStage::Fragment), "fragment");
    }
}
