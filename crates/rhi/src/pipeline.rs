//! Pipeline layout and graphics pipeline creation.
//!
//! Pipelines here target dynamic rendering (Vulkan 1.3): attachment
//! formats are baked into the pipeline, no render pass objects. A pipeline
//! is immutable; shader hot-reload rebuilds dependent pipelines from the
//! same [`GraphicsPipelineDesc`] rather than patching them.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;

/// Vulkan pipeline layout wrapper.
///
/// Immutable after creation; safe to share between threads.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a pipeline layout from descriptor set layouts and push
    /// constant ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout ({} set layouts, {} push constant ranges)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Fixed-function settings for a graphics pipeline.
///
/// One description can build a pipeline any number of times, which is how
/// shader reloads rebuild dependents.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    /// Color attachment formats for dynamic rendering. Must be non-empty.
    pub color_formats: Vec<vk::Format>,
    /// Depth attachment format; depth test/write are enabled when set.
    pub depth_format: Option<vk::Format>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub blend_enable: bool,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            color_formats: Vec::new(),
            depth_format: None,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            blend_enable: false,
        }
    }
}

/// Vulkan graphics pipeline wrapper.
///
/// Immutable after creation; viewport and scissor are dynamic states.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    /// Builds a graphics pipeline from shaders and a description.
    ///
    /// # Errors
    ///
    /// Returns an error if the description has no color attachment formats
    /// or if Vulkan pipeline creation fails.
    pub fn new_graphics(
        device: Arc<Device>,
        vertex_shader: &Shader,
        fragment_shader: &Shader,
        layout: &PipelineLayout,
        desc: &GraphicsPipelineDesc,
    ) -> RhiResult<Self> {
        if desc.color_formats.is_empty() {
            return Err(RhiError::Pipeline(
                "at least one color attachment format is required".to_string(),
            ));
        }

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);

        let input_assembly_state =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(desc.topology);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(desc.polygon_mode)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let has_depth = desc.depth_format.is_some();
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth)
            .depth_write_enable(has_depth)
            .depth_compare_op(vk::CompareOp::LESS)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_formats
            .iter()
            .map(|_| {
                if desc.blend_enable {
                    vk::PipelineColorBlendAttachmentState {
                        blend_enable: vk::TRUE,
                        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
                        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
                        color_blend_op: vk::BlendOp::ADD,
                        src_alpha_blend_factor: vk::BlendFactor::ONE,
                        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
                        alpha_blend_op: vk::BlendOp::ADD,
                        color_write_mask: vk::ColorComponentFlags::RGBA,
                    }
                } else {
                    vk::PipelineColorBlendAttachmentState {
                        color_write_mask: vk::ColorComponentFlags::RGBA,
                        ..Default::default()
                    }
                }
            })
            .collect();

        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&desc.color_formats);
        if let Some(depth_format) = desc.depth_format {
            rendering_info = rendering_info.depth_attachment_format(depth_format);
        }

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, result)| result)?[0]
        };

        info!("Graphics pipeline created");

        Ok(Self { device, pipeline })
    }

    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Graphics pipeline destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_defaults() {
        let desc = GraphicsPipelineDesc::default();
        assert_eq!(desc.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(desc.cull_mode, vk::CullModeFlags::BACK);
        assert!(desc.color_formats.is_empty());
        assert!(desc.depth_format.is_none());
        assert!(!desc.blend_enable);
    }
}
