//! Vulkan implementation of [`GpuBackend`].
//!
//! Composes the RHI pieces into the per-slot frame loop: one
//! fence/semaphore set and one command buffer per frame slot, a shared
//! swapchain and depth target, per-slot descriptor pools, and the GPU
//! memory arena. Out-of-date surfaces are resolved here by recreating the
//! swapchain and depth target; the scheduler above only ever sees
//! `Skipped`/`Recreated` outcomes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use ember_core::{fatal, RendererConfig};
use ember_rhi::command::{CommandBuffer, CommandPool};
use ember_rhi::descriptor::FrameDescriptorAllocator;
use ember_rhi::device::Device;
use ember_rhi::instance::Instance;
use ember_rhi::memory::{GpuMemory, ImageDesc, ResourceId};
use ember_rhi::physical_device::select_physical_device;
use ember_rhi::shader::{Shader, ShaderStage};
use ember_rhi::surface::Surface;
use ember_rhi::swapchain::{Swapchain, SurfaceState};
use ember_rhi::sync::FrameSync;
use ember_rhi::{RhiError, RhiResult};

use crate::backend::{AcquireOutcome, GpuBackend, PresentOutcome};
use crate::error::{EngineError, EngineResult};
use crate::registry::ShaderId;

/// Depth format used for the shared depth target.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Depth attachment allocated from the memory arena, recreated with the
/// swapchain.
struct DepthTarget {
    id: ResourceId,
    view: vk::ImageView,
}

impl DepthTarget {
    fn new(memory: &mut GpuMemory, width: u32, height: u32) -> RhiResult<Self> {
        let (id, _image, view) = memory.allocate_image(&ImageDesc {
            width,
            height,
            format: DEPTH_FORMAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        })?;
        Ok(Self { id, view })
    }
}

/// The production [`GpuBackend`]: Vulkan via `ash`.
pub struct VulkanBackend {
    shaders: HashMap<ShaderId, Shader>,
    descriptors: FrameDescriptorAllocator,
    command_buffers: Vec<CommandBuffer>,
    _command_pool: CommandPool,
    sync: Vec<FrameSync>,
    depth: DepthTarget,
    memory: GpuMemory,
    swapchain: Swapchain,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
    fence_timeout: Duration,
    extent: (u32, u32),
    resize_pending: bool,
    /// Image index being recorded, for the present-layout transition.
    recording_image: Option<u32>,
}

impl VulkanBackend {
    /// Builds the full Vulkan stack for an opaque window handle.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage of instance, device, swapchain, or
    /// per-slot resource creation fails.
    pub fn new(
        config: &RendererConfig,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> EngineResult<Self> {
        let instance = Instance::new(display, config.validation)?;
        let surface = Surface::new(&instance, display, window)?;
        let gpu = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &gpu)?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            width,
            height,
            config.vsync,
        )?;

        let mut memory = GpuMemory::new(device.clone());
        let extent = swapchain.extent();
        let depth = DepthTarget::new(&mut memory, extent.width, extent.height)?;

        let slots = config.frames_in_flight;
        let descriptors =
            FrameDescriptorAllocator::new(device.clone(), slots, &config.descriptor_pool_sizes)?;

        let graphics_family = device
            .queue_families()
            .graphics
            .ok_or_else(|| EngineError::Backend("missing graphics queue family".to_string()))?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        let command_buffers = (0..slots)
            .map(|_| CommandBuffer::new(device.clone(), &command_pool))
            .collect::<RhiResult<Vec<_>>>()?;
        let sync = (0..slots)
            .map(|_| FrameSync::new(device.clone()))
            .collect::<RhiResult<Vec<_>>>()?;

        info!(
            "Vulkan backend ready: {} frame slots, {}x{}",
            slots, extent.width, extent.height
        );

        Ok(Self {
            shaders: HashMap::new(),
            descriptors,
            command_buffers,
            _command_pool: command_pool,
            sync,
            depth,
            memory,
            swapchain,
            device,
            surface,
            instance,
            fence_timeout: config.fence_timeout,
            extent: (extent.width, extent.height),
            resize_pending: false,
            recording_image: None,
        })
    }

    /// The GPU memory arena, for resource allocation by collaborators.
    pub fn memory(&mut self) -> &mut GpuMemory {
        &mut self.memory
    }

    /// The logical device.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn recreate_swapchain(&mut self) -> EngineResult<()> {
        let (width, height) = self.extent;
        self.swapchain
            .recreate(&self.instance, self.surface.handle(), width, height)?;

        let extent = self.swapchain.extent();
        self.extent = (extent.width, extent.height);

        // The old depth target no longer matches the surface extent.
        self.memory.free(self.depth.id);
        self.depth = DepthTarget::new(&mut self.memory, extent.width, extent.height)?;

        // Any signaled-but-unconsumed acquire semaphore from the dead
        // swapchain must not leak into the new one.
        for frame_sync in &mut self.sync {
            frame_sync.reset_semaphores(self.device.clone())?;
        }

        self.resize_pending = false;
        debug!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }
}

impl GpuBackend for VulkanBackend {
    fn slot_count(&self) -> usize {
        self.sync.len()
    }

    fn wait_slot_fence(&mut self, slot: usize) -> EngineResult<()> {
        match self.sync[slot].in_flight().wait(self.fence_timeout) {
            Ok(()) => Ok(()),
            Err(e @ RhiError::FenceTimeout(_)) => fatal("frame fence wait", e),
            Err(e) if e.is_device_lost() => fatal("frame fence wait", e),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_descriptors(&mut self, slot: usize) -> EngineResult<()> {
        self.descriptors.reset_slot(slot)?;
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> EngineResult<AcquireOutcome> {
        if self.resize_pending {
            self.recreate_swapchain()?;
            return Ok(AcquireOutcome::Skipped);
        }

        let semaphore = self.sync[slot].image_available().handle();
        match self.swapchain.acquire_next_image(semaphore)? {
            (index, SurfaceState::Optimal) | (index, SurfaceState::Suboptimal) => {
                Ok(AcquireOutcome::Ready { image_index: index })
            }
            (_, SurfaceState::OutOfDate) => {
                self.recreate_swapchain()?;
                Ok(AcquireOutcome::Skipped)
            }
        }
    }

    fn begin_recording(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
        let cmd = &self.command_buffers[slot];
        cmd.reset()?;
        cmd.begin()?;

        let image = self.swapchain.image(image_index as usize);
        let extent = self.swapchain.extent();

        // UNDEFINED -> COLOR_ATTACHMENT_OPTIMAL for this frame's image.
        let to_color = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        let barriers = [to_color];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe {
            self.device
                .handle()
                .cmd_pipeline_barrier2(cmd.handle(), &dependency);
        }

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.swapchain.image_view(image_index as usize))
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            });
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let color_attachments = [color_attachment];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(cmd.handle(), &rendering_info);
        }
        self.recording_image = Some(image_index);
        Ok(())
    }

    fn end_recording(&mut self, slot: usize) -> EngineResult<()> {
        let image_index = self.recording_image.take().ok_or_else(|| {
            EngineError::InvalidState("end_recording without begin_recording".to_string())
        })?;

        let cmd = &self.command_buffers[slot];
        unsafe {
            self.device.handle().cmd_end_rendering(cmd.handle());
        }

        // COLOR_ATTACHMENT_OPTIMAL -> PRESENT_SRC for the image this
        // frame wrote.
        let to_present = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE)
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .image(self.swapchain.image(image_index as usize))
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        let barriers = [to_present];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe {
            self.device
                .handle()
                .cmd_pipeline_barrier2(cmd.handle(), &dependency);
        }

        cmd.end()?;
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> EngineResult<()> {
        let frame_sync = &self.sync[slot];
        frame_sync.in_flight().reset()?;

        let wait_semaphores = [frame_sync.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame_sync.render_finished().handle()];
        let command_buffers = [self.command_buffers[slot].handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let result = unsafe {
            self.device
                .submit_graphics(&[submit_info], frame_sync.in_flight().handle())
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_device_lost() => fatal("graphics submit", e),
            Err(e) => Err(e.into()),
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> EngineResult<PresentOutcome> {
        let wait = self.sync[slot].render_finished().handle();
        let state = self
            .swapchain
            .present(self.device.present_queue(), image_index, wait)?;

        match state {
            SurfaceState::Optimal => Ok(PresentOutcome::Presented),
            SurfaceState::Suboptimal | SurfaceState::OutOfDate => {
                self.recreate_swapchain()?;
                Ok(PresentOutcome::Recreated)
            }
        }
    }

    fn note_resize(&mut self, width: u32, height: u32) {
        if (width, height) != self.extent && width > 0 && height > 0 {
            self.extent = (width, height);
            self.resize_pending = true;
        }
    }

    fn register_shader_source(
        &mut self,
        id: ShaderId,
        path: &Path,
        stage: ShaderStage,
    ) -> EngineResult<()> {
        let shader = Shader::from_spirv_file(self.device.clone(), path, stage, "main")?;
        self.shaders.insert(id, shader);
        Ok(())
    }

    fn reload_shader(&mut self, id: ShaderId, name: &str) -> EngineResult<()> {
        let shader = self.shaders.get_mut(&id).ok_or_else(|| {
            EngineError::Backend(format!("shader '{}' ({:?}) has no loaded module", name, id))
        })?;
        shader.reload_from_file()?;
        Ok(())
    }

    fn wait_idle(&mut self) -> EngineResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        // Per-slot and arena resources hold Arc<Device>; a device-wide
        // wait here makes their destruction safe regardless of in-flight
        // work.
        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("Device wait failed during backend teardown: {}", e);
        }
        self.memory.free(self.depth.id);
    }
}
