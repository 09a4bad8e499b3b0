//! Renderer facade.
//!
//! [`Renderer`] is the explicit context object tying the engine together:
//! it owns the backend, the deferred command queue, the per-slot release
//! ring, the shader registry, and the frame schedule. There is no global
//! state; embedders hold the `Renderer` and drive it with
//! `begin_frame` / `end_frame`.
//!
//! # Frame cycle
//!
//! `begin_frame` runs, in order: watcher poll, shader reconcile, slot
//! fence wait, release-queue drain, descriptor pool reset, image acquire,
//! begin recording. `end_frame` drains the deferred command queue, ends
//! recording, submits, presents, and advances the slot index by one.

use std::path::Path;
use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use ember_core::{BackendKind, RendererConfig};
use ember_rhi::shader::ShaderStage;

use crate::backend::{AcquireOutcome, GpuBackend};
use crate::error::{EngineError, EngineResult};
use crate::frame::FrameSchedule;
use crate::queue::DeferredCommandQueue;
use crate::registry::{ShaderDependent, ShaderId, ShaderRegistry};
use crate::release::ReleaseRing;
use crate::vulkan::VulkanBackend;
use crate::watcher::ShaderWatcher;

/// The frame-scheduling and resource-lifecycle engine.
pub struct Renderer {
    backend: Box<dyn GpuBackend>,
    queue: Arc<DeferredCommandQueue>,
    releases: Arc<ReleaseRing>,
    registry: ShaderRegistry,
    watcher: Option<ShaderWatcher>,
    schedule: FrameSchedule,
    current_image: Option<u32>,
    shut_down: bool,
}

impl Renderer {
    /// Creates a renderer with the production backend for a window.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or backend
    /// construction fails.
    pub fn new(
        config: RendererConfig,
        window: &(impl HasDisplayHandle + HasWindowHandle),
        width: u32,
        height: u32,
    ) -> EngineResult<Self> {
        config.validate()?;

        let display = window
            .display_handle()
            .map_err(|e| EngineError::Backend(format!("no display handle: {}", e)))?
            .as_raw();
        let raw_window = window
            .window_handle()
            .map_err(|e| EngineError::Backend(format!("no window handle: {}", e)))?
            .as_raw();

        let backend: Box<dyn GpuBackend> = match config.backend {
            BackendKind::Vulkan => {
                Box::new(VulkanBackend::new(&config, display, raw_window, width, height)?)
            }
        };

        Ok(Self::assemble(backend))
    }

    /// Creates a renderer over a caller-provided backend.
    ///
    /// Used for embedding and for driving the scheduler in tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or disagrees with
    /// the backend's slot count.
    pub fn with_backend(
        config: RendererConfig,
        backend: Box<dyn GpuBackend>,
    ) -> EngineResult<Self> {
        config.validate()?;
        if backend.slot_count() != config.frames_in_flight {
            return Err(EngineError::Backend(format!(
                "backend has {} slots, config wants {}",
                backend.slot_count(),
                config.frames_in_flight
            )));
        }
        Ok(Self::assemble(backend))
    }

    fn assemble(backend: Box<dyn GpuBackend>) -> Self {
        let slots = backend.slot_count();
        info!("Renderer created with {} frame slots", slots);
        Self {
            backend,
            queue: Arc::new(DeferredCommandQueue::new()),
            releases: Arc::new(ReleaseRing::new(slots)),
            registry: ShaderRegistry::new(),
            watcher: None,
            schedule: FrameSchedule::new(slots),
            current_image: None,
            shut_down: false,
        }
    }

    /// Current frame slot index, always in `[0, frames_in_flight)`.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.schedule.index()
    }

    /// Number of frame slots.
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.schedule.count()
    }

    /// Handle to the deferred command queue, for producer threads.
    pub fn command_queue(&self) -> Arc<DeferredCommandQueue> {
        self.queue.clone()
    }

    /// Enqueues a GPU command to run at the next `end_frame` drain.
    ///
    /// Infallible and non-blocking; callable from any thread.
    pub fn submit(&self, thunk: impl FnOnce() + Send + 'static) {
        self.queue.submit(thunk);
    }

    /// Schedules a resource destroy on the current slot's release queue.
    ///
    /// The thunk runs when this slot's fence next proves the frame that
    /// could reference the resource has retired, one full cycle from now.
    pub fn submit_resource_free(&self, thunk: impl FnOnce() + Send + 'static) {
        self.releases.destroy_later(self.schedule.index(), thunk);
    }

    /// Registers a shader with the macro names its source references.
    pub fn register_shader(&mut self, name: impl Into<String>, macros: &[&str]) -> ShaderId {
        self.registry.register_shader(name, macros)
    }

    /// Loads a SPIR-V file as `id`'s module and watches it for edits.
    ///
    /// # Errors
    ///
    /// Returns an error if the load or watch setup fails.
    pub fn load_shader(
        &mut self,
        id: ShaderId,
        path: &Path,
        stage: ShaderStage,
    ) -> EngineResult<()> {
        self.backend.register_shader_source(id, path, stage)?;
        if self.watcher.is_none() {
            self.watcher = Some(ShaderWatcher::new()?);
        }
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.watch(path, id)?;
        }
        Ok(())
    }

    /// Registers an object to be invalidated when `id` reloads.
    pub fn register_dependency(
        &mut self,
        id: ShaderId,
        dependent: std::sync::Weak<dyn ShaderDependent>,
    ) {
        self.registry.register_dependency(id, dependent);
    }

    /// Marks a shader for reload at the next frame boundary.
    pub fn mark_shader_dirty(&mut self, id: ShaderId) {
        self.registry.mark_dirty(id);
    }

    /// Sets a global shader macro, dirtying every shader that references
    /// it.
    pub fn set_global_macro(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.registry.set_global_macro(name, value);
    }

    /// Notes a new surface size; the swapchain recreates at the next
    /// frame boundary.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.backend.note_resize(width, height);
    }

    /// Starts the next frame.
    ///
    /// Returns `Ok(true)` when recording began, `Ok(false)` when the
    /// frame was skipped because the swapchain had to be recreated; the
    /// same slot is retried on the next call.
    ///
    /// # Errors
    ///
    /// Returns an error after shutdown, when called out of order, or when
    /// a backend operation fails for a recoverable reason.
    pub fn begin_frame(&mut self) -> EngineResult<bool> {
        if self.shut_down {
            return Err(EngineError::InvalidState(
                "begin_frame after shutdown".to_string(),
            ));
        }
        self.schedule.begin_recording()?;

        // Dirty shaders reconcile before any frame work touches them.
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.poll(&mut self.registry);
        }
        let backend = &mut self.backend;
        self.registry
            .reconcile(|id, name| backend.reload_shader(id, name));

        let slot = self.schedule.index();
        self.backend.wait_slot_fence(slot)?;
        // The fence proves slot's previous GPU work retired: its deferred
        // destroys and descriptor sets are now safe to reclaim.
        self.releases.drain(slot);
        self.backend.reset_descriptors(slot)?;

        match self.backend.acquire(slot)? {
            AcquireOutcome::Ready { image_index } => {
                self.backend.begin_recording(slot, image_index)?;
                self.current_image = Some(image_index);
                Ok(true)
            }
            AcquireOutcome::Skipped => {
                self.schedule.abandon();
                debug!("Frame skipped on slot {} after swapchain recreation", slot);
                Ok(false)
            }
        }
    }

    /// Finishes the current frame: drains the deferred command queue,
    /// submits, presents, and advances to the next slot.
    ///
    /// # Errors
    ///
    /// Returns an error if no frame is in progress or a backend operation
    /// fails for a recoverable reason.
    pub fn end_frame(&mut self) -> EngineResult<()> {
        let image_index = self.current_image.take().ok_or_else(|| {
            EngineError::InvalidState("end_frame without begin_frame".to_string())
        })?;
        let slot = self.schedule.index();

        // The single point where enqueued GPU commands run.
        self.queue.execute();

        let result = self.finish_frame(slot, image_index);
        if let Err(e) = &result {
            // A recoverable backend failure abandons the frame; the slot
            // stays current and the next begin_frame retries it.
            warn!("Frame {} abandoned: {}", slot, e);
            self.schedule.abandon();
        }
        result
    }

    fn finish_frame(&mut self, slot: usize, image_index: u32) -> EngineResult<()> {
        self.backend.end_recording(slot)?;
        self.backend.submit(slot)?;
        self.schedule.mark_submitted()?;

        self.backend.present(slot, image_index)?;
        self.schedule.mark_presented()?;

        self.schedule.advance()?;
        Ok(())
    }

    /// Tears the engine down: waits for the device, flushes the deferred
    /// queue, and drains every release slot.
    ///
    /// Idempotent; also invoked by `Drop`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device-wide wait fails.
    pub fn shutdown(&mut self) -> EngineResult<()> {
        if self.shut_down {
            return Ok(());
        }
        info!("Renderer shutting down");

        self.backend.wait_idle()?;
        // Everything pending is safe to run now: the device is idle.
        self.queue.execute();
        self.releases.drain_all();
        self.shut_down = true;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Renderer shutdown during drop failed: {}", e);
        }
    }
}
