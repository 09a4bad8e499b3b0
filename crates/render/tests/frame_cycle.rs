//! Full frame-cycle tests against a mock backend.
//!
//! These exercise the scheduler's observable guarantees with two frames
//! in flight: strict slot ordering, single-drain command execution,
//! one-full-cycle deferred destruction, skip-and-retry on swapchain
//! recreation, and reload reconciliation.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use ember_render::{
    AcquireOutcome, GpuBackend, PresentOutcome, Renderer, RendererConfig, ShaderDependent,
    ShaderId, ShaderStage,
};

/// Scriptable backend that records every call the scheduler makes.
struct MockBackend {
    slots: usize,
    events: Arc<Mutex<Vec<String>>>,
    scripted_acquires: Mutex<VecDeque<AcquireOutcome>>,
    failing_submits: AtomicUsize,
    reloads: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    fn new(slots: usize) -> (Box<Self>, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let reloads = Arc::new(Mutex::new(Vec::new()));
        let backend = Box::new(Self {
            slots,
            events: events.clone(),
            scripted_acquires: Mutex::new(VecDeque::new()),
            failing_submits: AtomicUsize::new(0),
            reloads: reloads.clone(),
        });
        (backend, events, reloads)
    }

    fn script_acquire(&self, outcome: AcquireOutcome) {
        self.scripted_acquires.lock().unwrap().push_back(outcome);
    }

    fn fail_next_submit(&self) {
        self.failing_submits.fetch_add(1, Ordering::SeqCst);
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl GpuBackend for MockBackend {
    fn slot_count(&self) -> usize {
        self.slots
    }

    fn wait_slot_fence(&mut self, slot: usize) -> ember_render::EngineResult<()> {
        self.log(format!("wait_fence {}", slot));
        Ok(())
    }

    fn reset_descriptors(&mut self, slot: usize) -> ember_render::EngineResult<()> {
        self.log(format!("reset_descriptors {}", slot));
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> ember_render::EngineResult<AcquireOutcome> {
        self.log(format!("acquire {}", slot));
        let outcome = self
            .scripted_acquires
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AcquireOutcome::Ready {
                image_index: slot as u32,
            });
        Ok(outcome)
    }

    fn begin_recording(&mut self, slot: usize, image_index: u32) -> ember_render::EngineResult<()> {
        self.log(format!("begin_recording {} image {}", slot, image_index));
        Ok(())
    }

    fn end_recording(&mut self, slot: usize) -> ember_render::EngineResult<()> {
        self.log(format!("end_recording {}", slot));
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> ember_render::EngineResult<()> {
        self.log(format!("submit {}", slot));
        if self.failing_submits.load(Ordering::SeqCst) > 0 {
            self.failing_submits.fetch_sub(1, Ordering::SeqCst);
            return Err(ember_render::EngineError::Backend(
                "queue submission rejected".to_string(),
            ));
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> ember_render::EngineResult<PresentOutcome> {
        self.log(format!("present {} image {}", slot, image_index));
        Ok(PresentOutcome::Presented)
    }

    fn note_resize(&mut self, width: u32, height: u32) {
        self.log(format!("note_resize {}x{}", width, height));
    }

    fn register_shader_source(
        &mut self,
        _id: ShaderId,
        path: &Path,
        _stage: ShaderStage,
    ) -> ember_render::EngineResult<()> {
        self.log(format!("register_shader {:?}", path));
        Ok(())
    }

    fn reload_shader(&mut self, _id: ShaderId, name: &str) -> ember_render::EngineResult<()> {
        self.reloads.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn wait_idle(&mut self) -> ember_render::EngineResult<()> {
        self.log("wait_idle".to_string());
        Ok(())
    }
}

fn renderer_with_slots(slots: usize) -> (Renderer, Arc<Mutex<Vec<String>>>) {
    let (backend, events, _) = MockBackend::new(slots);
    let config = RendererConfig {
        frames_in_flight: slots,
        ..Default::default()
    };
    (Renderer::with_backend(config, backend).unwrap(), events)
}

fn run_frame(renderer: &mut Renderer) {
    assert!(renderer.begin_frame().unwrap());
    renderer.end_frame().unwrap();
}

#[test]
fn test_frame_index_cycles_strictly() {
    let (mut renderer, _) = renderer_with_slots(2);
    let mut seen = Vec::new();

    for _ in 0..5 {
        seen.push(renderer.frame_index());
        run_frame(&mut renderer);
    }

    assert_eq!(seen, vec![0, 1, 0, 1, 0]);
}

#[test]
fn test_begin_frame_operation_order() {
    let (mut renderer, events) = renderer_with_slots(2);
    run_frame(&mut renderer);

    let log = events.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![
            "wait_fence 0",
            "reset_descriptors 0",
            "acquire 0",
            "begin_recording 0 image 0",
            "end_recording 0",
            "submit 0",
            "present 0 image 0",
        ]
    );
}

#[test]
fn test_deferred_commands_run_in_fifo_order_at_end_frame() {
    let (mut renderer, _) = renderer_with_slots(2);
    let order = Arc::new(Mutex::new(Vec::new()));

    assert!(renderer.begin_frame().unwrap());
    for i in 0..3 {
        let order = order.clone();
        renderer.submit(move || order.lock().unwrap().push(i));
    }
    assert!(order.lock().unwrap().is_empty());

    renderer.end_frame().unwrap();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

    // Nothing re-runs on the next frame.
    run_frame(&mut renderer);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn test_resource_free_runs_exactly_one_full_cycle_later() {
    let (mut renderer, _) = renderer_with_slots(2);
    let freed = Arc::new(AtomicUsize::new(0));

    // Frame 0 on slot 0: schedule a destroy.
    assert!(renderer.begin_frame().unwrap());
    let f = freed.clone();
    renderer.submit_resource_free(move || {
        f.fetch_add(1, Ordering::SeqCst);
    });
    renderer.end_frame().unwrap();

    // Frame 1 on slot 1: the destroy must not run yet.
    assert!(renderer.begin_frame().unwrap());
    assert_eq!(freed.load(Ordering::SeqCst), 0);
    renderer.end_frame().unwrap();

    // Frame 2 revisits slot 0: its fence wait has proven frame 0
    // retired, so the destroy runs during begin_frame.
    assert!(renderer.begin_frame().unwrap());
    assert_eq!(freed.load(Ordering::SeqCst), 1);
    renderer.end_frame().unwrap();

    // Never again.
    run_frame(&mut renderer);
    run_frame(&mut renderer);
    assert_eq!(freed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_two_full_cycles_of_frees() {
    let (mut renderer, _) = renderer_with_slots(2);
    let freed: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    // Schedule one destroy per frame for four frames; each must run
    // exactly two frames after its submission.
    for frame in 0usize..4 {
        assert!(renderer.begin_frame().unwrap());
        {
            let expected_before: Vec<usize> = (0..frame.saturating_sub(1)).collect();
            assert_eq!(*freed.lock().unwrap(), expected_before);
        }
        let freed = freed.clone();
        renderer.submit_resource_free(move || freed.lock().unwrap().push(frame));
        renderer.end_frame().unwrap();
    }

    assert!(renderer.begin_frame().unwrap());
    renderer.end_frame().unwrap();
    assert!(renderer.begin_frame().unwrap());
    renderer.end_frame().unwrap();
    assert_eq!(*freed.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn test_skipped_frame_retries_same_slot() {
    let (backend, _, _) = MockBackend::new(2);
    backend.script_acquire(AcquireOutcome::Skipped);
    let config = RendererConfig {
        frames_in_flight: 2,
        ..Default::default()
    };
    let mut renderer = Renderer::with_backend(config, backend).unwrap();

    // The recreation frame is skipped, no error, slot does not advance.
    assert!(!renderer.begin_frame().unwrap());
    assert_eq!(renderer.frame_index(), 0);

    // The retry begins normally on the same slot.
    assert!(renderer.begin_frame().unwrap());
    assert_eq!(renderer.frame_index(), 0);
    renderer.end_frame().unwrap();
    assert_eq!(renderer.frame_index(), 1);
}

#[test]
fn test_failed_submit_abandons_frame_for_retry() {
    let (backend, _, _) = MockBackend::new(2);
    backend.fail_next_submit();
    let config = RendererConfig {
        frames_in_flight: 2,
        ..Default::default()
    };
    let mut renderer = Renderer::with_backend(config, backend).unwrap();

    assert!(renderer.begin_frame().unwrap());
    assert!(renderer.end_frame().is_err());

    // The failed frame is abandoned, not wedged: the slot stays current
    // and the next frame runs through on it.
    assert_eq!(renderer.frame_index(), 0);
    run_frame(&mut renderer);
    assert_eq!(renderer.frame_index(), 1);
}

#[test]
fn test_dirty_shader_reloads_once_and_invalidates_dependents() {
    let (backend, _, reloads) = MockBackend::new(2);
    let config = RendererConfig {
        frames_in_flight: 2,
        ..Default::default()
    };
    let mut renderer = Renderer::with_backend(config, backend).unwrap();

    struct Pipeline {
        invalidations: AtomicUsize,
    }
    impl ShaderDependent for Pipeline {
        fn invalidate(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    let id = renderer.register_shader("pbr_lit", &[]);
    let pipeline = Arc::new(Pipeline {
        invalidations: AtomicUsize::new(0),
    });
    let weak: Weak<dyn ShaderDependent> = {
        let arc: Arc<dyn ShaderDependent> = pipeline.clone();
        Arc::downgrade(&arc)
    };
    renderer.register_dependency(id, weak);

    // Duplicate marks collapse to one reload.
    renderer.mark_shader_dirty(id);
    renderer.mark_shader_dirty(id);

    run_frame(&mut renderer);
    assert_eq!(*reloads.lock().unwrap(), vec!["pbr_lit"]);
    assert_eq!(pipeline.invalidations.load(Ordering::SeqCst), 1);

    // Clean frames reload nothing.
    run_frame(&mut renderer);
    assert_eq!(reloads.lock().unwrap().len(), 1);
}

#[test]
fn test_macro_change_fans_out_once_per_referencing_shader() {
    let (backend, _, reloads) = MockBackend::new(2);
    let config = RendererConfig {
        frames_in_flight: 2,
        ..Default::default()
    };
    let mut renderer = Renderer::with_backend(config, backend).unwrap();

    renderer.register_shader("lit", &["MAX_LIGHTS"]);
    renderer.register_shader("shadow", &["MAX_LIGHTS"]);
    renderer.register_shader("sky", &[]);

    renderer.set_global_macro("MAX_LIGHTS", "8");
    run_frame(&mut renderer);

    assert_eq!(*reloads.lock().unwrap(), vec!["lit", "shadow"]);
}

#[test]
fn test_shutdown_drains_every_pending_release() {
    let (mut renderer, events) = renderer_with_slots(3);
    let freed = Arc::new(AtomicUsize::new(0));

    assert!(renderer.begin_frame().unwrap());
    for _ in 0..2 {
        let f = freed.clone();
        renderer.submit_resource_free(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
    }
    renderer.end_frame().unwrap();

    renderer.shutdown().unwrap();
    assert_eq!(freed.load(Ordering::SeqCst), 2);
    assert!(events.lock().unwrap().contains(&"wait_idle".to_string()));

    // Idempotent; a second call is a no-op and the engine stays down.
    renderer.shutdown().unwrap();
    assert!(renderer.begin_frame().is_err());
}

#[test]
fn test_end_frame_without_begin_is_rejected() {
    let (mut renderer, _) = renderer_with_slots(2);
    assert!(renderer.end_frame().is_err());
}

#[test]
fn test_double_begin_frame_is_rejected() {
    let (mut renderer, _) = renderer_with_slots(2);
    assert!(renderer.begin_frame().unwrap());
    assert!(renderer.begin_frame().is_err());
}

#[test]
fn test_slot_count_mismatch_is_rejected() {
    let (backend, _, _) = MockBackend::new(3);
    let config = RendererConfig {
        frames_in_flight: 2,
        ..Default::default()
    };
    assert!(Renderer::with_backend(config, backend).is_err());
}
