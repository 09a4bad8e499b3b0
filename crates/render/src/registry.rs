//! Shader dependency registry.
//!
//! Tracks which GPU objects (pipelines, material caches) were built from
//! which shaders, and which global preprocessor macros each shader
//! references. When a shader goes dirty (a file edit, or a macro value
//! change fanning out) the registry reloads it once per cycle and tells
//! every live dependent to invalidate, in registration order.
//!
//! Dependents are held by `Weak` reference: the registry never keeps a
//! dead object alive, and a dependent destroyed between marking and
//! reconciling is skipped silently.

use std::collections::{HashMap, HashSet};
use std::sync::Weak;

use tracing::{debug, info, trace, warn};

use crate::error::EngineResult;

/// Identifies a registered shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderId(u32);

impl ShaderId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An object built from one or more shaders.
///
/// `invalidate` is called on the render thread during reconcile, after the
/// shader it depends on has been reloaded. Implementations typically mark
/// a pipeline for rebuild.
pub trait ShaderDependent: Send + Sync {
    fn invalidate(&self);
}

struct ShaderEntry {
    name: String,
    /// Global macro names this shader's source references.
    referenced_macros: HashSet<String>,
    /// Weak back-refs, in registration order.
    dependents: Vec<Weak<dyn ShaderDependent>>,
}

/// Registry of shaders, their macro references, and their dependents.
#[derive(Default)]
pub struct ShaderRegistry {
    shaders: Vec<ShaderEntry>,
    /// Membership check for idempotent marking.
    dirty: HashSet<ShaderId>,
    /// Mark order, drained at reconcile.
    dirty_order: Vec<ShaderId>,
    macros: HashMap<String, String>,
}

impl ShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shader under `name`, recording which global macros its
    /// source references.
    pub fn register_shader(
        &mut self,
        name: impl Into<String>,
        referenced_macros: &[&str],
    ) -> ShaderId {
        let name = name.into();
        let id = ShaderId(self.shaders.len() as u32);
        debug!("Registered shader '{}' as {:?}", name, id);
        self.shaders.push(ShaderEntry {
            name,
            referenced_macros: referenced_macros.iter().map(|m| m.to_string()).collect(),
            dependents: Vec::new(),
        });
        id
    }

    /// Adds a weak back-reference from `id` to a dependent object.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this registry.
    pub fn register_dependency(&mut self, id: ShaderId, dependent: Weak<dyn ShaderDependent>) {
        self.shaders[id.index()].dependents.push(dependent);
    }

    /// Marks `id` dirty. Idempotent between reconciles: marking an
    /// already-dirty shader changes nothing.
    pub fn mark_dirty(&mut self, id: ShaderId) {
        if self.dirty.insert(id) {
            self.dirty_order.push(id);
            trace!("Shader {:?} marked dirty", id);
        }
    }

    /// Sets a global macro value and marks every shader referencing
    /// `name` dirty, each at most once.
    ///
    /// Setting the same value again still fans out; the registry does not
    /// second-guess whether a recompile is needed.
    pub fn set_global_macro(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        info!("Global macro '{}' = '{}'", name, value);

        let affected: Vec<ShaderId> = self
            .shaders
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.referenced_macros.contains(&name))
            .map(|(i, _)| ShaderId(i as u32))
            .collect();

        self.macros.insert(name, value);
        for id in affected {
            self.mark_dirty(id);
        }
    }

    /// Current value of a global macro, if set.
    pub fn macro_value(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    /// Name a shader was registered under.
    pub fn shader_name(&self, id: ShaderId) -> &str {
        &self.shaders[id.index()].name
    }

    /// Whether any shader is waiting for reconcile.
    #[inline]
    pub fn has_dirty(&self) -> bool {
        !self.dirty_order.is_empty()
    }

    /// Reloads every dirty shader and invalidates its live dependents.
    ///
    /// Runs once per frame cycle, before the next frame begins. For each
    /// dirty shader, in mark order: `reload(id, name)` rebuilds the shader
    /// module; on success each still-live dependent is invalidated in
    /// registration order, and dangling weak refs are skipped. A failed
    /// reload is logged and the old shader stays in use; its dependents
    /// are not invalidated.
    ///
    /// The dirty set is cleared regardless, so one bad edit does not wedge
    /// the cycle. Returns the number of shaders successfully reloaded.
    pub fn reconcile<F>(&mut self, mut reload: F) -> usize
    where
        F: FnMut(ShaderId, &str) -> EngineResult<()>,
    {
        if self.dirty_order.is_empty() {
            return 0;
        }

        let dirty = std::mem::take(&mut self.dirty_order);
        self.dirty.clear();

        let mut reloaded = 0;
        for id in dirty {
            let entry = &mut self.shaders[id.index()];
            match reload(id, &entry.name) {
                Ok(()) => {
                    reloaded += 1;
                    let before = entry.dependents.len();
                    // Drop dead back-refs as we go; live ones get invalidated.
                    entry.dependents.retain(|weak| match weak.upgrade() {
                        Some(dependent) => {
                            dependent.invalidate();
                            true
                        }
                        None => false,
                    });
                    let dropped = before - entry.dependents.len();
                    if dropped > 0 {
                        trace!(
                            "Skipped {} dead dependents of shader '{}'",
                            dropped,
                            entry.name
                        );
                    }
                    info!(
                        "Reloaded shader '{}', invalidated {} dependents",
                        entry.name,
                        entry.dependents.len()
                    );
                }
                Err(e) => {
                    warn!("Reload of shader '{}' failed, keeping old: {}", entry.name, e);
                }
            }
        }
        reloaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingDependent {
        invalidations: AtomicUsize,
    }

    impl CountingDependent {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                invalidations: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.invalidations.load(Ordering::SeqCst)
        }
    }

    impl ShaderDependent for CountingDependent {
        fn invalidate(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_mark_dirty_is_idempotent() {
        let mut registry = ShaderRegistry::new();
        let id = registry.register_shader("pbr", &[]);

        registry.mark_dirty(id);
        registry.mark_dirty(id);
        registry.mark_dirty(id);

        let mut reload_calls = 0;
        registry.reconcile(|_, _| {
            reload_calls += 1;
            Ok(())
        });
        assert_eq!(reload_calls, 1);
    }

    #[test]
    fn test_macro_change_marks_each_referencing_shader_once() {
        let mut registry = ShaderRegistry::new();
        let uses = registry.register_shader("lit", &["MAX_LIGHTS"]);
        let also_uses = registry.register_shader("shadow", &["MAX_LIGHTS", "PCF"]);
        let unrelated = registry.register_shader("sky", &[]);

        registry.set_global_macro("MAX_LIGHTS", "8");
        // Touching the same macro again before reconcile adds nothing.
        registry.set_global_macro("MAX_LIGHTS", "16");

        let mut reloaded = Vec::new();
        registry.reconcile(|id, _| {
            reloaded.push(id);
            Ok(())
        });

        assert_eq!(reloaded, vec![uses, also_uses]);
        assert!(!reloaded.contains(&unrelated));
        assert_eq!(registry.macro_value("MAX_LIGHTS"), Some("16"));
    }

    #[test]
    fn test_dependents_invalidated_in_registration_order() {
        let mut registry = ShaderRegistry::new();
        let id = registry.register_shader("lit", &[]);

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        struct OrderedDependent {
            tag: u32,
            order: Arc<parking_lot::Mutex<Vec<u32>>>,
        }
        impl ShaderDependent for OrderedDependent {
            fn invalidate(&self) {
                self.order.lock().push(self.tag);
            }
        }

        let deps: Vec<Arc<OrderedDependent>> = (0..3)
            .map(|tag| {
                Arc::new(OrderedDependent {
                    tag,
                    order: order.clone(),
                })
            })
            .collect();
        for dep in &deps {
            let weak: Weak<dyn ShaderDependent> = {
                let arc: Arc<dyn ShaderDependent> = dep.clone();
                Arc::downgrade(&arc)
            };
            registry.register_dependency(id, weak);
        }

        registry.mark_dirty(id);
        assert_eq!(registry.reconcile(|_, _| Ok(())), 1);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dead_dependent_is_skipped() {
        let mut registry = ShaderRegistry::new();
        let id = registry.register_shader("lit", &[]);

        let live = CountingDependent::new();
        let live_arc: Arc<dyn ShaderDependent> = live.clone();
        registry.register_dependency(id, Arc::downgrade(&live_arc));

        {
            let dead = CountingDependent::new();
            let dead_arc: Arc<dyn ShaderDependent> = dead;
            registry.register_dependency(id, Arc::downgrade(&dead_arc));
            // dead_arc drops here
        }

        registry.mark_dirty(id);
        registry.reconcile(|_, _| Ok(()));
        assert_eq!(live.count(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_dependents_untouched() {
        let mut registry = ShaderRegistry::new();
        let id = registry.register_shader("broken", &[]);

        let dep = CountingDependent::new();
        let dep_arc: Arc<dyn ShaderDependent> = dep.clone();
        registry.register_dependency(id, Arc::downgrade(&dep_arc));

        registry.mark_dirty(id);
        let reloaded = registry.reconcile(|_, _| {
            Err(crate::error::EngineError::Backend(
                "compile error".to_string(),
            ))
        });

        assert_eq!(reloaded, 0);
        assert_eq!(dep.count(), 0);
        // Dirty set cleared anyway; the cycle is not wedged.
        assert!(!registry.has_dirty());
    }

    #[test]
    fn test_reconcile_clears_dirty_set() {
        let mut registry = ShaderRegistry::new();
        let id = registry.register_shader("lit", &[]);

        registry.mark_dirty(id);
        assert!(registry.has_dirty());
        registry.reconcile(|_, _| Ok(()));
        assert!(!registry.has_dirty());
        assert_eq!(registry.reconcile(|_, _| Ok(())), 0);
    }
}
