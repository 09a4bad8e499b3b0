//! Shader source file watcher.
//!
//! Bridges on-disk shader edits into the dependency registry. Filesystem
//! events arrive on a channel from the `notify` watcher thread; [`poll`]
//! drains it without blocking, once per frame cycle, and marks the mapped
//! shaders dirty. Reconcile then picks them up before the next
//! `begin_frame`.
//!
//! [`poll`]: ShaderWatcher::poll

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::registry::{ShaderId, ShaderRegistry};

/// Watches registered shader source files and feeds edits to the registry.
pub struct ShaderWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    paths: HashMap<PathBuf, ShaderId>,
}

impl ShaderWatcher {
    /// Starts the underlying filesystem watcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform watcher cannot be created.
    pub fn new() -> EngineResult<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher = RecommendedWatcher::new(tx, Config::default())
            .map_err(|e| EngineError::Watch(e.to_string()))?;

        Ok(Self {
            watcher,
            rx,
            paths: HashMap::new(),
        })
    }

    /// Maps `path` to `id` and starts watching it.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be resolved or watched.
    pub fn watch(&mut self, path: &Path, id: ShaderId) -> EngineResult<()> {
        let canonical = path
            .canonicalize()
            .map_err(|e| EngineError::Watch(format!("cannot resolve {:?}: {}", path, e)))?;

        self.watcher
            .watch(&canonical, RecursiveMode::NonRecursive)
            .map_err(|e| EngineError::Watch(e.to_string()))?;

        debug!("Watching shader source {:?} for {:?}", canonical, id);
        self.paths.insert(canonical, id);
        Ok(())
    }

    /// Drains pending filesystem events and marks affected shaders dirty.
    ///
    /// Non-blocking; duplicate events for one shader collapse through the
    /// registry's idempotent marking. Returns the number of events that
    /// mapped to a watched shader.
    pub fn poll(&mut self, registry: &mut ShaderRegistry) -> usize {
        let mut hits = 0;
        while let Ok(result) = self.rx.try_recv() {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!("Shader watch error: {}", e);
                    continue;
                }
            };
            if !is_content_change(&event.kind) {
                continue;
            }
            for path in &event.paths {
                if let Some(&id) = self.paths.get(path) {
                    registry.mark_dirty(id);
                    hits += 1;
                }
            }
        }
        hits
    }

    /// Number of watched source files.
    #[inline]
    pub fn watched_count(&self) -> usize {
        self.paths.len()
    }
}

/// Editors save through modify, create, or rename-into-place.
fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn test_content_change_filter() {
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(!is_content_change(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_content_change(&EventKind::Access(
            notify::event::AccessKind::Any
        )));
    }

    #[test]
    fn test_watch_rejects_missing_path() {
        let mut watcher = ShaderWatcher::new().unwrap();
        let mut registry = ShaderRegistry::new();
        let id = registry.register_shader("ghost", &[]);

        let missing = Path::new("/nonexistent/shader.spv");
        assert!(watcher.watch(missing, id).is_err());
        assert_eq!(watcher.watched_count(), 0);
    }
}
