//! Policy snapshots with optional hot-reload.
//!
//! Readers take an `Arc<Repository>` once per request. A reload builds a
//! complete new repository and swaps it in under a short write lock, so a
//! reader never sees a partially replaced module set. A failed reload
//! leaves the previous snapshot in service.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use super::evaluator::RuleEvaluator;
use super::repository::{is_policy_source, Repository};
use super::PolicyError;

/// Quiet period before a burst of file events triggers one reload.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

/// Holder of the current policy repository snapshot.
pub struct PolicyStore {
    root: PathBuf,
    evaluator: Arc<dyn RuleEvaluator>,
    current: RwLock<Arc<Repository>>,
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let modules = match self.current.read() {
            Ok(repository) => repository.len(),
            Err(_) => 0,
        };
        f.debug_struct("PolicyStore")
            .field("root", &self.root)
            .field("modules", &modules)
            .finish()
    }
}

impl PolicyStore {
    /// Load the initial repository from `root`.
    ///
    /// # Errors
    ///
    /// Returns the repository load error; there is no partial store.
    pub fn load(
        root: impl Into<PathBuf>,
        evaluator: Arc<dyn RuleEvaluator>,
    ) -> Result<Self, PolicyError> {
        let root = root.into();
        let repository = Repository::load(&root, evaluator.as_ref())?;
        Ok(Self {
            root,
            evaluator,
            current: RwLock::new(Arc::new(repository)),
        })
    }

    /// The current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Unavailable`] if the snapshot lock is poisoned.
    pub fn snapshot(&self) -> Result<Arc<Repository>, PolicyError> {
        self.current
            .read()
            .map(|repository| Arc::clone(&repository))
            .map_err(|_| PolicyError::Unavailable("snapshot lock poisoned".to_owned()))
    }

    /// Rescan the root and swap in the new repository.
    ///
    /// Returns the number of modules in the new snapshot.
    ///
    /// # Errors
    ///
    /// Returns the load error and keeps the previous snapshot.
    pub fn reload(&self) -> Result<usize, PolicyError> {
        let fresh = Repository::load(&self.root, self.evaluator.as_ref())?;
        let count = fresh.len();
        let mut current = self
            .current
            .write()
            .map_err(|_| PolicyError::Unavailable("snapshot lock poisoned".to_owned()))?;
        *current = Arc::new(fresh);
        Ok(count)
    }

    /// The evaluator used to check and run modules.
    pub fn evaluator(&self) -> &dyn RuleEvaluator {
        self.evaluator.as_ref()
    }

    /// Policy root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Keeps the policy directory watcher alive. Dropping it stops reloads.
pub struct PolicyWatcher {
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for PolicyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyWatcher").finish_non_exhaustive()
    }
}

/// Whether a file event can change what a rescan would load.
///
/// Reading the tree during a reload raises open and access events, and on
/// some mounts an atime update; counting those would reload forever.
pub fn triggers_reload(kind: &EventKind) -> bool {
    match kind {
        EventKind::Any | EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        EventKind::Access(_) | EventKind::Other => false,
    }
}

/// Watch the store's root and reload on policy file changes.
///
/// # Errors
///
/// Returns [`PolicyError::Watch`] if the watcher cannot be started.
pub fn watch(store: Arc<PolicyStore>) -> Result<PolicyWatcher, PolicyError> {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if let Ok(evt) = event {
            if !triggers_reload(&evt.kind) {
                return;
            }
            for path in evt.paths {
                if tx.send(path).is_err() {
                    return;
                }
            }
        }
    })?;
    watcher.watch(store.root(), RecursiveMode::Recursive)?;

    let root = store.root().to_path_buf();
    std::thread::spawn(move || {
        while let Ok(first) = rx.recv() {
            let mut relevant = is_policy_source(&first);
            while let Ok(path) = rx.recv_timeout(RELOAD_DEBOUNCE) {
                relevant |= is_policy_source(&path);
            }
            if !relevant {
                continue;
            }
            match store.reload() {
                Ok(modules) => info!(modules, "policy repository reloaded"),
                Err(e) => warn!(error = %e, "policy reload failed, keeping previous snapshot"),
            }
        }
    });

    info!(root = %root.display(), "watching policy tree for changes");
    Ok(PolicyWatcher { _watcher: watcher })
}
