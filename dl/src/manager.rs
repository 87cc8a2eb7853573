//! Manager facade.
//!
//! Binds the metadata table and the library registry under one
//! init/teardown lifecycle and holds the search path used to locate
//! backing object files. Thin orchestration: metadata is set up before the
//! registry (libraries reference metadata by name at load time) and torn
//! down after it.
//!
//! # Locking contract
//!
//! The loader core takes no locks of its own. The global manager sits
//! behind a single `spin::Mutex`; a session must hold the guard for the
//! full duration of an acquire/load/unload/evict batch, which is what
//! [`with`] does. The session manager relies on cross-batch ordering, so
//! no finer-grained locking may be added below this point.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use spin::Mutex;

use crate::error::DlError;
use crate::mem::DlEnvironment;
use crate::metadata::MetadataTable;
use crate::registry::{LibHandle, LibraryRegistry};

/// Loader manager: metadata + registry + search path + collaborators.
pub struct DlManager<E: DlEnvironment> {
    base_path: String,
    metadata: MetadataTable,
    registry: LibraryRegistry,
    env: E,
}

impl<E: DlEnvironment> DlManager<E> {
    /// Create a manager. `base_path` is where backing object files live;
    /// a library named `n` is read from `{base_path}/{n}`.
    pub fn new(base_path: &str, env: E) -> Self {
        log::info!("[ORCA/DL] manager up (libraries under '{}')", base_path);
        Self {
            base_path: base_path.to_string(),
            metadata: MetadataTable::new(),
            registry: LibraryRegistry::new(),
            env,
        }
    }

    /// Parse a kernel metadata block into the metadata table. See
    /// [`MetadataTable::parse`].
    pub fn parse_metadata(
        &mut self,
        buf: &[u8],
        disambiguator: Option<u32>,
        collector: Option<&mut Vec<String>>,
    ) -> Result<(), DlError> {
        self.metadata.parse(buf, disambiguator, collector)
    }

    /// Bulk-remove metadata entries, typically the names one parse pass
    /// collected.
    pub fn drop_metadata(&mut self, names: &[String]) {
        for name in names {
            self.metadata.remove(name);
        }
    }

    /// Resolve or create registry entries for a batch of names.
    pub fn acquire(&mut self, names: &[&str]) -> Result<Vec<LibHandle>, DlError> {
        self.registry.acquire(names)
    }

    /// Take one reference on every listed library.
    pub fn inc_ref(&mut self, handles: &[LibHandle]) {
        self.registry.inc_ref(handles);
    }

    /// Drop one reference on every listed library.
    pub fn dec_ref(&mut self, handles: &[LibHandle]) {
        self.registry.dec_ref(handles);
    }

    /// Load every not-yet-loaded library in the batch.
    pub fn load(&mut self, handles: &[LibHandle]) -> Result<(), DlError> {
        self.registry
            .load(handles, &self.metadata, &self.base_path, &mut self.env)
    }

    /// Drop references and release images for entries reaching zero.
    pub fn unload(&mut self, handles: &[LibHandle]) {
        self.registry.unload(handles);
    }

    /// Rollback helper: delete listed libraries that never loaded.
    pub fn delete_unloaded(&mut self, handles: &[LibHandle]) {
        self.registry
            .delete_unloaded(handles, &mut self.metadata, &mut self.env);
    }

    /// Evict every loaded, unreferenced library. Returns the count.
    pub fn delete_zero_reference(&mut self) -> usize {
        self.registry.delete_zero_reference(&mut self.env)
    }

    /// Free everything unconditionally: registry first, metadata after,
    /// the reverse of initialization order.
    pub fn teardown(&mut self) {
        self.registry.teardown(&mut self.env);
        self.metadata.clear();
        log::info!("[ORCA/DL] manager down");
    }

    /// The metadata table (debug/introspection).
    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// The registry (debug/introspection).
    pub fn registry(&self) -> &LibraryRegistry {
        &self.registry
    }

    /// The collaborator bundle.
    pub fn environment(&self) -> &E {
        &self.env
    }

    /// Mutable collaborator bundle (simulation control, fault injection).
    pub fn environment_mut(&mut self) -> &mut E {
        &mut self.env
    }
}

// ── Global instance ─────────────────────────────────────────

/// Manager type used by the global singleton.
pub type BoxedManager = DlManager<Box<dyn DlEnvironment + Send>>;

/// Global loader manager. `None` until [`init`] runs.
static DL_MANAGER: Mutex<Option<BoxedManager>> = Mutex::new(None);

/// Initialise the global manager. Call once at accelerator bring-up, after
/// the collaborating allocators exist. A repeated call replaces the
/// previous manager after tearing it down.
pub fn init(base_path: &str, env: Box<dyn DlEnvironment + Send>) {
    let mut slot = DL_MANAGER.lock();
    if let Some(old) = slot.as_mut() {
        log::warn!("[ORCA/DL] re-init: tearing down previous manager");
        old.teardown();
    }
    *slot = Some(DlManager::new(base_path, env));
}

/// Tear down and drop the global manager. Process shutdown only.
pub fn teardown() {
    let mut slot = DL_MANAGER.lock();
    if let Some(manager) = slot.as_mut() {
        manager.teardown();
    }
    *slot = None;
}

/// Run `f` against the global manager, or return `None` when [`init`] has
/// not run. The guard is held for the whole call, which is what serializes
/// concurrent sessions: keep an entire batch inside one closure.
pub fn with<R>(f: impl FnOnce(&mut BoxedManager) -> R) -> Option<R> {
    let mut slot = DL_MANAGER.lock();
    slot.as_mut().map(f)
}

// ── Tests ───────────────────────────────────────────────────
