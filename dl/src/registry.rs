//! Library registry and lifecycle.
//!
//! Process-wide, name-keyed cache of library state. Per entry:
//!
//! ```text
//! absent → registered(unloaded) → loaded → [ref_count == 0] → evicted
//!                                   ↓  ↑
//!                              unloaded image (refs drop to zero;
//!                              regions and the loaded flag stay)
//! ```
//!
//! Dropping the last reference is NOT destruction. Hot libraries stay
//! resident across sessions until an explicit [`delete_zero_reference`]
//! pass reclaims them under memory pressure.
//!
//! No internal locking: every operation takes `&mut self`, and the session
//! manager serializes whole acquire/load/unload/evict batches behind the
//! manager mutex (see `manager`).
//!
//! [`delete_zero_reference`]: LibraryRegistry::delete_zero_reference

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::error::DlError;
use crate::image::{LinkTable, ObjectImage, Region};
use crate::loader::{self, LoadPlan};
use crate::mem::DlEnvironment;
use crate::metadata::MetadataTable;

// ── Types ───────────────────────────────────────────────────

/// Handle to a registry entry, keyed by library name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibHandle(String);

impl LibHandle {
    /// The library name this handle refers to.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LibHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One cached library.
#[derive(Debug, Default)]
pub struct Library {
    name: String,
    image: Option<ObjectImage>,
    link: Option<LinkTable>,
    program: Option<Region>,
    pointer_table: Option<Region>,
    loader_out: Option<Region>,
    ref_count: u32,
    loaded: bool,
}

impl Library {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Loader-output region, once a load has allocated one.
    pub fn loader_out(&self) -> Option<Region> {
        self.loader_out
    }
}

// ── Registry ────────────────────────────────────────────────

/// Name-keyed cache of libraries. At most one entry per name.
#[derive(Debug, Default)]
pub struct LibraryRegistry {
    libs: HashMap<String, Library>,
}

impl LibraryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch acquisition.
    ///
    /// Unseen names get a fresh registered-but-unloaded entry; loaded
    /// entries are reused. A present-but-unloaded entry means the name is
    /// already in flight in another batch, which is a caller protocol
    /// violation: the batch fails and every entry THIS call created is
    /// removed again, leaving pre-existing entries untouched.
    pub fn acquire(&mut self, names: &[&str]) -> Result<Vec<LibHandle>, DlError> {
        let mut handles = Vec::with_capacity(names.len());
        let mut created: Vec<String> = Vec::new();

        for &name in names {
            match self.libs.get(name) {
                None => {
                    self.libs.insert(name.to_string(), Library::new(name));
                    created.push(name.to_string());
                    handles.push(LibHandle(name.to_string()));
                    log::debug!("[ORCA/DL] registered '{}'", name);
                }
                Some(lib) if lib.loaded => {
                    handles.push(LibHandle(name.to_string()));
                }
                Some(_) => {
                    log::warn!(
                        "[ORCA/DL] '{}' is already being set up, aborting acquire batch",
                        name
                    );
                    for rollback in &created {
                        self.libs.remove(rollback);
                    }
                    return Err(DlError::DuplicateLibrary(name.to_string()));
                }
            }
        }
        Ok(handles)
    }

    /// Take one reference on every listed library.
    pub fn inc_ref(&mut self, handles: &[LibHandle]) {
        for handle in handles {
            if let Some(lib) = self.libs.get_mut(handle.name()) {
                lib.ref_count += 1;
            }
        }
    }

    /// Drop one reference on every listed library. A count already at zero
    /// stays at zero.
    pub fn dec_ref(&mut self, handles: &[LibHandle]) {
        for handle in handles {
            if let Some(lib) = self.libs.get_mut(handle.name()) {
                if lib.ref_count == 0 {
                    log::warn!("[ORCA/DL] '{}' reference count underflow ignored", lib.name);
                } else {
                    lib.ref_count -= 1;
                }
            }
        }
    }

    /// Load every not-yet-loaded library in the batch; already-loaded
    /// entries are untouched, so shared libraries survive re-acquisition
    /// without reloading.
    ///
    /// A failure aborts the batch. The failing library stays unloaded,
    /// keeping any regions it obtained, for the caller's
    /// [`delete_unloaded`](Self::delete_unloaded) rollback; memory written
    /// for earlier libraries in the batch is not unwound.
    pub fn load(
        &mut self,
        handles: &[LibHandle],
        metadata: &MetadataTable,
        base_path: &str,
        env: &mut dyn DlEnvironment,
    ) -> Result<(), DlError> {
        for handle in handles {
            match self.libs.get(handle.name()) {
                None => return Err(DlError::LibraryNotFound(handle.name().to_string())),
                Some(lib) if lib.loaded => {
                    log::debug!("[ORCA/DL] '{}' already loaded", handle.name());
                    continue;
                }
                Some(_) => {}
            }
            self.load_one(handle.name(), metadata, base_path, env)?;
        }
        Ok(())
    }

    fn load_one(
        &mut self,
        name: &str,
        metadata: &MetadataTable,
        base_path: &str,
        env: &mut dyn DlEnvironment,
    ) -> Result<(), DlError> {
        let kernels = metadata
            .kernel_table(name)
            .ok_or_else(|| DlError::MetadataMissing(name.to_string()))?;

        let path = format!("{}/{}", base_path, name);
        let bytes = env.read_image(&path)?;
        let image = env.parse_image(&bytes)?;
        let link = env.build_link_table(&image)?;
        let program_size = loader::program_footprint(&image, &link)?;

        let existing = match self.libs.get(name) {
            Some(lib) => (lib.program, lib.pointer_table, lib.loader_out),
            None => return Err(DlError::LibraryNotFound(name.to_string())),
        };

        // Each region attaches to the entry as soon as it exists, so a
        // later failure leaves it owned for the rollback path, and a
        // retried load reuses it instead of allocating twice.
        let program = match existing.0 {
            Some(region) => region,
            None => {
                let region = env.alloc_program(program_size)?;
                if let Some(lib) = self.libs.get_mut(name) {
                    lib.program = Some(region);
                }
                region
            }
        };
        let pointer_table = match existing.1 {
            Some(region) => region,
            None => {
                let region = env.alloc_pointer_table(name)?;
                if let Some(lib) = self.libs.get_mut(name) {
                    lib.pointer_table = Some(region);
                }
                region
            }
        };
        let loader_out = match existing.2 {
            Some(region) => region,
            None => {
                let region = env.alloc_loader_out(name, kernels.len() as u32)?;
                if let Some(lib) = self.libs.get_mut(name) {
                    lib.loader_out = Some(region);
                }
                region
            }
        };

        let plan = LoadPlan {
            image: &image,
            link: &link,
            kernels,
            program,
            pointer_table,
            loader_out,
        };
        loader::load_library(name, &plan, env.memory())?;

        if let Some(lib) = self.libs.get_mut(name) {
            lib.image = Some(image);
            lib.link = Some(link);
            lib.loaded = true;
        }
        log::info!("[ORCA/DL] loaded '{}' ({} kernels)", name, kernels.len());
        Ok(())
    }

    /// Drop one reference per listed library; entries that reach zero
    /// release their object image and link table. Memory regions stay
    /// owned, and the loaded flag stays set (see the flag test below).
    pub fn unload(&mut self, handles: &[LibHandle]) {
        self.dec_ref(handles);
        for handle in handles {
            if let Some(lib) = self.libs.get_mut(handle.name()) {
                if lib.ref_count == 0 && (lib.image.is_some() || lib.link.is_some()) {
                    lib.image = None;
                    lib.link = None;
                    log::info!("[ORCA/DL] unloaded '{}' (image released)", lib.name);
                }
            }
        }
    }

    /// Rollback helper: delete every listed library that is not loaded,
    /// freeing its regions and removing its metadata entry.
    pub fn delete_unloaded(
        &mut self,
        handles: &[LibHandle],
        metadata: &mut MetadataTable,
        env: &mut dyn DlEnvironment,
    ) {
        for handle in handles {
            let unloaded = matches!(self.libs.get(handle.name()), Some(lib) if !lib.loaded);
            if !unloaded {
                continue;
            }
            if let Some(lib) = self.libs.remove(handle.name()) {
                Self::release_regions(lib, env);
                metadata.remove(handle.name());
                log::info!("[ORCA/DL] deleted '{}' (rollback)", handle.name());
            }
        }
    }

    /// Garbage-collection pass: evict every library that is loaded and
    /// unreferenced, and no others. Returns how many were evicted.
    pub fn delete_zero_reference(&mut self, env: &mut dyn DlEnvironment) -> usize {
        let victims: Vec<String> = self
            .libs
            .values()
            .filter(|lib| lib.loaded && lib.ref_count == 0)
            .map(|lib| lib.name.clone())
            .collect();

        for name in &victims {
            if let Some(lib) = self.libs.remove(name) {
                Self::release_regions(lib, env);
                log::info!("[ORCA/DL] evicted '{}'", name);
            }
        }
        victims.len()
    }

    /// Drop everything unconditionally. Process shutdown only.
    pub fn teardown(&mut self, env: &mut dyn DlEnvironment) {
        let count = self.libs.len();
        for (_, lib) in self.libs.drain() {
            Self::release_regions(lib, env);
        }
        if count > 0 {
            log::info!("[ORCA/DL] registry teardown dropped {} libraries", count);
        }
    }

    fn release_regions(lib: Library, env: &mut dyn DlEnvironment) {
        if let Some(region) = lib.program {
            env.free_program(region);
        }
        if let Some(region) = lib.pointer_table {
            env.free_pointer_table(region);
        }
        if let Some(region) = lib.loader_out {
            env.free_loader_out(region);
        }
    }

    // ── Queries ─────────────────────────────────────────────

    /// Entry for a name, if present.
    pub fn get(&self, name: &str) -> Option<&Library> {
        self.libs.get(name)
    }

    /// Whether an entry exists for this name.
    pub fn contains(&self, name: &str) -> bool {
        self.libs.contains_key(name)
    }

    /// Number of cached libraries.
    pub fn count(&self) -> usize {
        self.libs.len()
    }
}

// ── Tests ───────────────────────────────────────────────────
