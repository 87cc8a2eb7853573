//! Host-side simulated accelerator target.
//!
//! RAM-backed apertures plus an instrumented collaborator bundle, used for
//! bring-up on machines without the accelerator and by the test suites.
//! The pools count their allocator traffic and can be told to start
//! failing, which makes the loader's partial-failure paths reachable
//! without hardware.
//!
//! The simulated "parser" hands back fixtures installed with
//! [`SimEnvironment::install`]; the backing blob it reads is just the
//! fixture key. Real object parsing belongs to the device stack, not to
//! this crate (see `mem`).

use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use hashbrown::{HashMap, HashSet};

use crate::config::loader_out_size;
use crate::error::DlError;
use crate::image::{Aperture, LinkTable, ObjectImage, Region};
use crate::mem::{DlEnvironment, TargetMemory};

/// Default size of every simulated aperture, in bytes.
pub const SIM_APERTURE_SIZE: u32 = 64 * 1024;

/// Pointer-table bytes handed out per library.
pub const SIM_POINTER_TABLE_SIZE: u32 = 256;

// ── Target memory ───────────────────────────────────────────

/// RAM-backed accelerator memory.
pub struct SimTarget {
    apertures: HashMap<Aperture, Vec<u8>>,
}

impl SimTarget {
    /// Create a target whose apertures all hold `size` zeroed bytes.
    pub fn new(size: u32) -> Self {
        let mut apertures = HashMap::new();
        for ap in Aperture::ALL {
            apertures.insert(ap, vec![0u8; size as usize]);
        }
        Self { apertures }
    }

    /// Overwrite an entire aperture with `value`. Lets tests verify that
    /// zero-fill really clears prior contents.
    pub fn smear(&mut self, ap: Aperture, value: u8) {
        if let Some(bytes) = self.apertures.get_mut(&ap) {
            bytes.fill(value);
        }
    }

    /// Inspect a byte range of an aperture.
    pub fn bytes(&self, ap: Aperture, offset: u32, len: u32) -> &[u8] {
        let bytes = &self.apertures[&ap];
        &bytes[offset as usize..(offset + len) as usize]
    }

    /// Read one little-endian word of an aperture.
    pub fn word(&self, ap: Aperture, offset: u32) -> u32 {
        let b = self.bytes(ap, offset, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn range_mut(&mut self, ap: Aperture, offset: u32, len: u32) -> Result<&mut [u8], DlError> {
        let bytes = match self.apertures.get_mut(&ap) {
            Some(bytes) => bytes,
            None => {
                return Err(DlError::MemoryFault {
                    aperture: ap,
                    offset,
                    len,
                })
            }
        };
        let end = offset as usize + len as usize;
        if end > bytes.len() {
            return Err(DlError::MemoryFault {
                aperture: ap,
                offset,
                len,
            });
        }
        Ok(&mut bytes[offset as usize..end])
    }
}

impl TargetMemory for SimTarget {
    fn write(&mut self, ap: Aperture, offset: u32, bytes: &[u8]) -> Result<(), DlError> {
        let dest = self.range_mut(ap, offset, bytes.len() as u32)?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    fn fill(&mut self, ap: Aperture, offset: u32, len: u32, value: u8) -> Result<(), DlError> {
        let dest = self.range_mut(ap, offset, len)?;
        dest.fill(value);
        Ok(())
    }
}

// ── Allocator pools ─────────────────────────────────────────

/// One simulated allocator pool: bump allocation plus call counters.
///
/// Freed regions are not recycled; `frees` only counts the calls, which is
/// all the lifecycle tests need.
#[derive(Debug, Default)]
pub struct SimPool {
    next: u32,
    limit: u32,
    /// Allocation calls served so far.
    pub allocs: usize,
    /// Free calls received so far.
    pub frees: usize,
    fail_at: Option<usize>,
}

impl SimPool {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Make allocation number `n` (0-based) and every later one fail with
    /// out-of-memory.
    pub fn fail_at(&mut self, n: usize) {
        self.fail_at = Some(n);
    }

    fn alloc(&mut self, size: u32, pool: &'static str) -> Result<Region, DlError> {
        if let Some(n) = self.fail_at {
            if self.allocs >= n {
                return Err(DlError::OutOfMemory(pool));
            }
        }
        let end = match self.next.checked_add(size) {
            Some(end) if end <= self.limit => end,
            _ => return Err(DlError::OutOfMemory(pool)),
        };
        let region = Region {
            base: self.next,
            size,
        };
        self.next = end;
        self.allocs += 1;
        Ok(region)
    }

    fn free(&mut self) {
        self.frees += 1;
    }
}

// ── Environment ─────────────────────────────────────────────

/// Simulated collaborator bundle.
pub struct SimEnvironment {
    /// The accelerator memory every load writes into.
    pub target: SimTarget,
    /// Program-memory allocator pool.
    pub program_pool: SimPool,
    /// Pointer-table allocator pool.
    pub pointer_pool: SimPool,
    /// Loader-output allocator pool.
    pub out_pool: SimPool,
    images: HashMap<String, (ObjectImage, LinkTable)>,
    unreadable: HashSet<String>,
    last_parsed: Option<String>,
}

impl SimEnvironment {
    /// Create an environment with default-sized apertures and pools.
    pub fn new() -> Self {
        Self {
            target: SimTarget::new(SIM_APERTURE_SIZE),
            program_pool: SimPool::new(SIM_APERTURE_SIZE),
            pointer_pool: SimPool::new(SIM_APERTURE_SIZE),
            out_pool: SimPool::new(SIM_APERTURE_SIZE),
            images: HashMap::new(),
            unreadable: HashSet::new(),
            last_parsed: None,
        }
    }

    /// Install the parse/link fixtures for one library name.
    pub fn install(&mut self, name: &str, image: ObjectImage, link: LinkTable) {
        self.images.insert(name.to_string(), (image, link));
    }

    /// Make `read_image` fail for one library name.
    pub fn make_unreadable(&mut self, name: &str) {
        self.unreadable.insert(name.to_string());
    }
}

impl Default for SimEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl DlEnvironment for SimEnvironment {
    fn read_image(&mut self, path: &str) -> Result<Vec<u8>, DlError> {
        // Backing files are "{base_path}/{name}"; the fixture key is the
        // final component.
        let name = path.rsplit('/').next().unwrap_or(path);
        if self.unreadable.contains(name) || !self.images.contains_key(name) {
            return Err(DlError::Io("no such image"));
        }
        Ok(name.as_bytes().to_vec())
    }

    fn parse_image(&mut self, bytes: &[u8]) -> Result<ObjectImage, DlError> {
        let name = core::str::from_utf8(bytes).map_err(|_| DlError::BadImage("not a fixture"))?;
        match self.images.get(name) {
            Some((image, _)) => {
                self.last_parsed = Some(name.to_string());
                Ok(image.clone())
            }
            None => Err(DlError::BadImage("unknown fixture")),
        }
    }

    fn build_link_table(&mut self, _image: &ObjectImage) -> Result<LinkTable, DlError> {
        // Calls arrive parse-then-link per library under the manager lock,
        // so the most recently parsed fixture is the one being linked.
        let name = self
            .last_parsed
            .as_ref()
            .ok_or(DlError::BadImage("link before parse"))?;
        match self.images.get(name) {
            Some((_, link)) => Ok(link.clone()),
            None => Err(DlError::BadImage("unknown fixture")),
        }
    }

    fn alloc_program(&mut self, size: u32) -> Result<Region, DlError> {
        self.program_pool.alloc(size, "program")
    }

    fn free_program(&mut self, _region: Region) {
        self.program_pool.free();
    }

    fn alloc_pointer_table(&mut self, _lib: &str) -> Result<Region, DlError> {
        let region = self.pointer_pool.alloc(SIM_POINTER_TABLE_SIZE, "pointer-table")?;
        // The contract says pointer tables arrive zero-initialized.
        self.target
            .fill(Aperture::PointerTable, region.base, region.size, 0)?;
        Ok(region)
    }

    fn free_pointer_table(&mut self, _region: Region) {
        self.pointer_pool.free();
    }

    fn alloc_loader_out(&mut self, _lib: &str, kernel_count: u32) -> Result<Region, DlError> {
        self.out_pool.alloc(loader_out_size(kernel_count), "loader-out")
    }

    fn free_loader_out(&mut self, _region: Region) {
        self.out_pool.free();
    }

    fn memory(&mut self) -> &mut dyn TargetMemory {
        &mut self.target
    }
}

// ── Tests ───────────────────────────────────────────────────
