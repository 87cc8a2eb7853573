//! External collaborator contracts.
//!
//! The loader core performs no I/O and owns no memory pools. Backing-file
//! access, object parsing, link-table building, and the three per-library
//! region allocators all belong to the surrounding driver stack and are
//! consumed through the traits here. A stuck or failing collaborator
//! surfaces as an ordinary `DlError`; the core never retries.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::DlError;
use crate::image::{Aperture, LinkTable, ObjectImage, Region};

/// Mutable access to accelerator-addressable memory.
///
/// Offsets are aperture-relative. Implementations must bounds-check and
/// report overruns as `DlError::MemoryFault`.
pub trait TargetMemory {
    /// Copy `bytes` into `ap` starting at `offset`.
    fn write(&mut self, ap: Aperture, offset: u32, bytes: &[u8]) -> Result<(), DlError>;

    /// Set `len` bytes of `ap` starting at `offset` to `value`.
    fn fill(&mut self, ap: Aperture, offset: u32, len: u32, value: u8) -> Result<(), DlError>;
}

/// The bundle of external collaborators a load batch runs against.
///
/// One environment serves the whole manager lifetime; calls arrive on the
/// caller's thread under the manager lock, never concurrently.
pub trait DlEnvironment {
    /// Read the backing relocatable blob at `path`.
    fn read_image(&mut self, path: &str) -> Result<Vec<u8>, DlError>;

    /// Parse a blob into its section-structured representation.
    fn parse_image(&mut self, bytes: &[u8]) -> Result<ObjectImage, DlError>;

    /// Resolve section placements and symbol addresses for an image.
    fn build_link_table(&mut self, image: &ObjectImage) -> Result<LinkTable, DlError>;

    /// Allocate `size` bytes of program memory.
    fn alloc_program(&mut self, size: u32) -> Result<Region, DlError>;

    /// Return a program-memory region to its pool.
    fn free_program(&mut self, region: Region);

    /// Allocate a zero-initialized global pointer table for `lib`.
    fn alloc_pointer_table(&mut self, lib: &str) -> Result<Region, DlError>;

    /// Return a pointer-table region to its pool.
    fn free_pointer_table(&mut self, region: Region);

    /// Allocate a loader-output region for `lib` sized for `kernel_count`
    /// resolved kernel records.
    fn alloc_loader_out(&mut self, lib: &str, kernel_count: u32) -> Result<Region, DlError>;

    /// Return a loader-output region to its pool.
    fn free_loader_out(&mut self, region: Region);

    /// The accelerator memory the loader writes into.
    fn memory(&mut self) -> &mut dyn TargetMemory;
}

impl<T: DlEnvironment + ?Sized> DlEnvironment for Box<T> {
    fn read_image(&mut self, path: &str) -> Result<Vec<u8>, DlError> {
        (**self).read_image(path)
    }

    fn parse_image(&mut self, bytes: &[u8]) -> Result<ObjectImage, DlError> {
        (**self).parse_image(bytes)
    }

    fn build_link_table(&mut self, image: &ObjectImage) -> Result<LinkTable, DlError> {
        (**self).build_link_table(image)
    }

    fn alloc_program(&mut self, size: u32) -> Result<Region, DlError> {
        (**self).alloc_program(size)
    }

    fn free_program(&mut self, region: Region) {
        (**self).free_program(region)
    }

    fn alloc_pointer_table(&mut self, lib: &str) -> Result<Region, DlError> {
        (**self).alloc_pointer_table(lib)
    }

    fn free_pointer_table(&mut self, region: Region) {
        (**self).free_pointer_table(region)
    }

    fn alloc_loader_out(&mut self, lib: &str, kernel_count: u32) -> Result<Region, DlError> {
        (**self).alloc_loader_out(lib, kernel_count)
    }

    fn free_loader_out(&mut self, region: Region) {
        (**self).free_loader_out(region)
    }

    fn memory(&mut self) -> &mut dyn TargetMemory {
        (**self).memory()
    }
}
