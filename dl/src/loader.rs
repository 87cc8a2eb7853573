//! Section loader.
//!
//! Materializes one library's object image into accelerator memory once its
//! destination regions are known. Steps run in a fixed order:
//!
//! 1. Kernel-table fix-up: resolve each kernel's entry-point triple through
//!    the link table and write the records into the loader-output region.
//! 2. Program-memory placement: copy executable sections, word-swapped.
//! 3. Pointer-table stamp: record the pointer-table base in the
//!    loader-output header. No data copy; the table arrives zeroed from the
//!    allocator.
//! 4. Data-memory placement, independently per class: zero-fill
//!    uninitialized sections, copy the rest (word-swapped only for the
//!    special/shared register class).
//!
//! A resolution or write failure aborts the library's load; bytes already
//! written are not unwound. The registry leaves the library unloaded for
//! the caller's rollback path.

use alloc::string::ToString;
use alloc::vec::Vec;

use crate::config::{
    DL_OUT_KERNEL_TABLE_OFFSET, DL_OUT_POINTER_TABLE_OFFSET, ENTRY_NOOP, KERNEL_RECORD_STRIDE,
    WORD_SIZE,
};
use crate::error::DlError;
use crate::image::{Aperture, LinkTable, ObjectImage, Region, SectionFlags};
use crate::mem::TargetMemory;
use crate::metadata::KernelTable;

// ── Placement policy ────────────────────────────────────────

/// How bytes travel from an image section to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPolicy {
    /// Copy source bytes unchanged.
    Verbatim,
    /// Copy source bytes, reversing byte order within each machine word.
    WordSwap,
    /// Ignore source bytes; zero the destination range.
    ZeroFill,
}

/// Placement policy for a section, total over aperture × flags.
///
/// The special/shared register aperture shares program memory's hardware
/// byte order; the other four data classes do not. The two copy paths stay
/// separate.
pub fn copy_policy(aperture: Aperture, flags: SectionFlags) -> CopyPolicy {
    if !flags.contains(SectionFlags::INIT) {
        return CopyPolicy::ZeroFill;
    }
    match aperture {
        Aperture::Program | Aperture::SharedSfr => CopyPolicy::WordSwap,
        Aperture::PointerTable
        | Aperture::LoaderOut
        | Aperture::Data
        | Aperture::DataLocal
        | Aperture::Tcm
        | Aperture::TcmLocal => CopyPolicy::Verbatim,
    }
}

/// Reverse byte order within each machine word. A trailing partial word is
/// reversed within itself; real images are word-aligned.
fn swap_words(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    for chunk in src.chunks(WORD_SIZE) {
        out.extend(chunk.iter().rev());
    }
    out
}

// ── Load plan ───────────────────────────────────────────────

/// Everything the loader needs to place one library.
pub struct LoadPlan<'a> {
    pub image: &'a ObjectImage,
    pub link: &'a LinkTable,
    pub kernels: &'a KernelTable,
    pub program: Region,
    pub pointer_table: Region,
    pub loader_out: Region,
}

/// Program-memory bytes an image needs: the end of the furthest executable
/// section as placed by the link table.
pub fn program_footprint(image: &ObjectImage, link: &LinkTable) -> Result<u32, DlError> {
    let mut end = 0u32;
    for sec in image.executable_sections() {
        let offset = link
            .section_offset(sec.index)
            .ok_or(DlError::UnresolvedSection(sec.index))?;
        end = end.max(offset + sec.size);
    }
    Ok(end)
}

/// Load one library into accelerator memory.
pub fn load_library(
    name: &str,
    plan: &LoadPlan<'_>,
    mem: &mut dyn TargetMemory,
) -> Result<(), DlError> {
    fix_up_kernel_table(plan, mem)?;
    place_program_sections(plan, mem)?;
    place_pointer_table(plan, mem)?;
    for class in Aperture::DATA_CLASSES {
        place_data_sections(plan, class, mem)?;
    }
    log::debug!(
        "[ORCA/DL] placed '{}' ({} sections, {} kernels)",
        name,
        plan.image.sections.len(),
        plan.kernels.len()
    );
    Ok(())
}

/// Resolve one entry-point name. Absent names are valid and resolve to the
/// no-op sentinel; a present name that the link table does not know aborts
/// the load.
fn resolve_entry(link: &LinkTable, name: Option<&str>) -> Result<u32, DlError> {
    match name {
        None => Ok(ENTRY_NOOP),
        Some(n) => link
            .symbol(n)
            .ok_or_else(|| DlError::UnresolvedSymbol(n.to_string())),
    }
}

/// Step 1: write the resolved (pre, exec, post) record for every kernel at
/// a fixed stride in the loader-output region.
fn fix_up_kernel_table(plan: &LoadPlan<'_>, mem: &mut dyn TargetMemory) -> Result<(), DlError> {
    for (i, entry) in plan.kernels.entries().enumerate() {
        let pre = resolve_entry(plan.link, entry.pre.as_deref())?;
        let exec = resolve_entry(plan.link, entry.exec.as_deref())?;
        let post = resolve_entry(plan.link, entry.post.as_deref())?;

        let record =
            plan.loader_out.base + DL_OUT_KERNEL_TABLE_OFFSET + i as u32 * KERNEL_RECORD_STRIDE;
        mem.write(Aperture::LoaderOut, record, &pre.to_le_bytes())?;
        mem.write(Aperture::LoaderOut, record + 4, &exec.to_le_bytes())?;
        mem.write(Aperture::LoaderOut, record + 8, &post.to_le_bytes())?;
    }
    Ok(())
}

/// Step 2: place executable sections at `program_base + link_offset`.
fn place_program_sections(plan: &LoadPlan<'_>, mem: &mut dyn TargetMemory) -> Result<(), DlError> {
    for sec in plan.image.executable_sections() {
        let offset = plan
            .link
            .section_offset(sec.index)
            .ok_or(DlError::UnresolvedSection(sec.index))?;
        let dest = plan.program.base + offset;
        match copy_policy(Aperture::Program, sec.flags) {
            CopyPolicy::ZeroFill => mem.fill(Aperture::Program, dest, sec.size, 0)?,
            CopyPolicy::WordSwap => mem.write(Aperture::Program, dest, &swap_words(&sec.data))?,
            CopyPolicy::Verbatim => mem.write(Aperture::Program, dest, &sec.data)?,
        }
    }
    Ok(())
}

/// Step 3: stamp the pointer-table base into the loader-output header.
fn place_pointer_table(plan: &LoadPlan<'_>, mem: &mut dyn TargetMemory) -> Result<(), DlError> {
    mem.write(
        Aperture::LoaderOut,
        plan.loader_out.base + DL_OUT_POINTER_TABLE_OFFSET,
        &plan.pointer_table.base.to_le_bytes(),
    )
}

/// Step 4 for one data class: sections land at their link-resolved offsets
/// inside the class aperture.
fn place_data_sections(
    plan: &LoadPlan<'_>,
    class: Aperture,
    mem: &mut dyn TargetMemory,
) -> Result<(), DlError> {
    for sec in plan.image.data_sections(class) {
        let dest = plan
            .link
            .section_offset(sec.index)
            .ok_or(DlError::UnresolvedSection(sec.index))?;
        match copy_policy(class, sec.flags) {
            CopyPolicy::ZeroFill => mem.fill(class, dest, sec.size, 0)?,
            CopyPolicy::WordSwap => mem.write(class, dest, &swap_words(&sec.data))?,
            CopyPolicy::Verbatim => mem.write(class, dest, &sec.data)?,
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────
