//! Object image model.
//!
//! The external object parser and link-table builder produce these values;
//! the loader only consumes them. Section contents and their attribute
//! flags come straight out of the relocatable blob; the link table is the
//! builder's resolved mapping from section indices and symbol names to
//! final accelerator addresses.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use bitflags::bitflags;
use hashbrown::HashMap;

use crate::config::DATA_CLASS_COUNT;

/// Accelerator-addressable memory apertures.
///
/// Program memory, the global pointer table, and the loader-output buffer
/// are allocated per-library; the five data classes are shared spaces that
/// sections target at link-resolved offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aperture {
    /// Program (executable) memory.
    Program,
    /// Global pointer table memory. Never written by the loader; contents
    /// are established by allocator-side zero-initialization.
    PointerTable,
    /// Loader-output buffer: pointer-table base plus the resolved kernel
    /// table.
    LoaderOut,
    /// General data memory.
    Data,
    /// Scratch/local data memory.
    DataLocal,
    /// Tightly-coupled memory.
    Tcm,
    /// Tightly-coupled local memory.
    TcmLocal,
    /// Special-function/shared register space. The only data class whose
    /// writes are word-swapped, matching program memory's byte order.
    SharedSfr,
}

impl Aperture {
    /// Every aperture, in a stable order.
    pub const ALL: [Aperture; 8] = [
        Aperture::Program,
        Aperture::PointerTable,
        Aperture::LoaderOut,
        Aperture::Data,
        Aperture::DataLocal,
        Aperture::Tcm,
        Aperture::TcmLocal,
        Aperture::SharedSfr,
    ];

    /// The five data-memory classes, in placement order.
    pub const DATA_CLASSES: [Aperture; DATA_CLASS_COUNT] = [
        Aperture::Data,
        Aperture::DataLocal,
        Aperture::Tcm,
        Aperture::TcmLocal,
        Aperture::SharedSfr,
    ];

    /// Human-readable label for log and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Aperture::Program => "program",
            Aperture::PointerTable => "pointer-table",
            Aperture::LoaderOut => "loader-out",
            Aperture::Data => "data",
            Aperture::DataLocal => "data-local",
            Aperture::Tcm => "tcm",
            Aperture::TcmLocal => "tcm-local",
            Aperture::SharedSfr => "shared-sfr",
        }
    }
}

bitflags! {
    /// Section attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        /// Section contains executable code and targets program memory.
        const EXEC = 1 << 0;
        /// Section is writable at runtime.
        const WRITE = 1 << 1;
        /// Section carries initialized bytes in the image. Without this
        /// flag the section is zero-initialized at load.
        const INIT = 1 << 2;
    }
}

/// One relocatable section of an object image.
#[derive(Debug, Clone)]
pub struct Section {
    /// Index into the image's section table, and into the link table.
    pub index: u16,
    /// Destination aperture.
    pub aperture: Aperture,
    /// Attribute flags.
    pub flags: SectionFlags,
    /// Initialized bytes. Empty for zero-initialized sections.
    pub data: Vec<u8>,
    /// Size in the destination. Equals `data.len()` for initialized
    /// sections; zero-initialized sections have no source bytes.
    pub size: u32,
}

impl Section {
    /// Check if the section targets program memory.
    pub fn is_executable(&self) -> bool {
        self.flags.contains(SectionFlags::EXEC)
    }

    /// Check if the section is writable at runtime.
    pub fn is_writable(&self) -> bool {
        self.flags.contains(SectionFlags::WRITE)
    }

    /// Check if the section carries initialized bytes.
    pub fn is_initialized(&self) -> bool {
        self.flags.contains(SectionFlags::INIT)
    }
}

/// Parsed, section-structured representation of a library's backing
/// relocatable blob.
#[derive(Debug, Clone, Default)]
pub struct ObjectImage {
    pub sections: Vec<Section>,
}

impl ObjectImage {
    /// Sections targeting program memory.
    pub fn executable_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_executable())
    }

    /// Non-executable sections targeting one data-memory class.
    pub fn data_sections(&self, class: Aperture) -> impl Iterator<Item = &Section> + '_ {
        self.sections
            .iter()
            .filter(move |s| !s.is_executable() && s.aperture == class)
    }
}

/// Resolved mapping from section indices and symbol names to final
/// accelerator addresses. Produced by the external link-table builder; the
/// loader only queries it.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    section_offsets: HashMap<u16, u32>,
    symbols: HashMap<String, u32>,
}

impl LinkTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the resolved destination offset of a section.
    pub fn set_section_offset(&mut self, index: u16, offset: u32) {
        self.section_offsets.insert(index, offset);
    }

    /// Record the resolved address of a symbol.
    pub fn define_symbol(&mut self, name: &str, address: u32) {
        self.symbols.insert(name.to_string(), address);
    }

    /// Destination offset of a section, if resolved.
    pub fn section_offset(&self, index: u16) -> Option<u32> {
        self.section_offsets.get(&index).copied()
    }

    /// Accelerator address of a symbol, if resolved.
    pub fn symbol(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }
}

/// A contiguous range inside one aperture, owned by a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u32,
    pub size: u32,
}
