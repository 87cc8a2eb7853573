//! Loader error types.
//!
//! Every failure in the loader core is surfaced synchronously as a
//! `DlError`; there is no background retry or deferred recovery here. The
//! session manager decides whether to retry a batch, abandon the session,
//! or propagate. None of these errors is fatal to the process; eviction
//! and re-acquisition are always retryable by a fresh batch.

use alloc::string::String;
use core::fmt;

use crate::image::Aperture;

/// Loader/linker error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DlError {
    /// An external allocator reported out-of-memory. Carries the pool name.
    OutOfMemory(&'static str),
    /// `acquire` found a registered-but-unloaded entry for this name.
    /// A name may not be in flight twice.
    DuplicateLibrary(String),
    /// No registry entry exists for this handle.
    LibraryNotFound(String),
    /// No kernel table was parsed for this library name.
    MetadataMissing(String),
    /// The metadata token stream ended before a required closing element,
    /// or an element appeared where it cannot.
    MalformedMetadata(&'static str),
    /// A kernel entry-point name did not resolve in the link table.
    UnresolvedSymbol(String),
    /// A section index has no offset in the link table.
    UnresolvedSection(u16),
    /// The object image was rejected by the external parser.
    BadImage(&'static str),
    /// The backing file could not be read.
    Io(&'static str),
    /// A write or fill fell outside its target aperture.
    MemoryFault {
        aperture: Aperture,
        offset: u32,
        len: u32,
    },
}

impl fmt::Display for DlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DlError::OutOfMemory(pool) => write!(f, "{} allocator out of memory", pool),
            DlError::DuplicateLibrary(name) => {
                write!(f, "library '{}' is already being set up", name)
            }
            DlError::LibraryNotFound(name) => write!(f, "library '{}' not found", name),
            DlError::MetadataMissing(name) => {
                write!(f, "no kernel table parsed for library '{}'", name)
            }
            DlError::MalformedMetadata(what) => write!(f, "malformed metadata: {}", what),
            DlError::UnresolvedSymbol(name) => write!(f, "unresolved entry point '{}'", name),
            DlError::UnresolvedSection(index) => {
                write!(f, "section {} has no link-table offset", index)
            }
            DlError::BadImage(what) => write!(f, "object image rejected: {}", what),
            DlError::Io(what) => write!(f, "backing file read failed: {}", what),
            DlError::MemoryFault {
                aperture,
                offset,
                len,
            } => write!(
                f,
                "write of {} bytes at {:#x} falls outside {} memory",
                len,
                offset,
                aperture.as_str()
            ),
        }
    }
}
