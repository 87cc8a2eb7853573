//! Loader configuration constants.
//!
//! Values here fix the on-target layouts the loader emits and the sizing of
//! the metadata tokenizer. The layout constants are part of the accelerator
//! ABI; changing them requires a matching firmware change.

/// Accelerator machine word size in bytes.
pub const WORD_SIZE: usize = 4;

/// Fixed capacity of the metadata tokenizer window, in tokens.
///
/// A metadata buffer can be arbitrarily larger than any reasonable token
/// table, so tokenization suspends when the window fills and resumes from
/// the saved cursor once the consumer has drained it.
pub const TOKEN_WINDOW: usize = 64;

/// Offset of the pointer-table base word inside the loader-output region.
pub const DL_OUT_POINTER_TABLE_OFFSET: u32 = 0;

/// Offset of the resolved kernel table inside the loader-output region.
pub const DL_OUT_KERNEL_TABLE_OFFSET: u32 = 4;

/// Size of one resolved kernel record in the loader-output region:
/// three little-endian words (pre, exec, post).
pub const KERNEL_RECORD_STRIDE: u32 = 12;

/// Address written for an absent pre/post entry point. Firmware treats a
/// phase at this address as "no work".
pub const ENTRY_NOOP: u32 = 0xFFFF_FFFF;

/// Number of data-memory classes (apertures other than program memory, the
/// pointer table, and the loader-output buffer).
pub const DATA_CLASS_COUNT: usize = 5;

/// Size a loader-output region must have for `n` kernels.
pub const fn loader_out_size(kernel_count: u32) -> u32 {
    DL_OUT_KERNEL_TABLE_OFFSET + kernel_count * KERNEL_RECORD_STRIDE
}
