//! Kernel metadata parser.
//!
//! Each firmware drop ships a compact markup block describing the callable
//! kernels of every library in the drop:
//!
//! ```text
//! <libs><count>2</count>
//!   <lib><name>alpha</name><count>2</count>
//!     <kernel><id>0</id><pre>a_pre</pre><exe>a_exe</exe><post>a_post</post></kernel>
//!     <kernel><id>1</id><exe>b_exe</exe></kernel>
//!   </lib>
//!   <lib><name>beta</name><count>1</count>
//!     <kernel><id>0</id><exe>c_exe</exe></kernel>
//!   </lib>
//! </libs>
//! ```
//!
//! The buffer can be arbitrarily larger than any reasonable token table, so
//! the tokenizer works through a fixed window of [`TOKEN_WINDOW`] tokens:
//! when the window fills before the buffer ends, tokenization suspends and
//! the next token request resumes it from the saved [`ParserCursor`]. The
//! consumer is three plain nested loops (libs → lib → kernel) over the
//! stream; it never sees the suspension.
//!
//! `pre` and `post` leaves are optional; absence becomes `None` in the
//! [`KernelEntry`]. Numeric leaves use strict base-10; a conversion failure
//! abandons the current `lib` element with a logged warning while the rest
//! of the buffer keeps parsing. Running out of tokens before a required
//! closing tag is structural corruption and fails the whole parse.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::config::TOKEN_WINDOW;
use crate::error::DlError;

// ── Tokens ──────────────────────────────────────────────────

/// One markup token.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// `<name>`
    Open(String),
    /// `</name>`
    Close(String),
    /// Text between tags (whitespace-trimmed, never empty).
    Text(String),
}

/// Byte position of a suspended tokenization pass.
///
/// A cursor is created per top-level parse and threaded through every
/// window refill; nothing about the tokenizer is process-wide, so parses
/// are reentrant and need no reset call.
#[derive(Debug, Clone, Copy, Default)]
struct ParserCursor {
    pos: usize,
}

impl ParserCursor {
    fn new() -> Self {
        Self { pos: 0 }
    }

    /// Refill `window` from the saved position until it holds
    /// [`TOKEN_WINDOW`] tokens or the buffer ends. Returns the number of
    /// tokens produced.
    fn fill_window(&mut self, buf: &[u8], window: &mut Vec<Token>) -> usize {
        window.clear();
        while window.len() < TOKEN_WINDOW {
            match self.next_token(buf) {
                Some(tok) => window.push(tok),
                None => break,
            }
        }
        window.len()
    }

    fn next_token(&mut self, buf: &[u8]) -> Option<Token> {
        loop {
            while self.pos < buf.len() && buf[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos >= buf.len() {
                return None;
            }

            if buf[self.pos] == b'<' {
                let close = self.pos + 1 < buf.len() && buf[self.pos + 1] == b'/';
                let start = self.pos + if close { 2 } else { 1 };
                let mut end = start;
                while end < buf.len() && buf[end] != b'>' {
                    end += 1;
                }
                if end >= buf.len() {
                    // Dangling '<' at the end of the buffer. Consume it;
                    // the consumer reports the truncation as structural.
                    self.pos = buf.len();
                    return None;
                }
                let name = text_of(&buf[start..end]);
                self.pos = end + 1;
                return Some(if close {
                    Token::Close(name)
                } else {
                    Token::Open(name)
                });
            }

            let start = self.pos;
            while self.pos < buf.len() && buf[self.pos] != b'<' {
                self.pos += 1;
            }
            let text = text_of(&buf[start..self.pos]);
            if !text.is_empty() {
                return Some(Token::Text(text));
            }
            // Whitespace-only run between tags; keep scanning.
        }
    }
}

fn text_of(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Streaming token source over one metadata buffer.
///
/// Owns the fixed-capacity window; `next` transparently refills it from the
/// cursor when it drains.
struct TokenStream<'a> {
    buf: &'a [u8],
    cursor: ParserCursor,
    window: Vec<Token>,
    read: usize,
}

impl<'a> TokenStream<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            cursor: ParserCursor::new(),
            window: Vec::with_capacity(TOKEN_WINDOW),
            read: 0,
        }
    }

    fn next(&mut self) -> Option<Token> {
        if self.read == self.window.len() {
            self.read = 0;
            if self.cursor.fill_window(self.buf, &mut self.window) == 0 {
                return None;
            }
        }
        let tok = self.window[self.read].clone();
        self.read += 1;
        Some(tok)
    }

    /// Next token, or the structural error `what` if the stream ended.
    fn expect(&mut self, what: &'static str) -> Result<Token, DlError> {
        self.next().ok_or(DlError::MalformedMetadata(what))
    }

    fn expect_open(&mut self, tag: &str, what: &'static str) -> Result<(), DlError> {
        match self.expect(what)? {
            Token::Open(name) if name == tag => Ok(()),
            _ => Err(DlError::MalformedMetadata(what)),
        }
    }

    fn expect_close(&mut self, tag: &str, what: &'static str) -> Result<(), DlError> {
        match self.expect(what)? {
            Token::Close(name) if name == tag => Ok(()),
            _ => Err(DlError::MalformedMetadata(what)),
        }
    }

    fn expect_text(&mut self, what: &'static str) -> Result<String, DlError> {
        match self.expect(what)? {
            Token::Text(text) => Ok(text),
            _ => Err(DlError::MalformedMetadata(what)),
        }
    }

    /// Read a `<tag>text</tag>` leaf.
    fn read_leaf(&mut self, tag: &str, what: &'static str) -> Result<String, DlError> {
        self.expect_open(tag, what)?;
        let text = self.expect_text(what)?;
        self.expect_close(tag, what)?;
        Ok(text)
    }

    /// Consume tokens until `</tag>`, honoring nesting of same-named
    /// elements. Structural error if the stream ends first.
    fn skip_to_close(&mut self, tag: &str, what: &'static str) -> Result<(), DlError> {
        let mut depth = 0u32;
        loop {
            match self.expect(what)? {
                Token::Open(name) if name == tag => depth += 1,
                Token::Close(name) if name == tag => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
    }
}

// ── Kernel tables ───────────────────────────────────────────

/// Entry-point name triple for one kernel. Absent phases are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelEntry {
    pub pre: Option<String>,
    pub exec: Option<String>,
    pub post: Option<String>,
}

/// Ordered kernel entries for one library.
///
/// The size is fixed at parse time from the declared count; kernel elements
/// land at the slot named by their `id` leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelTable {
    entries: Vec<KernelEntry>,
}

impl KernelTable {
    fn with_count(count: u32) -> Self {
        Self {
            entries: vec![KernelEntry::default(); count as usize],
        }
    }

    /// Place `entry` at slot `id`. Returns false when `id` is outside the
    /// declared count.
    fn set(&mut self, id: u32, entry: KernelEntry) -> bool {
        match self.entries.get_mut(id as usize) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    /// Number of kernels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `id`, if within the declared count.
    pub fn get(&self, id: u32) -> Option<&KernelEntry> {
        self.entries.get(id as usize)
    }

    /// Entries in kernel-index order.
    pub fn entries(&self) -> impl Iterator<Item = &KernelEntry> {
        self.entries.iter()
    }
}

/// Process-wide table: library name → kernel table.
#[derive(Debug, Default)]
pub struct MetadataTable {
    tables: HashMap<String, KernelTable>,
}

impl MetadataTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one metadata block, inserting one kernel table per library.
    ///
    /// With `disambiguator = Some(n)` every inserted key is suffixed `_n`,
    /// so one session can hold multiple instances of logically identical
    /// libraries. Every inserted key is appended to `collector` when one is
    /// supplied, enabling later bulk cleanup of exactly the names this pass
    /// introduced.
    pub fn parse(
        &mut self,
        buf: &[u8],
        disambiguator: Option<u32>,
        mut collector: Option<&mut Vec<String>>,
    ) -> Result<(), DlError> {
        let mut ts = TokenStream::new(buf);

        ts.expect_open("libs", "missing <libs>")?;
        let count_text = ts.read_leaf("count", "missing library count")?;
        let lib_count = parse_u32(&count_text)
            .ok_or(DlError::MalformedMetadata("library count is not a number"))?;

        for _ in 0..lib_count {
            self.parse_lib(&mut ts, disambiguator, collector.as_deref_mut())?;
        }

        ts.expect_close("libs", "missing </libs>")?;
        log::debug!("[ORCA/DL] metadata: {} libraries declared", lib_count);
        Ok(())
    }

    fn parse_lib(
        &mut self,
        ts: &mut TokenStream<'_>,
        disambiguator: Option<u32>,
        collector: Option<&mut Vec<String>>,
    ) -> Result<(), DlError> {
        ts.expect_open("lib", "missing <lib>")?;
        let name = ts.read_leaf("name", "missing library name")?;
        let count_text = ts.read_leaf("count", "missing kernel count")?;

        let kernel_count = match parse_u32(&count_text) {
            Some(n) => n,
            None => {
                log::warn!(
                    "[ORCA/DL] metadata: bad kernel count '{}' for '{}', skipping library",
                    count_text,
                    name
                );
                return ts.skip_to_close("lib", "unterminated <lib>");
            }
        };

        let mut table = KernelTable::with_count(kernel_count);
        for _ in 0..kernel_count {
            match parse_kernel(ts)? {
                Some((id, entry)) => {
                    if !table.set(id, entry) {
                        log::warn!(
                            "[ORCA/DL] metadata: kernel id {} outside declared count for '{}', skipping library",
                            id,
                            name
                        );
                        return ts.skip_to_close("lib", "unterminated <lib>");
                    }
                }
                None => {
                    log::warn!(
                        "[ORCA/DL] metadata: bad kernel id in '{}', skipping library",
                        name
                    );
                    return ts.skip_to_close("lib", "unterminated <lib>");
                }
            }
        }
        ts.expect_close("lib", "missing </lib>")?;

        let key = match disambiguator {
            Some(n) => format!("{}_{}", name, n),
            None => name,
        };
        log::debug!("[ORCA/DL] metadata: '{}' ({} kernels)", key, kernel_count);
        self.tables.insert(key.clone(), table);
        if let Some(names) = collector {
            names.push(key);
        }
        Ok(())
    }

    /// Kernel table for a library name, if one was parsed.
    pub fn kernel_table(&self, name: &str) -> Option<&KernelTable> {
        self.tables.get(name)
    }

    /// Remove one library's kernel table. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    /// Number of libraries with a parsed kernel table.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Names with a parsed kernel table, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }

    /// Drop every kernel table. Manager teardown only.
    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

/// Parse a kernel element. `Ok(None)` means the element was read but its
/// `id` leaf failed numeric conversion (tolerated by the caller); errors
/// are structural.
fn parse_kernel(ts: &mut TokenStream<'_>) -> Result<Option<(u32, KernelEntry)>, DlError> {
    ts.expect_open("kernel", "missing <kernel>")?;

    let mut id: Option<u32> = None;
    let mut bad_number = false;
    let mut entry = KernelEntry::default();

    loop {
        match ts.expect("unterminated <kernel>")? {
            Token::Close(tag) if tag == "kernel" => break,
            Token::Open(tag) => {
                let text = ts.expect_text("missing leaf value in <kernel>")?;
                ts.expect_close(&tag, "unterminated leaf in <kernel>")?;
                match tag.as_str() {
                    "id" => match parse_u32(&text) {
                        Some(n) => id = Some(n),
                        None => bad_number = true,
                    },
                    "pre" => entry.pre = Some(text),
                    "exe" => entry.exec = Some(text),
                    "post" => entry.post = Some(text),
                    // Unknown leaves from newer toolchains are ignored.
                    _ => {}
                }
            }
            _ => return Err(DlError::MalformedMetadata("unexpected token in <kernel>")),
        }
    }

    match id {
        Some(id) if !bad_number => Ok(Some((id, entry))),
        _ => Ok(None),
    }
}

/// Strict base-10 conversion: digits only, no sign, no radix prefixes.
fn parse_u32(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

// ── Tests ───────────────────────────────────────────────────
