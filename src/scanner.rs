//! Filtered character stream over a `TextSource` (spec.md §4.3).
//!
//! Collapses comments and whitespace, tracks and absorbs CRLF line breaks,
//! and offers its own small push-back stack on top of the text source's
//! byte-level one so the parser can try a lexeme and back out of it without
//! losing line/column bookkeeping.

use crate::error::{Diagnostic, Diagnostics, ErrorKind};
use crate::text_source::{TextSource, MARKER};

/// A run of one or more spaces/tabs, collapsed to a single token.
pub const SPACE: u8 = 0x01;
/// A single line break (LF, CR, or CRLF absorbed as one).
pub const LNBRK: u8 = 0x02;

/// Frame push-back depth the scanner guarantees (spec.md §4.3).
const PENDING_CAPACITY: usize = 63;

pub fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

pub fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

pub struct Scanner {
    src: TextSource,
    pending: Vec<u8>,
    pub diagnostics: Diagnostics,
}

impl Scanner {
    pub fn new(src: TextSource) -> Self {
        Self {
            src,
            pending: Vec::with_capacity(PENDING_CAPACITY),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn line(&self) -> usize {
        self.src.line()
    }

    pub fn column(&self) -> usize {
        self.src.column()
    }

    fn warn(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let (line, col) = (self.line(), self.column());
        let mut d = Diagnostic::new(kind, line, col, message);
        if let Some(p) = self.src.path() {
            d = d.with_path(p.to_path_buf());
        }
        self.diagnostics.push(d);
    }

    /// Pushes a single previously-read character back onto the stream.
    pub fn unget_c(&mut self, c: u8) {
        if self.pending.len() >= PENDING_CAPACITY {
            // Caller asked for more look-behind than guaranteed; drop the
            // oldest pushed-back char rather than lose the newest one.
            self.pending.remove(0);
        }
        self.pending.push(c);
    }

    /// Returns `self.pending` to the underlying text source so a direct
    /// `TextSource` read (numbers, raw identifier bytes) sees a consistent
    /// cursor. Only safe for literal bytes, never for `SPACE`/`LNBRK`
    /// sentinels, which can stand for more than one raw byte.
    fn sync_raw(&mut self) {
        while let Some(c) = self.pending.pop() {
            debug_assert!(
                c != SPACE && c != LNBRK,
                "cannot sync a collapsed sentinel back to the byte stream"
            );
            self.src.ungetc(1);
        }
    }

    fn skip_block_comment(&mut self) {
        let mut depth = 1usize;
        loop {
            let c = self.src.getc();
            if c == MARKER {
                self.warn(ErrorKind::Lexical, "unterminated block comment");
                return;
            }
            if c == b'/' && self.src.peek() == b'*' {
                self.src.getc();
                depth += 1;
            } else if c == b'*' && self.src.peek() == b'/' {
                self.src.getc();
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
        }
    }

    /// Reads one filtered token: a literal byte, or `SPACE`/`LNBRK`, or
    /// `MARKER` at end of input. Comments are swallowed entirely.
    fn get_c_raw(&mut self) -> u8 {
        loop {
            let c = self.src.getc();
            match c {
                MARKER => return MARKER,
                b' ' | b'\t' => {
                    while matches!(self.src.peek(), b' ' | b'\t') {
                        self.src.getc();
                    }
                    return SPACE;
                }
                b'\r' => {
                    if self.src.peek() == b'\n' {
                        self.src.getc();
                    }
                    return LNBRK;
                }
                b'\n' => return LNBRK,
                b'#' => {
                    self.src.skip_line();
                    continue;
                }
                b'/' if self.src.peek() == b'/' => {
                    self.src.getc();
                    self.src.skip_line();
                    continue;
                }
                b'/' if self.src.peek() == b'*' => {
                    self.src.getc();
                    self.skip_block_comment();
                    continue;
                }
                other => return other,
            }
        }
    }

    pub fn get_c(&mut self) -> u8 {
        if let Some(c) = self.pending.pop() {
            return c;
        }
        self.get_c_raw()
    }

    pub fn get_c_skip_space(&mut self) -> u8 {
        loop {
            let c = self.get_c();
            if c != SPACE {
                return c;
            }
        }
    }

    /// Consumes the next non-space token if it equals `want`; otherwise
    /// pushes it back and returns `false`.
    pub fn try_c(&mut self, want: u8) -> bool {
        let c = self.get_c_skip_space();
        if c == want {
            true
        } else {
            self.unget_c(c);
            false
        }
    }

    /// Reads an identifier (`[A-Za-z_][A-Za-z0-9_]*`), truncated to 79
    /// bytes with a warning (spec.md §6). Assumes the caller already
    /// confirmed `is_ident_start` on the first character via `try_c`-style
    /// peeking, or passes it in.
    pub fn read_identifier(&mut self, first: u8) -> String {
        const MAX_IDENT: usize = 79;
        let mut buf = vec![first];
        loop {
            let c = self.get_c();
            if is_ident_continue(c) {
                buf.push(c);
            } else {
                self.unget_c(c);
                break;
            }
        }
        if buf.len() > MAX_IDENT {
            self.warn(
                ErrorKind::Lexical,
                format!("identifier truncated to {MAX_IDENT} bytes"),
            );
            buf.truncate(MAX_IDENT);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Parses a signed integer at the current position (after any
    /// whitespace the caller has already skipped). Delegates to the text
    /// source directly; see `sync_raw`.
    pub fn get_int(&mut self, signed: bool) -> Option<(i64, bool)> {
        self.sync_raw();
        let r = self.src.get_int(signed);
        if let Some((_, true)) = r {
            self.warn(ErrorKind::Numerical, "integer literal truncated to i32 range");
        }
        r
    }

    pub fn get_float(&mut self, signed: bool) -> Option<(f64, bool)> {
        self.sync_raw();
        self.src.get_float(signed)
    }

    pub fn path(&self) -> Option<std::path::PathBuf> {
        self.src.path().map(|p| p.to_path_buf())
    }
}
