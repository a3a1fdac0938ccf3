//! Single-pass tokenizer turning raw UTF-8 JSON text into a row store.
//!
//! One row per element: containers get a Start and an End row, scalars and
//! property names get one row each. Container rows are appended with
//! [`UNKNOWN_SIZE`] and backpatched with their child count once the
//! matching close token is reached. Locations are absolute offsets into
//! the logical concatenation of the input buffers; values that straddle a
//! buffer boundary are recorded as ordinary spans and reassembled by the
//! read path.

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{Result, WeftError};
use crate::metadb::{row_flags, ElementToken, MetaDb, UNKNOWN_SIZE};
use crate::metadb::row::MAX_LOCATION;
use crate::metadb::Cursor;

use super::buffers::ChunkedBuffers;

/// Tunables for the parse path.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Maximum container nesting depth before the parser rejects the
    /// document.
    pub max_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self { max_depth: 64 }
    }
}

impl ParseOptions {
    /// Overrides the maximum nesting depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

struct ContainerFrame {
    cursor: Cursor,
    row_index: u32,
    child_count: u32,
    has_complex_children: bool,
    is_object: bool,
}

pub(crate) struct Parser<'a> {
    input: &'a ChunkedBuffers,
    pos: usize,
    db: MetaDb,
    open: SmallVec<[ContainerFrame; 16]>,
    options: ParseOptions,
}

impl<'a> Parser<'a> {
    pub(crate) fn parse(input: &'a ChunkedBuffers, options: ParseOptions) -> Result<MetaDb> {
        let total = input.total_len();
        if total == 0 {
            return Err(WeftError::Parse {
                position: 0,
                message: "empty document".into(),
            });
        }
        if total > MAX_LOCATION as usize + 1 {
            return Err(WeftError::CapacityExceeded {
                field: "location",
                value: total as u64,
                bits: 27,
            });
        }
        // One row per ~12 input bytes is a reasonable shape for typical
        // subgraph responses; the store grows chunk-wise past it anyway.
        let estimated_rows = (total / 12).max(16).min(u32::MAX as usize) as u32;
        let mut parser = Parser {
            input,
            pos: 0,
            db: MetaDb::create_for_estimated_rows(estimated_rows),
            open: SmallVec::new(),
            options,
        };
        parser.skip_whitespace();
        parser.parse_value(0, row_flags::IS_ROOT)?;
        parser.skip_whitespace();
        if parser.pos < total {
            return Err(parser.error_here("trailing characters after document root"));
        }
        debug_assert!(parser.open.is_empty());
        trace!(rows = parser.db.len(), bytes = total, "parsed source document");
        Ok(parser.db)
    }

    fn parse_value(&mut self, parent_row: u32, flags: u8) -> Result<()> {
        match self.peek()? {
            b'{' => self.parse_object(parent_row, flags),
            b'[' => self.parse_array(parent_row, flags),
            b'"' => {
                self.parse_string_row(ElementToken::String, parent_row, flags)?;
                Ok(())
            }
            b'-' | b'0'..=b'9' => self.parse_number(parent_row, flags),
            b't' => self.parse_literal(b"true", ElementToken::True, parent_row, flags),
            b'f' => self.parse_literal(b"false", ElementToken::False, parent_row, flags),
            b'n' => self.parse_literal(b"null", ElementToken::Null, parent_row, flags),
            other => Err(self.error_here(&format!("unexpected byte 0x{other:02X}"))),
        }
    }

    fn parse_object(&mut self, parent_row: u32, flags: u8) -> Result<()> {
        let start = self.pos;
        self.pos += 1;
        let cursor = self.push_container(ElementToken::StartObject, start, parent_row, flags, true)?;
        let row_index = cursor.to_index();

        self.skip_whitespace();
        if self.peek()? == b'}' {
            self.pos += 1;
            return self.close_container(ElementToken::EndObject, self.pos - 1);
        }
        loop {
            self.skip_whitespace();
            if self.peek()? != b'"' {
                return Err(self.error_here("expected property name"));
            }
            self.parse_string_row(ElementToken::PropertyName, row_index, row_flags::NONE)?;
            self.skip_whitespace();
            if self.peek()? != b':' {
                return Err(self.error_here("expected ':' after property name"));
            }
            self.pos += 1;
            self.skip_whitespace();
            self.parse_value(row_index, row_flags::NONE)?;
            self.bump_child_count();
            self.skip_whitespace();
            match self.peek()? {
                b',' => {
                    self.pos += 1;
                }
                b'}' => {
                    self.pos += 1;
                    return self.close_container(ElementToken::EndObject, self.pos - 1);
                }
                _ => return Err(self.error_here("expected ',' or '}' in object")),
            }
        }
    }

    fn parse_array(&mut self, parent_row: u32, flags: u8) -> Result<()> {
        let start = self.pos;
        self.pos += 1;
        let cursor = self.push_container(ElementToken::StartArray, start, parent_row, flags, false)?;
        let row_index = cursor.to_index();

        self.skip_whitespace();
        if self.peek()? == b']' {
            self.pos += 1;
            return self.close_container(ElementToken::EndArray, self.pos - 1);
        }
        loop {
            self.skip_whitespace();
            self.parse_value(row_index, row_flags::NONE)?;
            self.bump_child_count();
            self.skip_whitespace();
            match self.peek()? {
                b',' => {
                    self.pos += 1;
                }
                b']' => {
                    self.pos += 1;
                    return self.close_container(ElementToken::EndArray, self.pos - 1);
                }
                _ => return Err(self.error_here("expected ',' or ']' in array")),
            }
        }
    }

    fn push_container(
        &mut self,
        token: ElementToken,
        location: usize,
        parent_row: u32,
        flags: u8,
        is_object: bool,
    ) -> Result<Cursor> {
        if self.open.len() >= self.options.max_depth {
            return Err(WeftError::Parse {
                position: location,
                message: format!("nesting deeper than {} levels", self.options.max_depth),
            });
        }
        if let Some(parent) = self.open.last_mut() {
            parent.has_complex_children = true;
        }
        let cursor = self.db.append(
            token,
            location as u32,
            UNKNOWN_SIZE as i32,
            0,
            parent_row,
            0,
            flags,
        )?;
        self.open.push(ContainerFrame {
            cursor,
            row_index: cursor.to_index(),
            child_count: 0,
            has_complex_children: false,
            is_object,
        });
        Ok(cursor)
    }

    fn close_container(&mut self, token: ElementToken, location: usize) -> Result<()> {
        let frame = self
            .open
            .pop()
            .ok_or(WeftError::InvalidState("container close without open frame"))?;
        debug_assert_eq!(frame.is_object, token == ElementToken::EndObject);
        self.db.append(
            token,
            location as u32,
            0,
            0,
            frame.row_index,
            0,
            row_flags::NONE,
        )?;
        self.db.set_size_or_length(frame.cursor, frame.child_count)?;
        if frame.has_complex_children {
            self.db.set_has_complex_children(frame.cursor)?;
        }
        Ok(())
    }

    fn bump_child_count(&mut self) {
        if let Some(frame) = self.open.last_mut() {
            frame.child_count += 1;
        }
    }

    /// Appends a row for the string starting at the current position and
    /// leaves the position after the closing quote. The recorded span
    /// excludes the quotes and keeps escapes raw.
    fn parse_string_row(
        &mut self,
        token: ElementToken,
        parent_row: u32,
        flags: u8,
    ) -> Result<Cursor> {
        debug_assert_eq!(self.peek().ok(), Some(b'"'));
        let content_start = self.pos + 1;
        let total = self.input.total_len();
        let mut pos = content_start;
        loop {
            if pos >= total {
                return Err(WeftError::Parse {
                    position: self.pos,
                    message: "unterminated string".into(),
                });
            }
            // Scan one contiguous run; runs end only at buffer boundaries,
            // so the outer loop stitches spans that straddle them.
            let run = self.input.contiguous_run(pos);
            let special = run
                .iter()
                .position(|&byte| byte == b'"' || byte == b'\\' || byte < 0x20);
            match special {
                None => pos += run.len(),
                Some(i) if run[i] == b'"' => {
                    let len = pos + i - content_start;
                    self.pos = pos + i + 1;
                    return self.db.append(
                        token,
                        content_start as u32,
                        len as i32,
                        0,
                        parent_row,
                        0,
                        flags,
                    );
                }
                Some(i) if run[i] == b'\\' => {
                    // Skip the escaped byte even when it opens the next run.
                    if pos + i + 1 >= total {
                        return Err(WeftError::Parse {
                            position: pos + i,
                            message: "unterminated escape sequence".into(),
                        });
                    }
                    pos += i + 2;
                }
                Some(i) => {
                    return Err(WeftError::Parse {
                        position: pos + i,
                        message: format!(
                            "unescaped control character 0x{:02X} in string",
                            run[i]
                        ),
                    });
                }
            }
        }
    }

    fn parse_number(&mut self, parent_row: u32, flags: u8) -> Result<()> {
        let start = self.pos;
        if self.peek()? == b'-' {
            self.pos += 1;
        }
        match self.peek_or_eof() {
            Some(b'0') => {
                self.pos += 1;
            }
            Some(b'1'..=b'9') => self.consume_digits(),
            _ => return Err(self.error_here("expected digit in number")),
        }
        if self.peek_or_eof() == Some(b'.') {
            self.pos += 1;
            if !matches!(self.peek_or_eof(), Some(b'0'..=b'9')) {
                return Err(self.error_here("expected digit after decimal point"));
            }
            self.consume_digits();
        }
        if matches!(self.peek_or_eof(), Some(b'e') | Some(b'E')) {
            self.pos += 1;
            if matches!(self.peek_or_eof(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if !matches!(self.peek_or_eof(), Some(b'0'..=b'9')) {
                return Err(self.error_here("expected digit in exponent"));
            }
            self.consume_digits();
        }
        let len = self.pos - start;
        self.db.append(
            ElementToken::Number,
            start as u32,
            len as i32,
            0,
            parent_row,
            0,
            flags,
        )?;
        Ok(())
    }

    fn parse_literal(
        &mut self,
        text: &'static [u8],
        token: ElementToken,
        parent_row: u32,
        flags: u8,
    ) -> Result<()> {
        let start = self.pos;
        for (i, expected) in text.iter().enumerate() {
            if self.input.byte_at(start + i) != Some(*expected) {
                return Err(WeftError::Parse {
                    position: start,
                    message: format!(
                        "invalid literal, expected '{}'",
                        std::str::from_utf8(text).expect("ascii literal")
                    ),
                });
            }
        }
        self.pos = start + text.len();
        self.db.append(
            token,
            start as u32,
            text.len() as i32,
            0,
            parent_row,
            0,
            flags,
        )?;
        Ok(())
    }

    fn consume_digits(&mut self) {
        while matches!(self.peek_or_eof(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(
            self.peek_or_eof(),
            Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')
        ) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Result<u8> {
        self.input.byte_at(self.pos).ok_or_else(|| WeftError::Parse {
            position: self.pos,
            message: "unexpected end of input".into(),
        })
    }

    fn peek_or_eof(&self) -> Option<u8> {
        self.input.byte_at(self.pos)
    }

    fn error_here(&self, message: &str) -> WeftError {
        WeftError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }
}
