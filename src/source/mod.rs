//! Read and write paths over one subgraph response document.
//!
//! A [`SourceResultDocument`] pairs the raw response bytes with a row
//! store built either by parsing ([`SourceResultDocument::parse`]) or
//! programmatically ([`builder::SourceResultDocumentBuilder`]); the two
//! paths produce indistinguishable documents. Elements borrow from the
//! document and resolve scalar bytes lazily, reassembling values that
//! straddle an input-buffer boundary.

pub mod buffers;
pub mod builder;
pub mod parser;

use std::borrow::Cow;

use bytes::Bytes;
use tracing::debug;

pub use buffers::{ChunkedBuffers, BUFFER_SIZE};
pub use parser::ParseOptions;

use crate::error::{Result, WeftError};
use crate::metadb::{Cursor, ElementToken, MetaDb, Row, ValueKind};

/// An immutable, lazily-indexed view over one subgraph response.
pub struct SourceResultDocument {
    buffers: ChunkedBuffers,
    db: MetaDb,
    disposed: bool,
}

impl SourceResultDocument {
    /// Parses UTF-8 JSON text held in fixed-size transport buffers.
    ///
    /// `last_buffer_len` is the number of valid bytes in the final buffer;
    /// all preceding buffers must be full.
    pub fn parse(buffers: Vec<Bytes>, last_buffer_len: usize) -> Result<Self> {
        Self::parse_with(buffers, last_buffer_len, ParseOptions::default())
    }

    /// [`SourceResultDocument::parse`] with explicit options.
    pub fn parse_with(
        buffers: Vec<Bytes>,
        last_buffer_len: usize,
        options: ParseOptions,
    ) -> Result<Self> {
        let buffers = ChunkedBuffers::new(buffers, last_buffer_len)?;
        let db = parser::Parser::parse(&buffers, options)?;
        Ok(Self {
            buffers,
            db,
            disposed: false,
        })
    }

    /// Parses a contiguous text payload. Convenience for callers that do
    /// not hand over pooled transport buffers.
    pub fn parse_text(text: &str) -> Result<Self> {
        let payload = Bytes::copy_from_slice(text.as_bytes());
        let buffers = ChunkedBuffers::from_contiguous(payload);
        let db = parser::Parser::parse(&buffers, ParseOptions::default())?;
        Ok(Self {
            buffers,
            db,
            disposed: false,
        })
    }

    pub(crate) fn from_parts(buffers: ChunkedBuffers, db: MetaDb) -> Self {
        Self {
            buffers,
            db,
            disposed: false,
        }
    }

    /// The document's root element.
    pub fn root(&self) -> Result<SourceElement<'_>> {
        self.ensure_live()?;
        if self.db.is_empty() {
            return Err(WeftError::InvalidState("document has no rows"));
        }
        Ok(SourceElement {
            doc: self,
            index: 0,
        })
    }

    /// Releases the backing buffers and row store. Idempotent; reads fail
    /// afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        debug!(rows = self.db.len(), "disposing source document");
        self.db.dispose();
        self.buffers = ChunkedBuffers::new(Vec::new(), 0).expect("empty buffers are valid");
        self.disposed = true;
    }

    /// Whether [`SourceResultDocument::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn db(&self) -> &MetaDb {
        &self.db
    }

    pub(crate) fn buffers(&self) -> &ChunkedBuffers {
        &self.buffers
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(WeftError::InvalidState("source document disposed"));
        }
        Ok(())
    }
}

/// A borrowed handle to one element of a source document.
#[derive(Copy, Clone)]
pub struct SourceElement<'a> {
    doc: &'a SourceResultDocument,
    index: u32,
}

impl<'a> SourceElement<'a> {
    pub(crate) fn document(&self) -> &'a SourceResultDocument {
        self.doc
    }

    pub(crate) fn row(&self) -> Result<Row> {
        self.doc.ensure_live()?;
        self.doc.db.get(Cursor::from_index(self.index))
    }

    /// The kind of value this element holds.
    pub fn value_kind(&self) -> Result<ValueKind> {
        let row = self.row()?;
        row.token.value_kind().ok_or(WeftError::InvalidState(
            "row does not describe a value element",
        ))
    }

    /// Resolves a property of an object element, failing if it is absent.
    pub fn get_property(&self, name: &str) -> Result<SourceElement<'a>> {
        self.try_get_property(name)?
            .ok_or_else(|| WeftError::PropertyNotFound(name.to_owned()))
    }

    /// Resolves a property of an object element, `None` if absent.
    ///
    /// A linear scan of the object's immediate child rows in document
    /// order; response objects are small.
    pub fn try_get_property(&self, name: &str) -> Result<Option<SourceElement<'a>>> {
        let row = self.row()?;
        if row.token != ElementToken::StartObject {
            return Err(WeftError::InvalidState("element is not an object"));
        }
        for entry in self.enumerate_object()? {
            let (entry_name, value) = entry?;
            if entry_name == name {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Lazily iterates the object's properties in document order.
    ///
    /// Each enumerator instance is single-pass; call again for a fresh
    /// pass.
    pub fn enumerate_object(&self) -> Result<ObjectEntries<'a>> {
        let row = self.row()?;
        if row.token != ElementToken::StartObject {
            return Err(WeftError::InvalidState("element is not an object"));
        }
        Ok(ObjectEntries {
            doc: self.doc,
            object_index: self.index,
            next: self.index + 1,
            done: false,
        })
    }

    /// Lazily iterates the array's elements in document order.
    pub fn enumerate_array(&self) -> Result<ArrayElements<'a>> {
        let row = self.row()?;
        if row.token != ElementToken::StartArray {
            return Err(WeftError::InvalidState("element is not an array"));
        }
        Ok(ArrayElements {
            doc: self.doc,
            array_index: self.index,
            next: self.index + 1,
            done: false,
        })
    }

    /// The element's string value, unescaped.
    pub fn as_str(&self) -> Result<Cow<'a, str>> {
        let row = self.row()?;
        if !matches!(row.token, ElementToken::String | ElementToken::PropertyName) {
            return Err(WeftError::InvalidState("element is not a string"));
        }
        let raw = self
            .doc
            .buffers
            .slice(row.location as usize, row.size_or_length() as usize)?;
        decode_string(raw, row.location as usize)
    }

    /// The element's raw recorded bytes (escapes intact for strings).
    pub fn raw_bytes(&self) -> Result<Cow<'a, [u8]>> {
        let row = self.row()?;
        if !row.is_simple_value() {
            return Err(WeftError::InvalidState("element has no raw byte span"));
        }
        self.doc
            .buffers
            .slice(row.location as usize, row.size_or_length() as usize)
    }

    /// The element's number value as a signed integer.
    pub fn as_i64(&self) -> Result<i64> {
        let text = self.number_text()?;
        text.parse::<i64>().map_err(|_| {
            WeftError::InvalidArgument(format!("number '{text}' is not a 64-bit integer"))
        })
    }

    /// The element's number value as a double.
    pub fn as_f64(&self) -> Result<f64> {
        let text = self.number_text()?;
        text.parse::<f64>()
            .map_err(|_| WeftError::InvalidArgument(format!("number '{text}' is malformed")))
    }

    /// The element's boolean value.
    pub fn as_bool(&self) -> Result<bool> {
        let row = self.row()?;
        match row.token {
            ElementToken::True => Ok(true),
            ElementToken::False => Ok(false),
            _ => Err(WeftError::InvalidState("element is not a boolean")),
        }
    }

    /// Whether the element is the `null` literal.
    pub fn is_null(&self) -> Result<bool> {
        Ok(self.row()?.token == ElementToken::Null)
    }

    fn number_text(&self) -> Result<Cow<'a, str>> {
        let row = self.row()?;
        if row.token != ElementToken::Number {
            return Err(WeftError::InvalidState("element is not a number"));
        }
        let raw = self
            .doc
            .buffers
            .slice(row.location as usize, row.size_or_length() as usize)?;
        // Number text is ASCII by construction.
        match raw {
            Cow::Borrowed(bytes) => Ok(Cow::Borrowed(
                std::str::from_utf8(bytes).expect("number text is ASCII"),
            )),
            Cow::Owned(bytes) => Ok(Cow::Owned(
                String::from_utf8(bytes).expect("number text is ASCII"),
            )),
        }
    }
}

/// Lazy iterator over an object's `(name, value)` pairs.
pub struct ObjectEntries<'a> {
    doc: &'a SourceResultDocument,
    object_index: u32,
    next: u32,
    done: bool,
}

impl<'a> Iterator for ObjectEntries<'a> {
    type Item = Result<(Cow<'a, str>, SourceElement<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.next < self.doc.db.len() {
            let row = match self.doc.db.get(Cursor::from_index(self.next)) {
                Ok(row) => row,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            if row.parent_row != self.object_index {
                self.next += 1;
                continue;
            }
            if row.token.is_end() {
                self.done = true;
                return None;
            }
            if row.token == ElementToken::PropertyName {
                let name_element = SourceElement {
                    doc: self.doc,
                    index: self.next,
                };
                let value = SourceElement {
                    doc: self.doc,
                    index: self.next + 1,
                };
                self.next += 2;
                return Some(name_element.as_str().map(|name| (name, value)));
            }
            self.next += 1;
        }
        self.done = true;
        None
    }
}

/// Lazy iterator over an array's elements.
pub struct ArrayElements<'a> {
    doc: &'a SourceResultDocument,
    array_index: u32,
    next: u32,
    done: bool,
}

impl<'a> Iterator for ArrayElements<'a> {
    type Item = Result<SourceElement<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.next < self.doc.db.len() {
            let row = match self.doc.db.get(Cursor::from_index(self.next)) {
                Ok(row) => row,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            if row.parent_row != self.array_index {
                self.next += 1;
                continue;
            }
            if row.token.is_end() {
                self.done = true;
                return None;
            }
            let element = SourceElement {
                doc: self.doc,
                index: self.next,
            };
            self.next += 1;
            return Some(Ok(element));
        }
        self.done = true;
        None
    }
}

/// Decodes raw string bytes: validates UTF-8 and resolves JSON escapes.
pub(crate) fn decode_string(raw: Cow<'_, [u8]>, base: usize) -> Result<Cow<'_, str>> {
    if !raw.contains(&b'\\') {
        return match raw {
            Cow::Borrowed(bytes) => std::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|_| utf8_error(base)),
            Cow::Owned(bytes) => String::from_utf8(bytes)
                .map(Cow::Owned)
                .map_err(|_| utf8_error(base)),
        };
    }
    let unescaped = unescape(&raw, base)?;
    String::from_utf8(unescaped)
        .map(Cow::Owned)
        .map_err(|_| utf8_error(base))
}

fn utf8_error(base: usize) -> WeftError {
    WeftError::Parse {
        position: base,
        message: "invalid UTF-8 in string".into(),
    }
}

fn unescape(raw: &[u8], base: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let byte = raw[i];
        if byte != b'\\' {
            out.push(byte);
            i += 1;
            continue;
        }
        let escape = *raw.get(i + 1).ok_or_else(|| escape_error(base + i))?;
        match escape {
            b'"' => out.push(b'"'),
            b'\\' => out.push(b'\\'),
            b'/' => out.push(b'/'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'u' => {
                let unit = read_hex4(raw, i + 2, base)?;
                let scalar = if (0xD800..0xDC00).contains(&unit) {
                    // High surrogate: the low half must follow immediately.
                    if raw.get(i + 6) != Some(&b'\\') || raw.get(i + 7) != Some(&b'u') {
                        return Err(escape_error(base + i));
                    }
                    let low = read_hex4(raw, i + 8, base)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(escape_error(base + i));
                    }
                    i += 6;
                    0x10000 + ((unit as u32 - 0xD800) << 10) + (low as u32 - 0xDC00)
                } else if (0xDC00..0xE000).contains(&unit) {
                    return Err(escape_error(base + i));
                } else {
                    unit as u32
                };
                let ch = char::from_u32(scalar).ok_or_else(|| escape_error(base + i))?;
                let mut encoded = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut encoded).as_bytes());
                i += 4;
            }
            _ => return Err(escape_error(base + i)),
        }
        i += 2;
    }
    Ok(out)
}

fn read_hex4(raw: &[u8], at: usize, base: usize) -> Result<u16> {
    let digits = raw
        .get(at..at + 4)
        .ok_or_else(|| escape_error(base + at))?;
    let text = std::str::from_utf8(digits).map_err(|_| escape_error(base + at))?;
    u16::from_str_radix(text, 16).map_err(|_| escape_error(base + at))
}

fn escape_error(position: usize) -> WeftError {
    WeftError::Parse {
        position,
        message: "invalid escape sequence".into(),
    }
}
