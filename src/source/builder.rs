//! Programmatic write path for source documents.
//!
//! Used when the gateway materializes a result itself (a synthetic or
//! locally computed subgraph response) and there is no textual payload to
//! parse. The builder appends the same rows the parser would and writes
//! scalar text into its own fixed-size buffers, so
//! [`SourceResultDocumentBuilder::build`] yields a document downstream
//! code cannot tell apart from a parsed one.
//!
//! Containers follow the same two-phase lifecycle as the parse path:
//! opened with an unknown size, closed with an explicit `finish()` that
//! writes the End row and backpatches the child count.

use bytes::Bytes;

use crate::error::{Result, WeftError};
use crate::metadb::{row_flags, Cursor, ElementToken, MetaDb, UNKNOWN_SIZE};
use crate::metadb::row::{check_location, MAX_LOCATION};
use crate::plan::Selection;

use super::buffers::{ChunkedBuffers, BUFFER_SIZE};
use super::SourceResultDocument;

struct OpenContainer {
    cursor: Cursor,
    row_index: u32,
    child_count: u32,
    has_complex_children: bool,
    declared_len: Option<u32>,
    is_object: bool,
}

struct BuilderCore {
    db: MetaDb,
    text: Vec<Vec<u8>>,
    text_len: usize,
    open: Vec<OpenContainer>,
    // A property name row has been written whose value row has not.
    pending_property: bool,
}

impl BuilderCore {
    fn write_text(&mut self, bytes: &[u8]) -> Result<u32> {
        let end = self.text_len + bytes.len();
        if end > MAX_LOCATION as usize + 1 {
            return Err(WeftError::CapacityExceeded {
                field: "location",
                value: end as u64,
                bits: 27,
            });
        }
        let location = check_location(self.text_len as u32)?;
        let mut rest = bytes;
        while !rest.is_empty() {
            if self
                .text
                .last()
                .map(|chunk| chunk.len() == BUFFER_SIZE)
                .unwrap_or(true)
            {
                self.text.push(Vec::with_capacity(BUFFER_SIZE));
            }
            let chunk = self.text.last_mut().expect("chunk just ensured");
            let take = rest.len().min(BUFFER_SIZE - chunk.len());
            chunk.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        self.text_len += bytes.len();
        Ok(location)
    }

    fn append_scalar(
        &mut self,
        token: ElementToken,
        text: &[u8],
        parent_row: u32,
        operation_reference_id: u16,
        flags: u8,
    ) -> Result<()> {
        let location = self.write_text(text)?;
        self.db.append(
            token,
            location,
            text.len() as i32,
            0,
            parent_row,
            operation_reference_id,
            flags,
        )?;
        self.pending_property = false;
        self.bump_child_count();
        Ok(())
    }

    fn open_container(
        &mut self,
        token: ElementToken,
        parent_row: u32,
        operation_reference_id: u16,
        flags: u8,
        declared_len: Option<u32>,
    ) -> Result<u32> {
        if let Some(parent) = self.open.last_mut() {
            parent.has_complex_children = true;
        }
        let cursor = self.db.append(
            token,
            0,
            UNKNOWN_SIZE as i32,
            0,
            parent_row,
            operation_reference_id,
            flags,
        )?;
        self.pending_property = false;
        self.bump_child_count();
        let row_index = cursor.to_index();
        self.open.push(OpenContainer {
            cursor,
            row_index,
            child_count: 0,
            has_complex_children: false,
            declared_len,
            is_object: token == ElementToken::StartObject,
        });
        Ok(row_index)
    }

    fn close_container(&mut self, row_index: u32) -> Result<()> {
        let frame = self
            .open
            .pop()
            .ok_or(WeftError::InvalidState("no open container to finish"))?;
        if frame.row_index != row_index {
            return Err(WeftError::InvalidState(
                "container finished out of order",
            ));
        }
        if frame.is_object && self.pending_property {
            return Err(WeftError::InvalidState(
                "object finished with a property awaiting its value",
            ));
        }
        if let Some(declared) = frame.declared_len {
            if frame.child_count != declared {
                return Err(WeftError::InvalidArgument(format!(
                    "list declared {declared} elements but {} were written",
                    frame.child_count
                )));
            }
        }
        let end_token = if frame.is_object {
            ElementToken::EndObject
        } else {
            ElementToken::EndArray
        };
        self.db
            .append(end_token, 0, 0, 0, frame.row_index, 0, row_flags::NONE)?;
        self.db.set_size_or_length(frame.cursor, frame.child_count)?;
        if frame.has_complex_children {
            self.db.set_has_complex_children(frame.cursor)?;
        }
        Ok(())
    }

    fn bump_child_count(&mut self) {
        if let Some(frame) = self.open.last_mut() {
            // Property-name rows precede their value rows; only values
            // count as children, so the name row skips the bump.
            frame.child_count += 1;
        }
    }

    fn append_property_name(&mut self, selection: &Selection, parent_row: u32) -> Result<()> {
        if self.pending_property {
            return Err(WeftError::InvalidState(
                "previous property has no value yet",
            ));
        }
        self.pending_property = true;
        let mut escaped = Vec::with_capacity(selection.response_name.len());
        escape_json_string_into(selection.response_name.as_bytes(), &mut escaped);
        let location = self.write_text(&escaped)?;
        self.db.append(
            ElementToken::PropertyName,
            location,
            escaped.len() as i32,
            0,
            parent_row,
            selection.id.0,
            row_flags::NONE,
        )?;
        Ok(())
    }
}

/// Builds a [`SourceResultDocument`] top-down from a selection-set plan.
pub struct SourceResultDocumentBuilder {
    core: BuilderCore,
    root_created: bool,
}

impl SourceResultDocumentBuilder {
    /// Creates an empty builder sized for `estimated_rows`.
    pub fn new(estimated_rows: u32) -> Self {
        Self {
            core: BuilderCore {
                db: MetaDb::create_for_estimated_rows(estimated_rows),
                text: Vec::new(),
                text_len: 0,
                open: Vec::new(),
                pending_property: false,
            },
            root_created: false,
        }
    }

    /// Opens the root object. May only be called once; finish the returned
    /// builder before calling [`SourceResultDocumentBuilder::build`].
    pub fn root(&mut self) -> Result<ObjectBuilder<'_>> {
        if self.root_created {
            return Err(WeftError::InvalidState("root already created"));
        }
        self.root_created = true;
        let row_index = self.core.open_container(
            ElementToken::StartObject,
            0,
            0,
            row_flags::IS_ROOT,
            None,
        )?;
        Ok(ObjectBuilder {
            core: &mut self.core,
            row_index,
        })
    }

    /// Finalizes the builder into an immutable document.
    pub fn build(self) -> Result<SourceResultDocument> {
        if !self.root_created {
            return Err(WeftError::InvalidState("root was never created"));
        }
        if !self.core.open.is_empty() {
            return Err(WeftError::InvalidState(
                "document has unfinished containers",
            ));
        }
        let text_len = self.core.text_len;
        let buffers: Vec<Bytes> = self.core.text.into_iter().map(Bytes::from).collect();
        let last_len = if buffers.is_empty() {
            0
        } else {
            text_len - (buffers.len() - 1) * BUFFER_SIZE
        };
        let buffers = ChunkedBuffers::new(buffers, last_len)?;
        Ok(SourceResultDocument::from_parts(buffers, self.core.db))
    }
}

/// Appends properties to one open object.
pub struct ObjectBuilder<'a> {
    core: &'a mut BuilderCore,
    row_index: u32,
}

impl<'a> ObjectBuilder<'a> {
    /// Opens the slot for one selected field.
    ///
    /// `ordinal` is the field's position in the selection set and must
    /// match the append order.
    pub fn create_property(
        &mut self,
        selection: &Selection,
        ordinal: u32,
    ) -> Result<PropertyBuilder<'_>> {
        let written = self
            .core
            .open
            .last()
            .map(|frame| frame.child_count)
            .unwrap_or(0);
        if ordinal != written {
            return Err(WeftError::InvalidArgument(format!(
                "property ordinal {ordinal} does not match append position {written}"
            )));
        }
        self.core.append_property_name(selection, self.row_index)?;
        Ok(PropertyBuilder {
            core: self.core,
            object_row: self.row_index,
            operation_reference_id: selection.id.0,
        })
    }

    /// Closes the object, writing its End row and backpatching its size.
    pub fn finish(self) -> Result<()> {
        self.core.close_container(self.row_index)
    }
}

/// The value position of one property; consumed by whichever value is set.
pub struct PropertyBuilder<'a> {
    core: &'a mut BuilderCore,
    object_row: u32,
    operation_reference_id: u16,
}

impl<'a> PropertyBuilder<'a> {
    /// Makes the property an object and returns its builder.
    pub fn create_object_value(self) -> Result<ObjectBuilder<'a>> {
        let row_index = self.core.open_container(
            ElementToken::StartObject,
            self.object_row,
            self.operation_reference_id,
            row_flags::NONE,
            None,
        )?;
        Ok(ObjectBuilder {
            core: self.core,
            row_index,
        })
    }

    /// Makes the property a list of exactly `length` elements.
    pub fn create_list_value(self, length: u32) -> Result<ArrayBuilder<'a>> {
        let row_index = self.core.open_container(
            ElementToken::StartArray,
            self.object_row,
            self.operation_reference_id,
            row_flags::NONE,
            Some(length),
        )?;
        Ok(ArrayBuilder {
            core: self.core,
            row_index,
            operation_reference_id: self.operation_reference_id,
        })
    }

    /// Sets a string value.
    pub fn set_string_value(self, value: &str) -> Result<()> {
        let mut escaped = Vec::with_capacity(value.len());
        escape_json_string_into(value.as_bytes(), &mut escaped);
        self.core.append_scalar(
            ElementToken::String,
            &escaped,
            self.object_row,
            self.operation_reference_id,
            row_flags::NONE,
        )
    }

    /// Sets an integer value.
    pub fn set_int_value(self, value: i64) -> Result<()> {
        self.core.append_scalar(
            ElementToken::Number,
            value.to_string().as_bytes(),
            self.object_row,
            self.operation_reference_id,
            row_flags::NONE,
        )
    }

    /// Sets a floating-point value. Non-finite values have no JSON form
    /// and are rejected.
    pub fn set_float_value(self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(WeftError::InvalidArgument(
                "non-finite numbers cannot be represented".into(),
            ));
        }
        self.core.append_scalar(
            ElementToken::Number,
            format_f64(value).as_bytes(),
            self.object_row,
            self.operation_reference_id,
            row_flags::NONE,
        )
    }

    /// Sets a boolean value.
    pub fn set_boolean_value(self, value: bool) -> Result<()> {
        let (token, text) = if value {
            (ElementToken::True, &b"true"[..])
        } else {
            (ElementToken::False, &b"false"[..])
        };
        self.core.append_scalar(
            token,
            text,
            self.object_row,
            self.operation_reference_id,
            row_flags::NONE,
        )
    }

    /// Sets the `null` literal.
    pub fn set_null_value(self) -> Result<()> {
        self.core.append_scalar(
            ElementToken::Null,
            b"null",
            self.object_row,
            self.operation_reference_id,
            row_flags::NONE,
        )
    }
}

/// Appends elements to one open list.
pub struct ArrayBuilder<'a> {
    core: &'a mut BuilderCore,
    row_index: u32,
    operation_reference_id: u16,
}

impl<'a> ArrayBuilder<'a> {
    /// Appends an object element and returns its builder.
    pub fn push_object_value(&mut self) -> Result<ObjectBuilder<'_>> {
        let row_index = self.core.open_container(
            ElementToken::StartObject,
            self.row_index,
            self.operation_reference_id,
            row_flags::NONE,
            None,
        )?;
        Ok(ObjectBuilder {
            core: self.core,
            row_index,
        })
    }

    /// Appends a string element.
    pub fn push_string_value(&mut self, value: &str) -> Result<()> {
        let mut escaped = Vec::with_capacity(value.len());
        escape_json_string_into(value.as_bytes(), &mut escaped);
        self.core.append_scalar(
            ElementToken::String,
            &escaped,
            self.row_index,
            self.operation_reference_id,
            row_flags::NONE,
        )
    }

    /// Appends an integer element.
    pub fn push_int_value(&mut self, value: i64) -> Result<()> {
        self.core.append_scalar(
            ElementToken::Number,
            value.to_string().as_bytes(),
            self.row_index,
            self.operation_reference_id,
            row_flags::NONE,
        )
    }

    /// Appends a `null` element.
    pub fn push_null_value(&mut self) -> Result<()> {
        self.core.append_scalar(
            ElementToken::Null,
            b"null",
            self.row_index,
            self.operation_reference_id,
            row_flags::NONE,
        )
    }

    /// Closes the list; fails if the element count does not match the
    /// declared length.
    pub fn finish(self) -> Result<()> {
        self.core.close_container(self.row_index)
    }
}

/// JSON-escapes string bytes so the stored text round-trips through the
/// read path's unescaping.
fn escape_json_string_into(value: &[u8], out: &mut Vec<u8>) {
    for &byte in value {
        match byte {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            0x08 => out.extend_from_slice(b"\\b"),
            0x0C => out.extend_from_slice(b"\\f"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            byte if byte < 0x20 => {
                out.extend_from_slice(format!("\\u{byte:04x}").as_bytes());
            }
            byte => out.push(byte),
        }
    }
}

fn format_f64(value: f64) -> String {
    let mut text = value.to_string();
    // Keep built numbers recognizably floating-point.
    if !text.contains('.') && !text.contains('e') && !text.contains('E') {
        text.push_str(".0");
    }
    text
}
