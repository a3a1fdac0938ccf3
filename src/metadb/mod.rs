//! Chunked, append-only row store for document metadata.
//!
//! Rows live in fixed 128 KiB chunks; the chunk list grows by appending
//! and existing chunks are never reallocated, so cursors handed to callers
//! stay valid for the lifetime of the store. In-place mutation is limited
//! to whole-row [`MetaDb::replace`] and the field-local setters, which
//! exist for the backpatch lifecycle: containers are appended with
//! [`row::UNKNOWN_SIZE`] and patched once their children are complete.

pub mod cursor;
pub mod row;

use tracing::{debug, trace};

pub use cursor::{Cursor, CHUNK_ROW_CAPACITY, CHUNK_SIZE, CHUNK_SKIP_BYTES};
pub use row::{row_flags, ElementToken, Row, RowFields, ValueKind, ROW_SIZE, UNKNOWN_SIZE};

use crate::error::{Result, WeftError};

/// The chunked row store holding all rows of one document.
pub struct MetaDb {
    chunks: Vec<Box<[u8]>>,
    next_index: u32,
    disposed: bool,
}

impl MetaDb {
    /// Creates an empty store with chunks pre-allocated for `estimated_rows`.
    pub fn create_for_estimated_rows(estimated_rows: u32) -> Self {
        let chunk_count = (estimated_rows / CHUNK_ROW_CAPACITY + 1) as usize;
        let mut chunks = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunks.push(new_chunk());
        }
        Self {
            chunks,
            next_index: 0,
            disposed: false,
        }
    }

    /// Number of rows appended so far.
    pub fn len(&self) -> u32 {
        self.next_index
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.next_index == 0
    }

    /// Cursor at which the next [`MetaDb::append`] will write.
    pub fn next_cursor(&self) -> Cursor {
        Cursor::from_index(self.next_index)
    }

    /// Appends one row and returns its cursor.
    ///
    /// A negative `size_or_length` stores its magnitude with the
    /// complex-children bit set. Fails if any field exceeds its bit-width
    /// budget or the store is disposed.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &mut self,
        token: ElementToken,
        location: u32,
        size_or_length: i32,
        source_document_id: u16,
        parent_row: u32,
        operation_reference_id: u16,
        flags: u8,
    ) -> Result<Cursor> {
        self.ensure_live()?;
        let fields = RowFields::new(
            token,
            location,
            size_or_length,
            source_document_id,
            parent_row,
            operation_reference_id,
            flags,
        )?;
        if self.next_index > 0 {
            debug_assert!(
                parent_row < self.next_index,
                "parent row must precede its child"
            );
        }
        let cursor = Cursor::from_index(self.next_index);
        if cursor.chunk as usize == self.chunks.len() {
            self.chunks.push(new_chunk());
            trace!(chunks = self.chunks.len(), "meta db grew by one chunk");
        }
        let offset = cursor.offset_bytes as usize;
        let chunk = &mut self.chunks[cursor.chunk as usize];
        row::encode_into(&mut chunk[offset..offset + ROW_SIZE], &fields);
        self.next_index += 1;
        Ok(cursor)
    }

    /// Returns a value copy of the row at `cursor`.
    pub fn get(&self, cursor: Cursor) -> Result<Row> {
        let slice = self.row_slice(cursor)?;
        row::decode_from(slice)
    }

    /// Overwrites every field of an existing row.
    ///
    /// The backpatch path for containers whose size is only known after
    /// their children have been written. The row keeps its index; no other
    /// row is touched.
    #[allow(clippy::too_many_arguments)]
    pub fn replace(
        &mut self,
        cursor: Cursor,
        token: ElementToken,
        location: u32,
        size_or_length: i32,
        source_document_id: u16,
        parent_row: u32,
        operation_reference_id: u16,
        flags: u8,
    ) -> Result<()> {
        let fields = RowFields::new(
            token,
            location,
            size_or_length,
            source_document_id,
            parent_row,
            operation_reference_id,
            flags,
        )?;
        let slice = self.row_slice_mut(cursor)?;
        row::encode_into(slice, &fields);
        Ok(())
    }

    /// Fast path reading only the token field.
    pub fn token_at(&self, cursor: Cursor) -> Result<ElementToken> {
        let slice = self.row_slice(cursor)?;
        row::read_token(slice)
    }

    /// Sets only the token field.
    pub fn set_token(&mut self, cursor: Cursor, token: ElementToken) -> Result<()> {
        let slice = self.row_slice_mut(cursor)?;
        row::write_token(slice, token);
        Ok(())
    }

    /// Sets only the location field.
    pub fn set_location(&mut self, cursor: Cursor, location: u32) -> Result<()> {
        row::check_location(location)?;
        let slice = self.row_slice_mut(cursor)?;
        row::write_location(slice, location);
        Ok(())
    }

    /// Sets the size/length magnitude, preserving the complex-children bit.
    pub fn set_size_or_length(&mut self, cursor: Cursor, size_or_length: u32) -> Result<()> {
        row::check_size_magnitude(size_or_length)?;
        let slice = self.row_slice_mut(cursor)?;
        let complex = row::read_size_union(slice) & row::complex_children_bit();
        row::write_size_union(slice, size_or_length | complex);
        Ok(())
    }

    /// Sets the complex-children bit, preserving the size magnitude.
    pub fn set_has_complex_children(&mut self, cursor: Cursor) -> Result<()> {
        let slice = self.row_slice_mut(cursor)?;
        let union = row::read_size_union(slice);
        row::write_size_union(slice, union | row::complex_children_bit());
        Ok(())
    }

    /// Sets only the parent-row field.
    pub fn set_parent_row(&mut self, cursor: Cursor, parent_row: u32) -> Result<()> {
        row::check_parent_row(parent_row)?;
        let slice = self.row_slice_mut(cursor)?;
        row::write_parent_row(slice, parent_row);
        Ok(())
    }

    /// Sets only the source-document-id field.
    pub fn set_source_document_id(&mut self, cursor: Cursor, id: u16) -> Result<()> {
        row::check_source_document_id(id)?;
        let slice = self.row_slice_mut(cursor)?;
        row::write_source_document_id(slice, id);
        Ok(())
    }

    /// Sets only the operation-reference-id field.
    pub fn set_operation_reference_id(&mut self, cursor: Cursor, id: u16) -> Result<()> {
        row::check_operation_reference_id(id)?;
        let slice = self.row_slice_mut(cursor)?;
        row::write_operation_reference_id(slice, id);
        Ok(())
    }

    /// Replaces the flag byte.
    pub fn set_flags(&mut self, cursor: Cursor, flags: u8) -> Result<()> {
        let slice = self.row_slice_mut(cursor)?;
        row::write_flags(slice, flags);
        Ok(())
    }

    /// ORs flag bits into the flag byte.
    pub fn add_flags(&mut self, cursor: Cursor, flags: u8) -> Result<()> {
        let slice = self.row_slice_mut(cursor)?;
        let current = row::read_flags(slice);
        row::write_flags(slice, current | flags);
        Ok(())
    }

    /// Releases the chunk buffers. Safe to call more than once; every
    /// other operation fails afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        debug!(rows = self.next_index, "disposing meta db");
        self.chunks = Vec::new();
        self.disposed = true;
    }

    /// Whether [`MetaDb::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(WeftError::InvalidState("meta db disposed"));
        }
        Ok(())
    }

    fn row_slice(&self, cursor: Cursor) -> Result<&[u8]> {
        self.check_cursor(cursor)?;
        let offset = cursor.offset_bytes as usize;
        Ok(&self.chunks[cursor.chunk as usize][offset..offset + ROW_SIZE])
    }

    fn row_slice_mut(&mut self, cursor: Cursor) -> Result<&mut [u8]> {
        self.check_cursor(cursor)?;
        let offset = cursor.offset_bytes as usize;
        Ok(&mut self.chunks[cursor.chunk as usize][offset..offset + ROW_SIZE])
    }

    fn check_cursor(&self, cursor: Cursor) -> Result<()> {
        self.ensure_live()?;
        let index = cursor.to_index();
        if index >= self.next_index {
            return Err(WeftError::RowIndexOutOfRange {
                index,
                len: self.next_index,
            });
        }
        Ok(())
    }
}

fn new_chunk() -> Box<[u8]> {
    vec![0u8; CHUNK_SIZE].into_boxed_slice()
}
