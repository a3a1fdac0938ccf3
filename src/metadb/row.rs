//! Fixed-layout row records and the centralized field codec.
//!
//! A row is 20 bytes: five little-endian 32-bit words. All bit packing and
//! unpacking lives here; the store above reads and writes whole lanes and
//! never twiddles bits itself.
//!
//! Word layout:
//!
//! | word | contents                                                    |
//! |------|-------------------------------------------------------------|
//! | 0    | token (8) \| flags (8) \| source document id (16, 15 legal) |
//! | 1    | location (27 legal)                                         |
//! | 2    | size-or-length union: bit 31 = complex children, low 31 = magnitude |
//! | 3    | parent row (28 legal)                                       |
//! | 4    | operation reference id (16, 15 legal) \| spare (16, zero)   |
//!
//! The bit widths are contract: they bound the largest legal input
//! document, and every write path rejects an over-budget value instead of
//! truncating it.

use crate::error::{Result, WeftError};

/// Byte size of one encoded row.
pub const ROW_SIZE: usize = 20;

/// Largest legal byte location (27 bits).
pub const MAX_LOCATION: u32 = (1 << 27) - 1;
/// Largest legal size-or-length magnitude (31 bits).
pub const MAX_SIZE_OR_LENGTH: u32 = (1 << 31) - 1;
/// Largest legal source document id (15 bits).
pub const MAX_SOURCE_DOCUMENT_ID: u16 = (1 << 15) - 1;
/// Largest legal parent row index (28 bits).
pub const MAX_PARENT_ROW: u32 = (1 << 28) - 1;
/// Largest legal operation reference id (15 bits).
pub const MAX_OPERATION_REFERENCE_ID: u16 = (1 << 15) - 1;

/// Reserved sentinel magnitude meaning "size not yet determined".
pub const UNKNOWN_SIZE: u32 = MAX_SIZE_OR_LENGTH;

const COMPLEX_CHILDREN_BIT: u32 = 1 << 31;

const TOKEN_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 1;
const SOURCE_DOC_OFFSET: usize = 2;
const LOCATION_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const PARENT_OFFSET: usize = 12;
const OPERATION_REF_OFFSET: usize = 16;

/// Per-row flag bits.
pub mod row_flags {
    /// No flags set.
    pub const NONE: u8 = 0;
    /// The row is the document's data root.
    pub const IS_ROOT: u8 = 1 << 0;
    /// The field behind this slot is nullable per the operation plan.
    pub const IS_NULLABLE: u8 = 1 << 1;
    /// The field was excluded (e.g. by a skip/include directive).
    pub const IS_EXCLUDED: u8 = 1 << 2;
    /// The subtree rooted here failed to resolve.
    pub const IS_INVALIDATED: u8 = 1 << 3;
}

/// Kind of document element a row describes.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ElementToken {
    /// Slot allocated but not yet assigned a value.
    Undefined = 0x00,
    /// Opening brace of an object.
    StartObject = 0x01,
    /// Closing brace of an object.
    EndObject = 0x02,
    /// Opening bracket of an array.
    StartArray = 0x03,
    /// Closing bracket of an array.
    EndArray = 0x04,
    /// An object member's name.
    PropertyName = 0x05,
    /// A string scalar.
    String = 0x06,
    /// A number scalar.
    Number = 0x07,
    /// The `true` literal.
    True = 0x08,
    /// The `false` literal.
    False = 0x09,
    /// The `null` literal.
    Null = 0x0A,
    /// A cross-document reference to another element.
    Reference = 0x0B,
}

impl ElementToken {
    /// Decodes a token from its stored byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Self::Undefined),
            0x01 => Ok(Self::StartObject),
            0x02 => Ok(Self::EndObject),
            0x03 => Ok(Self::StartArray),
            0x04 => Ok(Self::EndArray),
            0x05 => Ok(Self::PropertyName),
            0x06 => Ok(Self::String),
            0x07 => Ok(Self::Number),
            0x08 => Ok(Self::True),
            0x09 => Ok(Self::False),
            0x0A => Ok(Self::Null),
            0x0B => Ok(Self::Reference),
            other => Err(WeftError::InvalidArgument(format!(
                "unknown element token: 0x{other:02X}"
            ))),
        }
    }

    /// Encodes the token as its stored byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// True for rows that carry a value directly rather than structure.
    pub fn is_simple_value(self) -> bool {
        matches!(
            self,
            Self::PropertyName | Self::String | Self::Number | Self::True | Self::False | Self::Null
        )
    }

    /// True for `StartObject` and `StartArray`.
    pub fn is_start(self) -> bool {
        matches!(self, Self::StartObject | Self::StartArray)
    }

    /// True for `EndObject` and `EndArray`.
    pub fn is_end(self) -> bool {
        matches!(self, Self::EndObject | Self::EndArray)
    }
}

/// Surface value kind derived from a row token.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ValueKind {
    /// Slot not yet set.
    Undefined,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON null.
    Null,
}

impl ElementToken {
    /// Maps a row token to the value kind it represents, if any.
    ///
    /// End rows, property names, and references have no value kind of
    /// their own.
    pub fn value_kind(self) -> Option<ValueKind> {
        match self {
            Self::Undefined => Some(ValueKind::Undefined),
            Self::StartObject => Some(ValueKind::Object),
            Self::StartArray => Some(ValueKind::Array),
            Self::String => Some(ValueKind::String),
            Self::Number => Some(ValueKind::Number),
            Self::True | Self::False => Some(ValueKind::Boolean),
            Self::Null => Some(ValueKind::Null),
            Self::EndObject | Self::EndArray | Self::PropertyName | Self::Reference => None,
        }
    }
}

/// Value-copy view of one row.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Row {
    /// Element kind.
    pub token: ElementToken,
    /// Flag bits (`row_flags`).
    pub flags: u8,
    /// Originating source document, `0` for none/local.
    pub source_document_id: u16,
    /// Byte offset of the element's raw representation (or, for composite
    /// container rows, the index of the first child row).
    pub location: u32,
    size_union: u32,
    /// Index of the structural parent row.
    pub parent_row: u32,
    /// Selection node that produced this row, `0` for none.
    pub operation_reference_id: u16,
}

impl Row {
    /// The size/length magnitude with the complex-children bit masked off.
    pub fn size_or_length(&self) -> u32 {
        self.size_union & !COMPLEX_CHILDREN_BIT
    }

    /// Whether this object/array contains nested objects or arrays.
    pub fn has_complex_children(&self) -> bool {
        self.size_union & COMPLEX_CHILDREN_BIT != 0
    }

    /// Whether the size has not been backpatched yet.
    pub fn is_unknown_size(&self) -> bool {
        self.size_or_length() == UNKNOWN_SIZE
    }

    /// Whether the row carries a value directly.
    pub fn is_simple_value(&self) -> bool {
        self.token.is_simple_value()
    }

    /// Whether the row has a flag set.
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Validated field values ready to be encoded into a row.
///
/// Constructing one performs every bit-width check, so the store itself
/// never writes an over-budget value.
#[derive(Debug, Copy, Clone)]
pub struct RowFields {
    pub(crate) token: ElementToken,
    pub(crate) flags: u8,
    pub(crate) source_document_id: u16,
    pub(crate) location: u32,
    pub(crate) size_union: u32,
    pub(crate) parent_row: u32,
    pub(crate) operation_reference_id: u16,
}

impl RowFields {
    /// Validates all field budgets.
    ///
    /// A negative `size_or_length` stores its magnitude with the
    /// complex-children bit set.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        token: ElementToken,
        location: u32,
        size_or_length: i32,
        source_document_id: u16,
        parent_row: u32,
        operation_reference_id: u16,
        flags: u8,
    ) -> Result<Self> {
        Ok(Self {
            token,
            flags,
            source_document_id: check_source_document_id(source_document_id)?,
            location: check_location(location)?,
            size_union: encode_size_or_length(size_or_length)?,
            parent_row: check_parent_row(parent_row)?,
            operation_reference_id: check_operation_reference_id(operation_reference_id)?,
        })
    }
}

/// Rejects a location outside the 27-bit budget.
pub fn check_location(value: u32) -> Result<u32> {
    if value > MAX_LOCATION {
        return Err(WeftError::CapacityExceeded {
            field: "location",
            value: value as u64,
            bits: 27,
        });
    }
    Ok(value)
}

/// Rejects a size/length magnitude outside the 31-bit budget.
pub fn check_size_magnitude(value: u32) -> Result<u32> {
    if value > MAX_SIZE_OR_LENGTH {
        return Err(WeftError::CapacityExceeded {
            field: "size_or_length",
            value: value as u64,
            bits: 31,
        });
    }
    Ok(value)
}

/// Rejects a source document id outside the 15-bit budget.
pub fn check_source_document_id(value: u16) -> Result<u16> {
    if value > MAX_SOURCE_DOCUMENT_ID {
        return Err(WeftError::CapacityExceeded {
            field: "source_document_id",
            value: value as u64,
            bits: 15,
        });
    }
    Ok(value)
}

/// Rejects a parent row index outside the 28-bit budget.
pub fn check_parent_row(value: u32) -> Result<u32> {
    if value > MAX_PARENT_ROW {
        return Err(WeftError::CapacityExceeded {
            field: "parent_row",
            value: value as u64,
            bits: 28,
        });
    }
    Ok(value)
}

/// Rejects an operation reference id outside the 15-bit budget.
pub fn check_operation_reference_id(value: u16) -> Result<u16> {
    if value > MAX_OPERATION_REFERENCE_ID {
        return Err(WeftError::CapacityExceeded {
            field: "operation_reference_id",
            value: value as u64,
            bits: 15,
        });
    }
    Ok(value)
}

/// Encodes a signed size into the union word: a negative input stores its
/// magnitude with the complex-children bit set.
pub fn encode_size_or_length(value: i32) -> Result<u32> {
    if value < 0 {
        let magnitude = check_size_magnitude(value.unsigned_abs())?;
        Ok(magnitude | COMPLEX_CHILDREN_BIT)
    } else {
        // Non-negative i32 always fits 31 bits.
        Ok(value as u32)
    }
}

pub(crate) fn encode_into(buf: &mut [u8], fields: &RowFields) {
    debug_assert!(buf.len() >= ROW_SIZE);
    buf[TOKEN_OFFSET] = fields.token.to_byte();
    buf[FLAGS_OFFSET] = fields.flags;
    buf[SOURCE_DOC_OFFSET..SOURCE_DOC_OFFSET + 2]
        .copy_from_slice(&fields.source_document_id.to_le_bytes());
    buf[LOCATION_OFFSET..LOCATION_OFFSET + 4].copy_from_slice(&fields.location.to_le_bytes());
    buf[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&fields.size_union.to_le_bytes());
    buf[PARENT_OFFSET..PARENT_OFFSET + 4].copy_from_slice(&fields.parent_row.to_le_bytes());
    buf[OPERATION_REF_OFFSET..OPERATION_REF_OFFSET + 2]
        .copy_from_slice(&fields.operation_reference_id.to_le_bytes());
    buf[OPERATION_REF_OFFSET + 2..ROW_SIZE].fill(0);
}

pub(crate) fn decode_from(buf: &[u8]) -> Result<Row> {
    debug_assert!(buf.len() >= ROW_SIZE);
    let token = ElementToken::from_byte(buf[TOKEN_OFFSET])?;
    let flags = buf[FLAGS_OFFSET];
    let source_document_id = u16::from_le_bytes([buf[SOURCE_DOC_OFFSET], buf[SOURCE_DOC_OFFSET + 1]]);
    let location = u32::from_le_bytes(
        buf[LOCATION_OFFSET..LOCATION_OFFSET + 4]
            .try_into()
            .expect("slice has exactly 4 bytes"),
    );
    let size_union = u32::from_le_bytes(
        buf[SIZE_OFFSET..SIZE_OFFSET + 4]
            .try_into()
            .expect("slice has exactly 4 bytes"),
    );
    let parent_row = u32::from_le_bytes(
        buf[PARENT_OFFSET..PARENT_OFFSET + 4]
            .try_into()
            .expect("slice has exactly 4 bytes"),
    );
    let operation_reference_id =
        u16::from_le_bytes([buf[OPERATION_REF_OFFSET], buf[OPERATION_REF_OFFSET + 1]]);
    Ok(Row {
        token,
        flags,
        source_document_id,
        location,
        size_union,
        parent_row,
        operation_reference_id,
    })
}

pub(crate) fn read_token(buf: &[u8]) -> Result<ElementToken> {
    ElementToken::from_byte(buf[TOKEN_OFFSET])
}

pub(crate) fn write_token(buf: &mut [u8], token: ElementToken) {
    buf[TOKEN_OFFSET] = token.to_byte();
}

pub(crate) fn read_flags(buf: &[u8]) -> u8 {
    buf[FLAGS_OFFSET]
}

pub(crate) fn write_flags(buf: &mut [u8], flags: u8) {
    buf[FLAGS_OFFSET] = flags;
}

pub(crate) fn write_source_document_id(buf: &mut [u8], value: u16) {
    buf[SOURCE_DOC_OFFSET..SOURCE_DOC_OFFSET + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_location(buf: &mut [u8], value: u32) {
    buf[LOCATION_OFFSET..LOCATION_OFFSET + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_size_union(buf: &[u8]) -> u32 {
    u32::from_le_bytes(
        buf[SIZE_OFFSET..SIZE_OFFSET + 4]
            .try_into()
            .expect("slice has exactly 4 bytes"),
    )
}

pub(crate) fn write_size_union(buf: &mut [u8], value: u32) {
    buf[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_parent_row(buf: &mut [u8], value: u32) {
    buf[PARENT_OFFSET..PARENT_OFFSET + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_operation_reference_id(buf: &mut [u8], value: u16) {
    buf[OPERATION_REF_OFFSET..OPERATION_REF_OFFSET + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) const fn complex_children_bit() -> u32 {
    COMPLEX_CHILDREN_BIT
}
