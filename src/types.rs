//! Shared newtype identifiers.

use serde::{Deserialize, Serialize};

/// Identifier of a source document attached to a composite document.
///
/// Assigned 1-based by [`crate::composite::CompositeResultDocument::attach_source`];
/// `0` means "none/local" and is never handed out. The backing row field is
/// 15 bits wide.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceDocId(pub u16);

/// Stable identifier of one selection node of the operation plan.
///
/// Assigned by the external planner; `0` is reserved for "no selection
/// association". The backing row field is 15 bits wide.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SelectionId(pub u16);

impl SelectionId {
    /// The reserved "no selection" value.
    pub const NONE: SelectionId = SelectionId(0);
}

/// Identifier of one selection set inside the operation plan.
///
/// Dense: doubles as the index into the plan's selection-set table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SelectionSetId(pub u16);

/// Opaque handle to one element (slot) of a composite document.
///
/// Stable for the lifetime of the document; composite stores never move
/// rows once appended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CompositeElementId(pub u32);
