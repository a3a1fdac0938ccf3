//! The selection-set-addressed composition tree.
//!
//! A [`CompositeResultDocument`] is created against one root selection set
//! and grows as subgraph responses arrive: object and array slots are
//! allocated ahead of data, scalar leaves are copied from source
//! documents by reference, and a subtree can be invalidated when a
//! backend reports a partial failure without touching its siblings.
//!
//! Slots move through `Undefined -> {Object, Array, Leaf}` exactly once;
//! an object (or the data root) may additionally be invalidated, and
//! nothing leaves the invalidated state.
//!
//! Composite rows reuse the row layout of source documents with two
//! twists: there is no backing text, so container rows store the index of
//! their first child slot in the location lane, and there are no End
//! rows, child blocks being delimited by the stored count instead.
//!
//! The document keeps a strong reference to every source document it has
//! borrowed leaf bytes from, so borrowed bytes cannot outlive their
//! owner.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, WeftError};
use crate::metadb::row::MAX_SOURCE_DOCUMENT_ID;
use crate::metadb::{row_flags, Cursor, ElementToken, MetaDb, Row, ValueKind};
use crate::plan::OperationPlan;
use crate::source::{decode_string, SourceElement, SourceResultDocument};
use crate::types::{CompositeElementId, SelectionId, SelectionSetId, SourceDocId};

/// The gateway's merged result tree for one client operation.
pub struct CompositeResultDocument {
    db: MetaDb,
    plan: Arc<OperationPlan>,
    instance_id: Option<u32>,
    sources: Vec<Arc<SourceResultDocument>>,
    disposed: bool,
}

impl CompositeResultDocument {
    /// Creates a document whose data root is laid out per the plan's root
    /// selection set.
    pub fn new(plan: Arc<OperationPlan>) -> Result<Self> {
        Self::create(plan, None)
    }

    /// [`CompositeResultDocument::new`] carrying a numeric instance
    /// identifier assigned by the planner for this partial document.
    pub fn with_instance_id(plan: Arc<OperationPlan>, instance_id: u32) -> Result<Self> {
        Self::create(plan, Some(instance_id))
    }

    fn create(plan: Arc<OperationPlan>, instance_id: Option<u32>) -> Result<Self> {
        let estimated: usize = plan
            .selection_sets
            .iter()
            .map(|set| set.selections.len())
            .sum();
        let mut doc = Self {
            db: MetaDb::create_for_estimated_rows(estimated as u32 + 1),
            plan,
            instance_id,
            sources: Vec::new(),
            disposed: false,
        };
        doc.db.append(
            ElementToken::StartObject,
            0,
            0,
            0,
            0,
            0,
            row_flags::IS_ROOT,
        )?;
        let root_set = doc.plan.root;
        let (first, count) = doc.allocate_child_slots(0, root_set)?;
        doc.db.set_location(Cursor::from_index(0), first)?;
        doc.db.set_size_or_length(Cursor::from_index(0), count)?;
        Ok(doc)
    }

    /// The data root element.
    pub fn root(&self) -> CompositeElementId {
        CompositeElementId(0)
    }

    /// The instance identifier supplied at construction, if any.
    pub fn instance_id(&self) -> Option<u32> {
        self.instance_id
    }

    /// The operation plan this document is addressed by.
    pub fn plan(&self) -> &Arc<OperationPlan> {
        &self.plan
    }

    /// Registers a source document whose leaf bytes this tree may borrow.
    ///
    /// The returned 1-based id goes into every leaf row copied from the
    /// document; the document itself is held alive until
    /// [`CompositeResultDocument::dispose`].
    pub fn attach_source(&mut self, source: Arc<SourceResultDocument>) -> Result<SourceDocId> {
        self.ensure_live()?;
        if self.sources.len() >= MAX_SOURCE_DOCUMENT_ID as usize {
            return Err(WeftError::CapacityExceeded {
                field: "source_document_id",
                value: self.sources.len() as u64 + 1,
                bits: 15,
            });
        }
        self.sources.push(source);
        Ok(SourceDocId(self.sources.len() as u16))
    }

    /// Resolves an attached source document.
    pub fn source(&self, id: SourceDocId) -> Result<&Arc<SourceResultDocument>> {
        self.ensure_live()?;
        self.attached(id)
    }

    /// The current kind of a slot.
    pub fn value_kind(&self, element: CompositeElementId) -> Result<ValueKind> {
        let row = self.row(element)?;
        row.token
            .value_kind()
            .ok_or(WeftError::InvalidState("row does not describe a value slot"))
    }

    /// Maps a slot back to the selection node that produced it.
    pub fn assert_selection(&self, element: CompositeElementId) -> Result<SelectionId> {
        let row = self.row(element)?;
        if row.operation_reference_id == 0 {
            return Err(WeftError::InvalidState(
                "element has no selection association",
            ));
        }
        Ok(SelectionId(row.operation_reference_id))
    }

    /// Resolves a field slot of an object element, failing if the name is
    /// not part of its selection set.
    pub fn get_property(
        &self,
        element: CompositeElementId,
        name: &str,
    ) -> Result<CompositeElementId> {
        self.try_get_property(element, name)?
            .ok_or_else(|| WeftError::SelectionNotFound(name.to_owned()))
    }

    /// Resolves a field slot of an object element, `None` if the name is
    /// not selected.
    pub fn try_get_property(
        &self,
        element: CompositeElementId,
        name: &str,
    ) -> Result<Option<CompositeElementId>> {
        let row = self.object_row(element)?;
        let first = row.location;
        for index in first..first + row.size_or_length() {
            let child = self.db.get(Cursor::from_index(index))?;
            let selection = self
                .plan
                .selection(SelectionId(child.operation_reference_id))
                .ok_or(WeftError::InvalidState("slot selection missing from plan"))?;
            if selection.response_name == name {
                return Ok(Some(CompositeElementId(index)));
            }
        }
        Ok(None)
    }

    /// Turns an `Undefined` slot into an object laid out per
    /// `selection_set`, one child slot per selected field in selection
    /// order.
    pub fn set_object_value(
        &mut self,
        element: CompositeElementId,
        selection_set: SelectionSetId,
    ) -> Result<()> {
        let row = self.unset_row(element)?;
        let (first, count) = self.allocate_child_slots(element.0, selection_set)?;
        let cursor = Cursor::from_index(element.0);
        self.db.set_token(cursor, ElementToken::StartObject)?;
        self.db.set_location(cursor, first)?;
        self.db.set_size_or_length(cursor, count)?;
        self.mark_parent_complex(row.parent_row)?;
        Ok(())
    }

    /// Turns an `Undefined` slot into an array of `length` element slots.
    pub fn set_list_value(&mut self, element: CompositeElementId, length: u32) -> Result<()> {
        let row = self.unset_row(element)?;
        let first = self.db.len();
        for _ in 0..length {
            self.db.append(
                ElementToken::Undefined,
                0,
                0,
                0,
                element.0,
                row.operation_reference_id,
                row.flags & row_flags::IS_NULLABLE,
            )?;
        }
        let cursor = Cursor::from_index(element.0);
        self.db.set_token(cursor, ElementToken::StartArray)?;
        self.db.set_location(cursor, first)?;
        self.db.set_size_or_length(cursor, length)?;
        self.mark_parent_complex(row.parent_row)?;
        Ok(())
    }

    /// Resolves one element slot of an array.
    pub fn get_element(
        &self,
        element: CompositeElementId,
        index: u32,
    ) -> Result<CompositeElementId> {
        let row = self.row(element)?;
        if row.token != ElementToken::StartArray {
            return Err(WeftError::InvalidState("element is not an array"));
        }
        if index >= row.size_or_length() {
            return Err(WeftError::InvalidArgument(format!(
                "array index {index} out of bounds for length {}",
                row.size_or_length()
            )));
        }
        Ok(CompositeElementId(row.location + index))
    }

    /// Copies a scalar's kind and raw byte span from a source document
    /// into an `Undefined` leaf slot.
    ///
    /// The bytes are borrowed, not duplicated: the slot records the
    /// originating document id and span, and reads resolve through the
    /// attached document.
    pub fn set_leaf_value(
        &mut self,
        element: CompositeElementId,
        source: SourceDocId,
        value: SourceElement<'_>,
    ) -> Result<()> {
        self.unset_row(element)?;
        let attached = self.attached(source)?;
        if !std::ptr::eq(attached.as_ref(), value.document()) {
            return Err(WeftError::InvalidArgument(
                "element does not belong to the attached source document".into(),
            ));
        }
        let source_row = value.row()?;
        if !matches!(
            source_row.token,
            ElementToken::String
                | ElementToken::Number
                | ElementToken::True
                | ElementToken::False
                | ElementToken::Null
        ) {
            return Err(WeftError::InvalidArgument(
                "leaf value must be a scalar element".into(),
            ));
        }
        let cursor = Cursor::from_index(element.0);
        self.db.set_token(cursor, source_row.token)?;
        self.db.set_location(cursor, source_row.location)?;
        self.db
            .set_size_or_length(cursor, source_row.size_or_length())?;
        self.db.set_source_document_id(cursor, source.0)?;
        Ok(())
    }

    /// Marks an object slot (or the data root) as failed to resolve.
    ///
    /// Scalar and array slots cannot be invalidated; propagating the
    /// failure to the nearest nullable ancestor is the execution layer's
    /// job.
    pub fn invalidate(&mut self, element: CompositeElementId) -> Result<()> {
        let row = self.row(element)?;
        if row.token != ElementToken::StartObject {
            return Err(WeftError::InvalidState(
                "only object slots and the data root can be invalidated",
            ));
        }
        self.db
            .add_flags(Cursor::from_index(element.0), row_flags::IS_INVALIDATED)?;
        debug!(element = element.0, "invalidated composite subtree");
        Ok(())
    }

    /// Whether a slot has been invalidated.
    pub fn is_invalidated(&self, element: CompositeElementId) -> Result<bool> {
        Ok(self.row(element)?.has_flag(row_flags::IS_INVALIDATED))
    }

    /// Lazily iterates an object's field slots in selection order.
    ///
    /// Unset fields are yielded as `Undefined` slots; each enumerator is
    /// single-pass, call again for a fresh pass.
    pub fn enumerate_object(
        &self,
        element: CompositeElementId,
    ) -> Result<CompositeObjectEntries<'_>> {
        let row = self.object_row(element)?;
        Ok(CompositeObjectEntries {
            doc: self,
            next: row.location,
            end: row.location + row.size_or_length(),
        })
    }

    /// The raw bytes of a leaf slot, resolved through the source document
    /// they were borrowed from.
    pub fn leaf_bytes(&self, element: CompositeElementId) -> Result<Cow<'_, [u8]>> {
        let row = self.leaf_row(element)?;
        let source = self.attached(SourceDocId(row.source_document_id))?;
        source
            .buffers()
            .slice(row.location as usize, row.size_or_length() as usize)
    }

    /// The string value of a leaf slot, unescaped.
    pub fn leaf_str(&self, element: CompositeElementId) -> Result<Cow<'_, str>> {
        let row = self.leaf_row(element)?;
        if !matches!(row.token, ElementToken::String) {
            return Err(WeftError::InvalidState("leaf is not a string"));
        }
        let source = self.attached(SourceDocId(row.source_document_id))?;
        let raw = source
            .buffers()
            .slice(row.location as usize, row.size_or_length() as usize)?;
        decode_string(raw, row.location as usize)
    }

    /// Releases the row store and every attached source document. Safe to
    /// call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        debug!(
            rows = self.db.len(),
            sources = self.sources.len(),
            "disposing composite document"
        );
        self.db.dispose();
        self.sources.clear();
        self.disposed = true;
    }

    /// Whether [`CompositeResultDocument::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn allocate_child_slots(
        &mut self,
        parent: u32,
        selection_set: SelectionSetId,
    ) -> Result<(u32, u32)> {
        let plan = Arc::clone(&self.plan);
        let set = plan.selection_set(selection_set)?;
        let first = self.db.len();
        for selection in &set.selections {
            let flags = if selection.nullable {
                row_flags::IS_NULLABLE
            } else {
                row_flags::NONE
            };
            self.db.append(
                ElementToken::Undefined,
                0,
                0,
                0,
                parent,
                selection.id.0,
                flags,
            )?;
        }
        Ok((first, set.selections.len() as u32))
    }

    fn mark_parent_complex(&mut self, parent: u32) -> Result<()> {
        self.db
            .set_has_complex_children(Cursor::from_index(parent))
    }

    fn row(&self, element: CompositeElementId) -> Result<Row> {
        self.ensure_live()?;
        self.db.get(Cursor::from_index(element.0))
    }

    fn object_row(&self, element: CompositeElementId) -> Result<Row> {
        let row = self.row(element)?;
        match row.token {
            ElementToken::StartObject => Ok(row),
            ElementToken::Undefined => {
                Err(WeftError::InvalidState("object value not set"))
            }
            _ => Err(WeftError::InvalidState("element is not an object")),
        }
    }

    fn leaf_row(&self, element: CompositeElementId) -> Result<Row> {
        let row = self.row(element)?;
        if !row.is_simple_value() {
            return Err(WeftError::InvalidState("element is not a leaf"));
        }
        if row.source_document_id == 0 {
            return Err(WeftError::InvalidState(
                "leaf has no backing source document",
            ));
        }
        Ok(row)
    }

    fn unset_row(&self, element: CompositeElementId) -> Result<Row> {
        let row = self.row(element)?;
        if row.token != ElementToken::Undefined {
            return Err(WeftError::InvalidState("slot already holds a value"));
        }
        Ok(row)
    }

    fn attached(&self, id: SourceDocId) -> Result<&Arc<SourceResultDocument>> {
        if id.0 == 0 || id.0 as usize > self.sources.len() {
            return Err(WeftError::InvalidArgument(format!(
                "source document {} is not attached",
                id.0
            )));
        }
        Ok(&self.sources[id.0 as usize - 1])
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(WeftError::InvalidState("composite document disposed"));
        }
        Ok(())
    }
}

/// Lazy iterator over an object's `(name, slot)` pairs in selection order.
pub struct CompositeObjectEntries<'a> {
    doc: &'a CompositeResultDocument,
    next: u32,
    end: u32,
}

impl<'a> Iterator for CompositeObjectEntries<'a> {
    type Item = Result<(&'a str, CompositeElementId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let row = match self.doc.db.get(Cursor::from_index(index)) {
            Ok(row) => row,
            Err(err) => {
                self.next = self.end;
                return Some(Err(err));
            }
        };
        let selection = match self
            .doc
            .plan
            .selection(SelectionId(row.operation_reference_id))
        {
            Some(selection) => selection,
            None => {
                self.next = self.end;
                return Some(Err(WeftError::InvalidState(
                    "slot selection missing from plan",
                )));
            }
        };
        Some(Ok((
            selection.response_name.as_str(),
            CompositeElementId(index),
        )))
    }
}
