//! Operation-plan structures consumed by the composition core.
//!
//! The planner compiles a client operation into selection sets ahead of
//! any subgraph round-trip and assigns each selection a stable id; this
//! module only reads that structure and performs no validation or
//! compilation of its own. The serde derives match the planner's wire
//! form so a plan can be loaded directly from its JSON dump.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};
use crate::types::{SelectionId, SelectionSetId};

/// One requested field of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Stable identifier assigned by the planner; never `0`.
    pub id: SelectionId,
    /// The field's response name (alias-aware).
    pub response_name: String,
    /// Child selection set for composite fields, `None` for leaves.
    pub selection_set: Option<SelectionSetId>,
    /// Whether the field's type is nullable.
    pub nullable: bool,
}

impl Selection {
    /// Whether the selection resolves to a scalar/enum leaf.
    pub fn is_leaf(&self) -> bool {
        self.selection_set.is_none()
    }
}

/// The fields selected on one composite type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSet {
    /// Identifier doubling as this set's index in the plan table.
    pub id: SelectionSetId,
    /// Selections in client-request order.
    pub selections: Vec<Selection>,
}

/// A compiled operation: the root selection set plus every nested set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPlan {
    /// Operation name, if the client named it.
    pub name: Option<String>,
    /// The root selection set id.
    pub root: SelectionSetId,
    /// All selection sets, indexed by [`SelectionSetId`].
    pub selection_sets: Vec<SelectionSet>,
}

impl OperationPlan {
    /// Resolves a selection set by id.
    pub fn selection_set(&self, id: SelectionSetId) -> Result<&SelectionSet> {
        self.selection_sets
            .get(id.0 as usize)
            .ok_or_else(|| WeftError::InvalidArgument(format!("unknown selection set {}", id.0)))
    }

    /// The root selection set.
    pub fn root_selection_set(&self) -> Result<&SelectionSet> {
        self.selection_set(self.root)
    }

    /// Resolves a selection node by its stable id.
    ///
    /// A linear scan: plans are small and this sits off the hot path.
    pub fn selection(&self, id: SelectionId) -> Option<&Selection> {
        self.selection_sets
            .iter()
            .flat_map(|set| set.selections.iter())
            .find(|selection| selection.id == id)
    }
}
