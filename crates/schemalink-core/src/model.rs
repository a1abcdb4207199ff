//! Core data structures for the schema registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a datatype (schema definition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct DatatypeId(pub u64);

/// Identifier of a datarecord (instance of a datatype).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct DatarecordId(pub u64);

/// Identifier of a rendering layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct LayoutId(pub u64);

/// Identifier of a single slot inside a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct LayoutNodeId(pub u64);

/// Identifier of a datatype-level link edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct LinkEdgeId(pub u64);

/// Identifier of a datarecord-level link edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct RecordLinkId(pub u64);

/// The user on whose behalf a mutation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ActorId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct FieldId(pub u64);

/// Soft-deletion marker. A row carrying one is invisible to normal queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub at: DateTime<Utc>,
    pub by: ActorId,
}

impl Tombstone {
    pub fn now(by: ActorId) -> Self {
        Tombstone { at: Utc::now(), by }
    }
}

/// A field participating in a datatype's default ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    pub field: FieldId,
    /// Datatype that owns the field. May be a linked datatype.
    pub owner: DatatypeId,
}

/// A schema definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Datatype {
    pub id: DatatypeId,
    pub name: String,
    pub is_template: bool,
    pub template_group: DatatypeId,
    /// Structural root. Equal to `id` for top-level datatypes.
    pub grandparent: DatatypeId,
    /// Set when this datatype stores metadata describing another datatype.
    pub metadata_for: Option<DatatypeId>,
    /// Monotonic revision counter, only meaningful for templates.
    pub template_revision: u64,
    pub sort_fields: Vec<SortField>,
    pub deleted: Option<Tombstone>,
}

impl Datatype {
    /// A fresh top-level, non-template datatype.
    pub fn top_level(id: DatatypeId, name: impl Into<String>) -> Self {
        Datatype {
            id,
            name: name.into(),
            is_template: false,
            template_group: id,
            grandparent: id,
            metadata_for: None,
            template_revision: 0,
            sort_fields: Vec::new(),
            deleted: None,
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.grandparent == self.id
    }

    pub fn is_active(&self) -> bool {
        self.deleted.is_none()
    }

    /// True if the default ordering uses any field owned by `owner`.
    pub fn sorts_by_fields_of(&self, owner: DatatypeId) -> bool {
        self.sort_fields.iter().any(|f| f.owner == owner)
    }
}

/// Ownership relation between two datatypes. Never mutated by the linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralEdge {
    pub ancestor: DatatypeId,
    pub descendant: DatatypeId,
    pub deleted: Option<Tombstone>,
}

/// Non-owning cross reference between two datatypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub id: LinkEdgeId,
    pub ancestor: DatatypeId,
    pub descendant: DatatypeId,
    pub multiple_allowed: bool,
    pub deleted: Option<Tombstone>,
}

impl LinkEdge {
    pub fn is_active(&self) -> bool {
        self.deleted.is_none()
    }
}

/// A rendering template for one top-level datatype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub id: LayoutId,
    /// The top-level datatype whose viewing context this layout is.
    pub datatype: DatatypeId,
    pub is_default: bool,
    pub root: LayoutNodeId,
    /// Bumped whenever the layout's linked content changes shape.
    pub sync_version: u64,
    pub deleted: Option<Tombstone>,
}

/// What a layout slot currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotContent {
    Empty,
    Fields(Vec<FieldId>),
    /// A cloned copy of the linked datatype's layout lives below this slot.
    Linked(DatatypeId),
}

/// A slot in a layout tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub id: LayoutNodeId,
    pub layout: LayoutId,
    pub parent: Option<LayoutNodeId>,
    /// The datatype whose region this slot renders.
    pub region: DatatypeId,
    pub content: SlotContent,
    /// Node this one was cloned from, if any.
    pub source: Option<LayoutNodeId>,
    pub deleted: Option<Tombstone>,
}

impl LayoutNode {
    pub fn is_active(&self) -> bool {
        self.deleted.is_none()
    }
}

/// An instance of a datatype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datarecord {
    pub id: DatarecordId,
    pub datatype: DatatypeId,
    /// Structural root record. Equal to `id` for top-level records.
    pub grandparent: DatarecordId,
    pub deleted: Option<Tombstone>,
}

impl Datarecord {
    pub fn is_active(&self) -> bool {
        self.deleted.is_none()
    }
}

/// Instance-level materialization of a [`LinkEdge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLinkEdge {
    pub id: RecordLinkId,
    pub ancestor: DatarecordId,
    pub descendant: DatarecordId,
    pub deleted: Option<Tombstone>,
}

impl RecordLinkEdge {
    pub fn is_active(&self) -> bool {
        self.deleted.is_none()
    }

    /// The endpoint that is not `record`.
    pub fn other_end(&self, record: DatarecordId) -> DatarecordId {
        if self.ancestor == record {
            self.descendant
        } else {
            self.ancestor
        }
    }
}
