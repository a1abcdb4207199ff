//! Error taxonomy for link-graph mutations

use crate::model::*;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

/// Everything a link or record-link mutation can fail with.
///
/// Validation, cycle and not-found errors are raised before the first write.
/// `Transaction` means writes had begun and were rolled back.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("linking {local:?} -> {remote:?} would create a cycle through {path:?}")]
    Cycle {
        local: DatatypeId,
        remote: DatatypeId,
        /// Link chain that would close the loop, starting at `remote`.
        path: Vec<DatatypeId>,
    },

    #[error("not found: {0}")]
    NotFound(#[from] Missing),

    #[error("transaction rolled back: {0}")]
    Transaction(String),
}

impl LinkError {
    /// True for errors raised before any write was issued.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, LinkError::Transaction(_))
    }
}

/// Caller errors. Nothing is written when one of these is returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("datatype {0:?} cannot link to itself")]
    SelfLink(DatatypeId),

    #[error("neither a new nor a previous remote datatype was given")]
    NoOp,

    #[error("new and previous remote datatype are both {0:?}")]
    SameRemote(DatatypeId),

    #[error("slot {0:?} already holds fields or another link")]
    SlotNotEmpty(LayoutNodeId),

    #[error("slot {slot:?} renders datatype {region:?}, not {local:?}")]
    SlotRegionMismatch {
        slot: LayoutNodeId,
        region: DatatypeId,
        local: DatatypeId,
    },

    #[error("datatype {0:?} is not top-level and cannot be a link target")]
    RemoteNotTopLevel(DatatypeId),

    #[error("datatypes {0:?} and {1:?} are in a metadata relationship")]
    MetadataReference(DatatypeId, DatatypeId),

    #[error("datatype {0:?} already links to {1:?}")]
    DuplicateLink(DatatypeId, DatatypeId),

    #[error("datatype {remote:?} is a structural ancestor of {local:?}")]
    AncestorLink {
        local: DatatypeId,
        remote: DatatypeId,
    },

    #[error("link {ancestor:?} -> {descendant:?} allows a single record, request would leave {count} on record {record:?}")]
    Cardinality {
        ancestor: DatatypeId,
        descendant: DatatypeId,
        record: DatarecordId,
        count: usize,
    },

    #[error("record {record:?} has type {actual:?}, which is neither side of the link")]
    RoleMismatch {
        record: DatarecordId,
        actual: DatatypeId,
    },

    #[error("record {record:?} has type {actual:?}, expected {expected:?}")]
    RemoteTypeMismatch {
        record: DatarecordId,
        expected: DatatypeId,
        actual: DatatypeId,
    },

    #[error("layout subtree under {0:?} is deeper than the configured limit of {1}")]
    LayoutTooDeep(LayoutNodeId, usize),

    #[error("no matching slot for {slot:?} in the default layout of {root:?}")]
    UnmatchedSlot {
        slot: LayoutNodeId,
        root: DatatypeId,
    },
}

/// A referenced row that is missing or tombstoned.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    #[error("datatype {0:?}")]
    Datatype(DatatypeId),

    #[error("datarecord {0:?}")]
    Datarecord(DatarecordId),

    #[error("link {0:?} -> {1:?}")]
    LinkEdge(DatatypeId, DatatypeId),

    #[error("layout slot {0:?}")]
    Slot(LayoutNodeId),

    #[error("layout {0:?}")]
    Layout(LayoutId),

    #[error("default layout of datatype {0:?}")]
    DefaultLayout(DatatypeId),
}

/// Delivery failure reported by a change notifier. Logged, never surfaced.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no subscribers")]
    NoSubscribers,

    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}
