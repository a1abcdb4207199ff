//! Schemalink Linker: datatype link mutation and record link sync

pub mod cloner;
pub mod mutator;
pub mod records;


#[cfg(test)]
pub mod test_utils;

pub use cloner::{LayoutCloner, SubtreeCloner};
pub use mutator::{LinkMutator, LinkOutcome, SetLinkRequest};
pub use records::{LinkRole, RecordLinker, SyncMode, SyncOutcome, SyncRequest, UnlinkOutcome};
