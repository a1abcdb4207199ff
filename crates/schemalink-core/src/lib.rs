//! Schemalink Core: registry model, schema snapshot, and transactional store

pub mod model;
pub mod error;
pub mod graph;
pub mod cycle;
pub mod layout;
pub mod store;
pub mod events;
pub mod config;
pub mod persist;


pub use model::{
    ActorId, Datarecord, DatarecordId, Datatype, DatatypeId, FieldId, Layout, LayoutId, LayoutNode,
    LayoutNodeId, LinkEdge, LinkEdgeId, RecordLinkEdge, RecordLinkId, SlotContent, SortField,
    StructuralEdge, Tombstone,
};
pub use error::{LinkError, Missing, NotifyError, Result, ValidationError};
pub use graph::{SchemaEdge, SchemaSnapshot};
pub use cycle::{LinkedFrom, find_cycle_path, would_create_cycle};
pub use store::{RegistryState, RegistryStore, Transaction};
pub use events::{BroadcastNotifier, ChangeEvent, ChangeNotifier, FanoutNotifier, InvalidationTracker, RecordingNotifier, dispatch};
pub use config::RegistryConfig;
pub use persist::{REGISTRY_DIR, REGISTRY_FILE, registry_path, save_registry, load_registry, clear_registry};
