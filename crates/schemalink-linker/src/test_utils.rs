//! Test fixtures for the linker

use crate::{LinkMutator, LinkOutcome, RecordLinker, SetLinkRequest};
use schemalink_core::*;
use std::sync::Arc;

pub const ACTOR: ActorId = ActorId(42);

/// A store with a recording notifier wired into both services.
pub struct Fixture {
    pub store: RegistryStore,
    pub events: Arc<RecordingNotifier>,
    pub mutator: LinkMutator,
    pub linker: RecordLinker,
}

impl Fixture {
    pub fn new() -> Self {
        let store = RegistryStore::new(RegistryConfig::default());
        let events = Arc::new(RecordingNotifier::new());
        let notifier: Arc<dyn ChangeNotifier> = events.clone();
        Fixture {
            mutator: LinkMutator::new(store.clone(), Arc::clone(&notifier)),
            linker: RecordLinker::new(store.clone(), notifier),
            store,
            events,
        }
    }

    /// Run setup writes that must succeed.
    pub async fn build<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> T {
        self.store.write(ActorId(0), f).await.unwrap()
    }

    pub async fn datatype(&self, name: &str) -> DatatypeId {
        self.build(|txn| Ok(txn.add_datatype(name, false))).await
    }

    /// A new empty slot for `region` directly under the root of `owner`'s default layout.
    pub async fn empty_slot(&self, owner: DatatypeId, region: DatatypeId) -> LayoutNodeId {
        self.build(|txn| {
            let root = txn.state().default_layout(owner)?.root;
            txn.add_slot(root, region, SlotContent::Empty)
        })
        .await
    }

    /// Give `datatype`'s default layout a couple of field slots so clones have something to copy.
    pub async fn furnish(&self, datatype: DatatypeId) -> Vec<LayoutNodeId> {
        self.build(|txn| {
            let root = txn.state().default_layout(datatype)?.root;
            let group = txn.add_slot(root, datatype, SlotContent::Empty)?;
            let fields = txn.add_slot(group, datatype, SlotContent::Fields(vec![FieldId(1), FieldId(2)]))?;
            Ok(vec![group, fields])
        })
        .await
    }

    /// Link a top-level `local` to `remote` through a fresh slot in its own layout.
    pub async fn link(&self, local: DatatypeId, remote: DatatypeId) -> LinkOutcome {
        let slot = self.empty_slot(local, local).await;
        self.mutator
            .set_datatype_link(
                ACTOR,
                SetLinkRequest {
                    local,
                    new_remote: Some(remote),
                    previous_remote: None,
                    slot,
                },
            )
            .await
            .unwrap()
    }

    pub async fn version(&self) -> u64 {
        self.store.read().await.version()
    }

    /// Active nodes of a layout, by id.
    pub async fn active_nodes(&self, layout: LayoutId) -> Vec<LayoutNode> {
        let state = self.store.read().await;
        state
            .layout_nodes
            .values()
            .filter(|n| n.is_active() && n.layout == layout)
            .cloned()
            .collect()
    }

    pub async fn default_layout(&self, datatype: DatatypeId) -> Layout {
        *self.store.read().await.default_layout(datatype).unwrap()
    }

    pub async fn records(&self, datatype: DatatypeId, count: usize) -> Vec<DatarecordId> {
        self.build(|txn| (0..count).map(|_| txn.add_datarecord(datatype)).collect())
            .await
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
