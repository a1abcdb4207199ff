//! Datatype-level link creation, replacement, and removal

use crate::cloner::{LayoutCloner, SubtreeCloner};
use schemalink_core::layout::{collect_subtree, layout_root_of, matching_slot, slots_showing_link};
use schemalink_core::{
    ActorId, ChangeEvent, ChangeNotifier, DatarecordId, Datatype, DatatypeId, LayoutId, LayoutNodeId, LinkEdge,
    LinkEdgeId, LinkError, Missing, RecordLinkId, RegistryState, RegistryStore, Result, SlotContent, Transaction,
    ValidationError, dispatch, find_cycle_path,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Link `local` to `new_remote` in `slot`, replacing or just removing its link to `previous_remote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetLinkRequest {
    pub local: DatatypeId,
    pub new_remote: Option<DatatypeId>,
    pub previous_remote: Option<DatatypeId>,
    pub slot: LayoutNodeId,
}

/// What the slot shows after a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOutcome {
    pub slot: LayoutNodeId,
    pub using_link: bool,
    pub linked_datatype: Option<DatatypeId>,
    /// Ancestor-side records whose link instances were dropped.
    pub unlinked_records: Vec<DatarecordId>,
}

/// Everything the removal half will touch, gathered before the first write.
#[derive(Debug)]
struct Removal {
    remote: DatatypeId,
    edge: LinkEdge,
    /// Slots currently showing the link. They survive, emptied.
    slots: Vec<LayoutNodeId>,
    /// Nodes below those slots. Tombstoned.
    nodes: BTreeSet<LayoutNodeId>,
    record_links: Vec<RecordLinkId>,
    ancestor_records: BTreeSet<DatarecordId>,
    drops_sort_fields: bool,
}

#[derive(Debug)]
struct Addition {
    remote: DatatypeId,
    source_layout: LayoutId,
    slot: LayoutNodeId,
    slot_layout: LayoutId,
    /// Matching slot in the local root's default layout when editing through a link.
    mirror: Option<(LayoutNodeId, LayoutId)>,
}

#[derive(Debug)]
struct LinkPlan {
    local: Datatype,
    slot: LayoutNodeId,
    removal: Option<Removal>,
    addition: Option<Addition>,
}

/// Creates, replaces, and removes datatype links together with their layout copies.
pub struct LinkMutator {
    store: RegistryStore,
    notifier: Arc<dyn ChangeNotifier>,
    cloner: Arc<dyn LayoutCloner>,
}

impl LinkMutator {
    pub fn new(store: RegistryStore, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            store,
            notifier,
            cloner: Arc::new(SubtreeCloner),
        }
    }

    /// Use a different layout cloning strategy.
    pub fn with_cloner(mut self, cloner: Arc<dyn LayoutCloner>) -> Self {
        self.cloner = cloner;
        self
    }

    /// Create, replace, or remove the link shown in `request.slot`.
    ///
    /// Every precondition is checked before anything is written. Once writes
    /// begin, the removal and the addition commit or roll back together.
    /// Events go out after the commit.
    pub async fn set_datatype_link(&self, actor: ActorId, request: SetLinkRequest) -> Result<LinkOutcome> {
        let cloner = Arc::clone(&self.cloner);
        let result = self
            .store
            .write(actor, |txn| {
                let link_plan = plan(txn.state(), &request, txn.config().max_layout_depth)?;
                apply(txn, link_plan, cloner.as_ref())
            })
            .await;

        let (outcome, events) = match result {
            Ok(done) => done,
            Err(e) => {
                warn!("Rejected link change {:?}: {}", request, e);
                return Err(e);
            }
        };

        info!(
            "Datatype {:?} link changed: {:?} -> {:?}",
            request.local, request.previous_remote, request.new_remote
        );
        dispatch(self.notifier.as_ref(), &events).await;
        Ok(outcome)
    }
}

/// Validate `request` against `state` and work out every row it will touch.
fn plan(state: &RegistryState, request: &SetLinkRequest, max_depth: usize) -> Result<LinkPlan> {
    let SetLinkRequest {
        local,
        new_remote,
        previous_remote,
        slot,
    } = *request;

    match (new_remote, previous_remote) {
        (None, None) => return Err(ValidationError::NoOp.into()),
        (Some(new), _) if new == local => return Err(ValidationError::SelfLink(local).into()),
        (Some(new), Some(prev)) if new == prev => return Err(ValidationError::SameRemote(new).into()),
        _ => {}
    }

    let local_row = state.datatype(local)?.clone();

    let slot_row = state.slot(slot)?;
    if slot_row.region != local {
        return Err(ValidationError::SlotRegionMismatch {
            slot,
            region: slot_row.region,
            local,
        }
        .into());
    }
    if !slot_is_free(&slot_row.content, previous_remote) {
        return Err(ValidationError::SlotNotEmpty(slot).into());
    }

    if let Some(new) = new_remote {
        let remote_row = state.datatype(new)?;
        if !remote_row.is_top_level() {
            return Err(ValidationError::RemoteNotTopLevel(new).into());
        }
        if remote_row.metadata_for == Some(local) || local_row.metadata_for == Some(new) {
            return Err(ValidationError::MetadataReference(local, new).into());
        }
    }

    let snapshot = state.snapshot();

    let removal = match previous_remote {
        Some(prev) => {
            state.datatype(prev)?;
            let edge = *state
                .link_edge(local, prev)
                .ok_or(LinkError::NotFound(Missing::LinkEdge(local, prev)))?;

            let slots = slots_showing_link(state, local, prev);
            let mut nodes = BTreeSet::new();
            for &shown in &slots {
                nodes.extend(collect_subtree(state, shown, max_depth)?);
            }
            let slots = slots.into_iter().filter(|s| !nodes.contains(s)).collect();

            let (record_links, ancestor_records) = record_links_between(state, local, prev);
            Some(Removal {
                remote: prev,
                edge,
                slots,
                nodes,
                record_links,
                ancestor_records,
                drops_sort_fields: local_row.sorts_by_fields_of(prev),
            })
        }
        None => None,
    };

    let addition = match new_remote {
        Some(new) => {
            if state.link_edge(local, new).is_some() {
                return Err(ValidationError::DuplicateLink(local, new).into());
            }
            if snapshot.ancestry_chain(local).contains(&new) {
                return Err(ValidationError::AncestorLink { local, remote: new }.into());
            }

            let linked_from = match previous_remote {
                Some(prev) => snapshot.linked_from_without(local, prev),
                None => snapshot.linked_from(),
            };
            if let Some(path) = find_cycle_path(&linked_from, local, new) {
                return Err(LinkError::Cycle {
                    local,
                    remote: new,
                    path,
                });
            }

            let source = state.default_layout(new)?;
            // Bound the copy now so the clone cannot fail on depth halfway through.
            collect_subtree(state, source.root, max_depth)?;

            let slot_layout = slot_row.layout;
            let mirror = if layout_root_of(state, slot_row)? != local_row.grandparent {
                let home = state.default_layout(local_row.grandparent)?;
                let mirror = matching_slot(state, slot, home.id).ok_or(ValidationError::UnmatchedSlot {
                    slot,
                    root: local_row.grandparent,
                })?;
                let mirror_row = state.slot(mirror)?;
                if mirror_row.region != local || !slot_is_free(&mirror_row.content, previous_remote) {
                    return Err(ValidationError::SlotNotEmpty(mirror).into());
                }
                Some((mirror, home.id))
            } else {
                None
            };

            Some(Addition {
                remote: new,
                source_layout: source.id,
                slot,
                slot_layout,
                mirror,
            })
        }
        None => None,
    };

    Ok(LinkPlan {
        local: local_row,
        slot,
        removal,
        addition,
    })
}

/// Links may only go into an empty slot, or one showing the link being replaced.
fn slot_is_free(content: &SlotContent, previous: Option<DatatypeId>) -> bool {
    match content {
        SlotContent::Empty => true,
        SlotContent::Linked(shown) => Some(*shown) == previous,
        SlotContent::Fields(_) => false,
    }
}

/// Active record links realizing `local -> remote`, and their ancestor-side records.
fn record_links_between(
    state: &RegistryState,
    local: DatatypeId,
    remote: DatatypeId,
) -> (Vec<RecordLinkId>, BTreeSet<DatarecordId>) {
    let mut ids = Vec::new();
    let mut ancestors = BTreeSet::new();
    for edge in state.record_links.values().filter(|e| e.is_active()) {
        if state.record_type(edge.ancestor) == Some(local) && state.record_type(edge.descendant) == Some(remote) {
            ids.push(edge.id);
            ancestors.insert(edge.ancestor);
        }
    }
    (ids, ancestors)
}

/// Write a validated plan. Returns the outcome and the events to send after commit.
fn apply(
    txn: &mut Transaction<'_>,
    plan: LinkPlan,
    cloner: &dyn LayoutCloner,
) -> Result<(LinkOutcome, Vec<ChangeEvent>)> {
    let LinkPlan {
        mut local,
        slot,
        removal,
        addition,
    } = plan;
    let mut local_changed = false;
    let mut unlinked_records = BTreeSet::new();

    if let Some(removal) = &removal {
        for &id in &removal.nodes {
            let mut node = txn.state().slot(id)?.clone();
            node.deleted = Some(txn.tombstone());
            txn.put_layout_node(node);
        }
        for &id in &removal.slots {
            let mut node = txn.state().slot(id)?.clone();
            node.content = SlotContent::Empty;
            txn.put_layout_node(node);
        }

        let mut edge = removal.edge;
        edge.deleted = Some(txn.tombstone());
        txn.put_link_edge(edge);

        for id in &removal.record_links {
            if let Some(mut link) = txn.state().record_links.get(id).copied() {
                link.deleted = Some(txn.tombstone());
                txn.put_record_link(link);
            }
        }
        for &record in &removal.ancestor_records {
            if let Some(root) = txn.state().record_root(record) {
                unlinked_records.insert(root);
            }
        }

        if removal.drops_sort_fields {
            local.sort_fields.retain(|f| f.owner != removal.remote);
            txn.clear_ordering_cache(local.id);
            local_changed = true;
        }

        tracing::debug!(
            "Unlinked {:?} -> {:?}: {} slots emptied, {} layout nodes and {} record links tombstoned",
            local.id,
            removal.remote,
            removal.slots.len(),
            removal.nodes.len(),
            removal.record_links.len()
        );
    }

    if let Some(addition) = &addition {
        let id = LinkEdgeId(txn.allocate_id());
        txn.put_link_edge(LinkEdge {
            id,
            ancestor: local.id,
            descendant: addition.remote,
            multiple_allowed: true,
            deleted: None,
        });

        let cloned = cloner
            .clone_layout(txn, addition.source_layout, addition.remote, addition.slot)
            .map_err(|e| into_transaction_error(cloner, e))?;
        bump_sync_version(txn, addition.slot_layout)?;

        if let Some((mirror, mirror_layout)) = addition.mirror {
            cloner
                .clone_layout(txn, addition.source_layout, addition.remote, mirror)
                .map_err(|e| into_transaction_error(cloner, e))?;
            bump_sync_version(txn, mirror_layout)?;
        }

        tracing::debug!(
            "Linked {:?} -> {:?} with {} cloned layout nodes{}",
            local.id,
            addition.remote,
            cloned,
            if addition.mirror.is_some() { " (mirrored)" } else { "" }
        );
    }

    if local.is_template {
        local.template_revision += 1;
        local_changed = true;
    }
    let (local_id, local_root) = (local.id, local.grandparent);
    if local_changed {
        txn.put_datatype(local);
    }
    txn.invalidate_top_level_layouts();

    let new_remote = addition.as_ref().map(|a| a.remote);
    let previous_remote = removal.as_ref().map(|r| r.remote);

    let mut events = vec![
        ChangeEvent::DatatypeModified {
            datatype: local_id,
            clear_record_cache: previous_remote.is_some(),
        },
        ChangeEvent::DatatypeLinkStatusChanged {
            root: local_root,
            new_remote,
            previous_remote,
        },
    ];
    events.extend(unlinked_records.iter().map(|&record| ChangeEvent::RecordModified { record }));

    let outcome = LinkOutcome {
        slot,
        using_link: new_remote.is_some(),
        linked_datatype: new_remote,
        unlinked_records: unlinked_records.into_iter().collect(),
    };
    Ok((outcome, events))
}

fn bump_sync_version(txn: &mut Transaction<'_>, layout: LayoutId) -> Result<()> {
    let mut row = *txn.state().layout(layout)?;
    row.sync_version += 1;
    txn.put_layout(row);
    Ok(())
}

/// Anything failing once writes have started aborts the whole unit.
fn into_transaction_error(cloner: &dyn LayoutCloner, e: LinkError) -> LinkError {
    match e {
        LinkError::Transaction(_) => e,
        other => LinkError::Transaction(format!("{} cloner failed: {}", cloner.name(), other)),
    }
}
