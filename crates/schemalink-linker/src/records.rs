//! Datarecord-level link reconciliation

use schemalink_core::{
    ActorId, ChangeEvent, ChangeNotifier, DatarecordId, DatatypeId, LinkError, Missing, RecordLinkEdge, RecordLinkId,
    RegistryState, RegistryStore, Result, Transaction, ValidationError, dispatch,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How existing links that are not in the desired set are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Remove them: the desired set becomes the full set.
    FullSync,
    /// Leave them: only add what is missing.
    AddOnly,
}

/// Which end of the link edge the local record sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRole {
    Ancestor,
    Descendant,
}

/// Reconcile `local_record`'s links over `ancestor_type -> descendant_type` with `desired`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub local_record: DatarecordId,
    pub ancestor_type: DatatypeId,
    pub descendant_type: DatatypeId,
    pub desired: BTreeSet<DatarecordId>,
    pub mode: SyncMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub created: Vec<RecordLinkId>,
    pub removed: Vec<RecordLinkId>,
    /// Root records of the remote ends of every created or removed link.
    pub affected_roots: Vec<DatarecordId>,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Result of cascading a record's removal through its links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkOutcome {
    pub removed: Vec<RecordLinkId>,
    /// Opposite-side root records, grouped by the opposite record's type.
    pub affected_roots: BTreeMap<DatatypeId, BTreeSet<DatarecordId>>,
}

/// Keeps datarecord link instances in step with the link edges they realize.
pub struct RecordLinker {
    store: RegistryStore,
    notifier: Arc<dyn ChangeNotifier>,
}

impl RecordLinker {
    pub fn new(store: RegistryStore, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Make `request.local_record`'s links to the remote type match `request.desired`.
    ///
    /// The cardinality check and the diff read the same locked state as the
    /// writes. A call that changes nothing writes nothing and sends no events.
    pub async fn sync_record_links(&self, actor: ActorId, request: SyncRequest) -> Result<SyncOutcome> {
        let result = self.store.write(actor, |txn| sync_in(txn, &request)).await;

        let (outcome, local_root, remote_type) = match result {
            Ok(done) => done,
            Err(e) => {
                warn!("Rejected record link sync for {:?}: {}", request.local_record, e);
                return Err(e);
            }
        };

        if outcome.is_noop() {
            debug!("Record links of {:?} already in sync", request.local_record);
            return Ok(outcome);
        }

        info!(
            "Synced record links of {:?}: {} created, {} removed",
            request.local_record,
            outcome.created.len(),
            outcome.removed.len()
        );

        let mut touched: BTreeSet<DatarecordId> = outcome.affected_roots.iter().copied().collect();
        touched.insert(local_root);
        let mut events: Vec<ChangeEvent> = touched
            .into_iter()
            .map(|record| ChangeEvent::RecordModified { record })
            .collect();
        events.push(ChangeEvent::RecordLinkStatusChanged {
            roots: outcome.affected_roots.clone(),
            remote_type,
        });
        dispatch(self.notifier.as_ref(), &events).await;

        Ok(outcome)
    }

    /// Drop every link touching `record`, on either side.
    ///
    /// This is the cascade for a record deleted elsewhere, so the record
    /// itself may already be tombstoned.
    pub async fn unlink_record(&self, actor: ActorId, record: DatarecordId) -> Result<UnlinkOutcome> {
        let outcome = self.store.write(actor, |txn| unlink_in(txn, record)).await?;
        self.announce_unlink(record, &outcome).await;
        Ok(outcome)
    }

    /// Tombstone `record` and cascade its link removal in one transaction.
    pub async fn delete_record(&self, actor: ActorId, record: DatarecordId) -> Result<UnlinkOutcome> {
        let outcome = self
            .store
            .write(actor, |txn| {
                let mut row = *txn.state().datarecord(record)?;
                row.deleted = Some(txn.tombstone());
                txn.put_datarecord(row);
                unlink_in(txn, record)
            })
            .await?;

        info!("Deleted record {:?}", record);
        self.announce_unlink(record, &outcome).await;
        Ok(outcome)
    }

    async fn announce_unlink(&self, record: DatarecordId, outcome: &UnlinkOutcome) {
        if outcome.removed.is_empty() {
            return;
        }
        info!("Removed {} record links of {:?}", outcome.removed.len(), record);

        let all_roots: BTreeSet<DatarecordId> = outcome.affected_roots.values().flatten().copied().collect();
        let mut events: Vec<ChangeEvent> = all_roots
            .into_iter()
            .map(|record| ChangeEvent::RecordModified { record })
            .collect();
        for (remote_type, roots) in &outcome.affected_roots {
            events.push(ChangeEvent::RecordLinkStatusChanged {
                roots: roots.iter().copied().collect(),
                remote_type: *remote_type,
            });
        }
        dispatch(self.notifier.as_ref(), &events).await;
    }
}

fn sync_in(txn: &mut Transaction<'_>, request: &SyncRequest) -> Result<(SyncOutcome, DatarecordId, DatatypeId)> {
    let state = txn.state();
    let edge = *state
        .link_edge(request.ancestor_type, request.descendant_type)
        .ok_or(LinkError::NotFound(Missing::LinkEdge(
            request.ancestor_type,
            request.descendant_type,
        )))?;

    let local = *state.datarecord(request.local_record)?;
    let (role, remote_type) = if local.datatype == request.ancestor_type {
        (LinkRole::Ancestor, request.descendant_type)
    } else if local.datatype == request.descendant_type {
        (LinkRole::Descendant, request.ancestor_type)
    } else {
        return Err(ValidationError::RoleMismatch {
            record: local.id,
            actual: local.datatype,
        }
        .into());
    };

    for &remote in &request.desired {
        let row = state.datarecord(remote)?;
        if row.datatype != remote_type {
            return Err(ValidationError::RemoteTypeMismatch {
                record: remote,
                expected: remote_type,
                actual: row.datatype,
            }
            .into());
        }
    }

    let current = current_links(state, local.id, role, remote_type);

    let mut wanted = request.desired.clone();
    let mut removals = Vec::new();
    let mut kept = 0usize;
    for link in &current {
        let remote = link.other_end(local.id);
        if wanted.remove(&remote) {
            kept += 1;
        } else if request.mode == SyncMode::FullSync {
            removals.push(*link);
        } else {
            kept += 1;
        }
    }

    if !edge.multiple_allowed {
        check_single_link(state, request, local.id, role, kept, &wanted)?;
    }

    // Everything below is a write; gather what they need from the state first.
    let mut roots = BTreeSet::new();
    for link in &removals {
        roots.extend(state.record_root(link.other_end(local.id)));
    }
    for &remote in &wanted {
        roots.extend(state.record_root(remote));
    }
    let order_depends_on_remote = state.datatype(local.datatype)?.sorts_by_fields_of(remote_type);

    let mut outcome = SyncOutcome::default();

    for mut link in removals {
        link.deleted = Some(txn.tombstone());
        outcome.removed.push(link.id);
        txn.put_record_link(link);
    }

    for remote in wanted {
        let id = RecordLinkId(txn.allocate_id());
        let (ancestor, descendant) = match role {
            LinkRole::Ancestor => (local.id, remote),
            LinkRole::Descendant => (remote, local.id),
        };
        txn.put_record_link(RecordLinkEdge {
            id,
            ancestor,
            descendant,
            deleted: None,
        });
        outcome.created.push(id);
    }

    if !outcome.is_noop() && order_depends_on_remote && txn.clear_ordering_cache(local.datatype) {
        debug!("Cleared ordering cache of {:?}", local.datatype);
    }

    outcome.affected_roots = roots.into_iter().collect();
    Ok((outcome, local.grandparent, remote_type))
}

/// Active links of `record`, in `role`, whose other end has type `remote_type`.
fn current_links(
    state: &RegistryState,
    record: DatarecordId,
    role: LinkRole,
    remote_type: DatatypeId,
) -> Vec<RecordLinkEdge> {
    state
        .record_links_of(record)
        .filter(|link| match role {
            LinkRole::Ancestor => link.ancestor == record,
            LinkRole::Descendant => link.descendant == record,
        })
        .filter(|link| state.record_type(link.other_end(record)) == Some(remote_type))
        .copied()
        .collect()
}

/// Enforce "at most one descendant record per ancestor record" for single-valued links.
fn check_single_link(
    state: &RegistryState,
    request: &SyncRequest,
    local: DatarecordId,
    role: LinkRole,
    kept: usize,
    wanted: &BTreeSet<DatarecordId>,
) -> Result<()> {
    let violation = |record: DatarecordId, count: usize| -> LinkError {
        ValidationError::Cardinality {
            ancestor: request.ancestor_type,
            descendant: request.descendant_type,
            record,
            count,
        }
        .into()
    };

    match role {
        LinkRole::Ancestor => {
            let total = kept + wanted.len();
            if total > 1 {
                return Err(violation(local, total));
            }
        }
        LinkRole::Descendant => {
            for &ancestor in wanted {
                let existing = current_links(state, ancestor, LinkRole::Ancestor, request.descendant_type).len();
                if existing + 1 > 1 {
                    return Err(violation(ancestor, existing + 1));
                }
            }
        }
    }
    Ok(())
}

fn unlink_in(txn: &mut Transaction<'_>, record: DatarecordId) -> Result<UnlinkOutcome> {
    let state = txn.state();
    let own_type = state
        .record_type(record)
        .ok_or(LinkError::NotFound(Missing::Datarecord(record)))?;

    let links: Vec<RecordLinkEdge> = state.record_links_of(record).copied().collect();
    let mut outcome = UnlinkOutcome::default();

    for mut link in links {
        let other = link.other_end(record);
        if let (Some(other_type), Some(root)) = (txn.state().record_type(other), txn.state().record_root(other)) {
            outcome.affected_roots.entry(other_type).or_default().insert(root);
        }
        link.deleted = Some(txn.tombstone());
        outcome.removed.push(link.id);
        txn.put_record_link(link);
    }

    let opposite_types: Vec<DatatypeId> = outcome.affected_roots.keys().copied().collect();
    for other_type in opposite_types {
        let sorts_by_us = txn
            .state()
            .datatype(other_type)
            .is_ok_and(|d| d.sorts_by_fields_of(own_type));
        if sorts_by_us {
            txn.clear_ordering_cache(other_type);
        }
    }

    Ok(outcome)
}
