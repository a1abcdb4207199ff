//! Registry storage with request-scoped atomic transactions
//!
//! All rows live in one [`RegistryState`] behind a `tokio::sync::RwLock`.
//! [`RegistryStore::write`] holds the write lock for the whole
//! check-then-mutate closure, so validation reads and writes always see the
//! same state. Every write goes through [`Transaction`], which journals the
//! prior row; if the closure fails, the journal is replayed backwards.

use crate::config::RegistryConfig;
use crate::error::{LinkError, Missing, Result};
use crate::graph::SchemaSnapshot;
use crate::model::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

/// Every table of the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryState {
    pub datatypes: BTreeMap<DatatypeId, Datatype>,
    pub structural_edges: Vec<StructuralEdge>,
    pub link_edges: BTreeMap<LinkEdgeId, LinkEdge>,
    pub layouts: BTreeMap<LayoutId, Layout>,
    pub layout_nodes: BTreeMap<LayoutNodeId, LayoutNode>,
    pub datarecords: BTreeMap<DatarecordId, Datarecord>,
    pub record_links: BTreeMap<RecordLinkId, RecordLinkEdge>,
    /// Cached default ordering of each datatype's records.
    pub ordering_cache: BTreeMap<DatatypeId, Vec<DatarecordId>>,
    /// Lazily built index of the default layouts of top-level datatypes.
    #[serde(skip)]
    top_level_layouts: Option<Vec<LayoutId>>,
    next_id: u64,
    /// Number of committed transactions that wrote at least one row.
    version: u64,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn snapshot(&self) -> SchemaSnapshot {
        SchemaSnapshot::capture(self)
    }

    // ── Active-row lookups ──────────────────────────────────

    pub fn datatype(&self, id: DatatypeId) -> Result<&Datatype> {
        self.datatypes
            .get(&id)
            .filter(|d| d.is_active())
            .ok_or(LinkError::NotFound(Missing::Datatype(id)))
    }

    pub fn datarecord(&self, id: DatarecordId) -> Result<&Datarecord> {
        self.datarecords
            .get(&id)
            .filter(|r| r.is_active())
            .ok_or(LinkError::NotFound(Missing::Datarecord(id)))
    }

    pub fn slot(&self, id: LayoutNodeId) -> Result<&LayoutNode> {
        self.layout_nodes
            .get(&id)
            .filter(|n| n.is_active())
            .ok_or(LinkError::NotFound(Missing::Slot(id)))
    }

    pub fn layout(&self, id: LayoutId) -> Result<&Layout> {
        self.layouts
            .get(&id)
            .filter(|l| l.deleted.is_none())
            .ok_or(LinkError::NotFound(Missing::Layout(id)))
    }

    /// The active default layout of a datatype.
    pub fn default_layout(&self, datatype: DatatypeId) -> Result<&Layout> {
        self.layouts
            .values()
            .find(|l| l.deleted.is_none() && l.is_default && l.datatype == datatype)
            .ok_or(LinkError::NotFound(Missing::DefaultLayout(datatype)))
    }

    /// The active link edge `ancestor -> descendant`.
    pub fn link_edge(&self, ancestor: DatatypeId, descendant: DatatypeId) -> Option<&LinkEdge> {
        self.link_edges
            .values()
            .find(|e| e.is_active() && e.ancestor == ancestor && e.descendant == descendant)
    }

    /// Active children of a layout slot, in id order.
    pub fn children(&self, parent: LayoutNodeId) -> impl Iterator<Item = &LayoutNode> + '_ {
        self.layout_nodes
            .values()
            .filter(move |n| n.is_active() && n.parent == Some(parent))
    }

    /// Active record link edges touching `record` on either side.
    pub fn record_links_of(&self, record: DatarecordId) -> impl Iterator<Item = &RecordLinkEdge> + '_ {
        self.record_links
            .values()
            .filter(move |e| e.is_active() && (e.ancestor == record || e.descendant == record))
    }

    /// Datatype of a record, whether or not the record is still active.
    pub fn record_type(&self, record: DatarecordId) -> Option<DatatypeId> {
        self.datarecords.get(&record).map(|r| r.datatype)
    }

    /// Structural root record of a record, whether or not it is still active.
    pub fn record_root(&self, record: DatarecordId) -> Option<DatarecordId> {
        self.datarecords.get(&record).map(|r| r.grandparent)
    }

    /// Default layouts of every active top-level datatype.
    pub fn top_level_layouts(&mut self) -> &[LayoutId] {
        if self.top_level_layouts.is_none() {
            let index: Vec<LayoutId> = self
                .layouts
                .values()
                .filter(|l| l.deleted.is_none() && l.is_default)
                .filter(|l| self.datatypes.get(&l.datatype).is_some_and(|d| d.is_active() && d.is_top_level()))
                .map(|l| l.id)
                .collect();
            tracing::debug!("Rebuilt top-level layout index ({} layouts)", index.len());
            self.top_level_layouts = Some(index);
        }
        self.top_level_layouts.as_deref().unwrap_or_default()
    }

    pub fn has_top_level_layout_index(&self) -> bool {
        self.top_level_layouts.is_some()
    }
}

/// Prior value of one row, restored on rollback.
#[derive(Debug)]
enum Undo {
    Datatype(DatatypeId, Option<Datatype>),
    StructuralEdges(usize),
    LinkEdge(LinkEdgeId, Option<LinkEdge>),
    Layout(LayoutId, Option<Layout>),
    LayoutNode(LayoutNodeId, Option<LayoutNode>),
    Datarecord(DatarecordId, Option<Datarecord>),
    RecordLink(RecordLinkId, Option<RecordLinkEdge>),
    OrderingCache(DatatypeId, Option<Vec<DatarecordId>>),
    TopLevelLayouts(Option<Vec<LayoutId>>),
}

fn restore<K: Ord, V>(table: &mut BTreeMap<K, V>, key: K, prior: Option<V>) {
    match prior {
        Some(value) => {
            table.insert(key, value);
        }
        None => {
            table.remove(&key);
        }
    }
}

/// One atomic unit of work against the registry.
pub struct Transaction<'a> {
    state: &'a mut RegistryState,
    actor: ActorId,
    config: &'a RegistryConfig,
    journal: Vec<Undo>,
}

impl<'a> Transaction<'a> {
    fn new(state: &'a mut RegistryState, actor: ActorId, config: &'a RegistryConfig) -> Self {
        Transaction {
            state,
            actor,
            config,
            journal: Vec::new(),
        }
    }

    /// Read access to the state as modified so far by this transaction.
    pub fn state(&self) -> &RegistryState {
        self.state
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn config(&self) -> &RegistryConfig {
        self.config
    }

    /// Number of row writes issued so far.
    pub fn writes(&self) -> usize {
        self.journal.len()
    }

    /// A tombstone stamped with this transaction's actor.
    pub fn tombstone(&self) -> Tombstone {
        Tombstone::now(self.actor)
    }

    pub fn allocate_id(&mut self) -> u64 {
        self.state.next_id += 1;
        self.state.next_id
    }

    // ── Row writes ──────────────────────────────────────────

    pub fn put_datatype(&mut self, row: Datatype) {
        let id = row.id;
        let prior = self.state.datatypes.insert(id, row);
        self.journal.push(Undo::Datatype(id, prior));
        self.invalidate_top_level_layouts();
    }

    pub fn put_link_edge(&mut self, row: LinkEdge) {
        let prior = self.state.link_edges.insert(row.id, row);
        self.journal.push(Undo::LinkEdge(row.id, prior));
    }

    pub fn put_layout(&mut self, row: Layout) {
        let prior = self.state.layouts.insert(row.id, row);
        self.journal.push(Undo::Layout(row.id, prior));
        self.invalidate_top_level_layouts();
    }

    pub fn put_layout_node(&mut self, row: LayoutNode) {
        let id = row.id;
        let prior = self.state.layout_nodes.insert(id, row);
        self.journal.push(Undo::LayoutNode(id, prior));
    }

    pub fn put_datarecord(&mut self, row: Datarecord) {
        let prior = self.state.datarecords.insert(row.id, row);
        self.journal.push(Undo::Datarecord(row.id, prior));
    }

    pub fn put_record_link(&mut self, row: RecordLinkEdge) {
        let prior = self.state.record_links.insert(row.id, row);
        self.journal.push(Undo::RecordLink(row.id, prior));
    }

    pub fn put_structural_edge(&mut self, row: StructuralEdge) {
        self.journal.push(Undo::StructuralEdges(self.state.structural_edges.len()));
        self.state.structural_edges.push(row);
    }

    /// Drop the cached default ordering of a datatype. Returns false if none was cached.
    pub fn clear_ordering_cache(&mut self, datatype: DatatypeId) -> bool {
        match self.state.ordering_cache.remove(&datatype) {
            Some(prior) => {
                self.journal.push(Undo::OrderingCache(datatype, Some(prior)));
                true
            }
            None => false,
        }
    }

    pub fn set_ordering_cache(&mut self, datatype: DatatypeId, order: Vec<DatarecordId>) {
        let prior = self.state.ordering_cache.insert(datatype, order);
        self.journal.push(Undo::OrderingCache(datatype, prior));
    }

    /// Drop the cached top-level layout index. Datatype and layout writes do this themselves.
    pub fn invalidate_top_level_layouts(&mut self) {
        if let Some(prior) = self.state.top_level_layouts.take() {
            self.journal.push(Undo::TopLevelLayouts(Some(prior)));
        }
    }

    fn rollback(self) -> usize {
        let undone = self.journal.len();
        let state = self.state;
        for entry in self.journal.into_iter().rev() {
            match entry {
                Undo::Datatype(id, prior) => restore(&mut state.datatypes, id, prior),
                Undo::StructuralEdges(len) => state.structural_edges.truncate(len),
                Undo::LinkEdge(id, prior) => restore(&mut state.link_edges, id, prior),
                Undo::Layout(id, prior) => restore(&mut state.layouts, id, prior),
                Undo::LayoutNode(id, prior) => restore(&mut state.layout_nodes, id, prior),
                Undo::Datarecord(id, prior) => restore(&mut state.datarecords, id, prior),
                Undo::RecordLink(id, prior) => restore(&mut state.record_links, id, prior),
                Undo::OrderingCache(id, prior) => restore(&mut state.ordering_cache, id, prior),
                Undo::TopLevelLayouts(prior) => state.top_level_layouts = prior,
            }
        }
        undone
    }

    fn commit(self) -> u64 {
        if !self.journal.is_empty() {
            self.state.version += 1;
        }
        self.state.version
    }

    // ── Registry construction ───────────────────────────────

    /// Create a top-level datatype with an empty default layout.
    pub fn add_datatype(&mut self, name: &str, is_template: bool) -> DatatypeId {
        let id = DatatypeId(self.allocate_id());
        let mut datatype = Datatype::top_level(id, name);
        datatype.is_template = is_template;
        self.put_datatype(datatype);
        self.add_layout(id, true);
        id
    }

    /// Create a datatype structurally owned by `parent`.
    pub fn add_child_datatype(&mut self, parent: DatatypeId, name: &str) -> Result<DatatypeId> {
        let parent_row = self.state.datatype(parent)?.clone();
        let id = DatatypeId(self.allocate_id());
        let mut datatype = Datatype::top_level(id, name);
        datatype.grandparent = parent_row.grandparent;
        datatype.template_group = parent_row.template_group;
        datatype.is_template = parent_row.is_template;
        self.put_datatype(datatype);
        self.put_structural_edge(StructuralEdge {
            ancestor: parent,
            descendant: id,
            deleted: None,
        });
        Ok(id)
    }

    /// Create a layout for a top-level datatype. Its root slot renders the datatype itself.
    pub fn add_layout(&mut self, datatype: DatatypeId, is_default: bool) -> LayoutId {
        let id = LayoutId(self.allocate_id());
        let root = LayoutNodeId(self.allocate_id());
        self.put_layout_node(LayoutNode {
            id: root,
            layout: id,
            parent: None,
            region: datatype,
            content: SlotContent::Empty,
            source: None,
            deleted: None,
        });
        self.put_layout(Layout {
            id,
            datatype,
            is_default,
            root,
            sync_version: 0,
            deleted: None,
        });
        id
    }

    /// Add a slot under `parent` rendering `region`.
    pub fn add_slot(&mut self, parent: LayoutNodeId, region: DatatypeId, content: SlotContent) -> Result<LayoutNodeId> {
        let layout = self.state.slot(parent)?.layout;
        let id = LayoutNodeId(self.allocate_id());
        self.put_layout_node(LayoutNode {
            id,
            layout,
            parent: Some(parent),
            region,
            content,
            source: None,
            deleted: None,
        });
        Ok(id)
    }

    /// Create a top-level record of `datatype`.
    pub fn add_datarecord(&mut self, datatype: DatatypeId) -> Result<DatarecordId> {
        self.state.datatype(datatype)?;
        let id = DatarecordId(self.allocate_id());
        self.put_datarecord(Datarecord {
            id,
            datatype,
            grandparent: id,
            deleted: None,
        });
        Ok(id)
    }

    /// Create a record of a child datatype, owned by `parent`'s root record.
    pub fn add_child_datarecord(&mut self, parent: DatarecordId, datatype: DatatypeId) -> Result<DatarecordId> {
        let grandparent = self.state.datarecord(parent)?.grandparent;
        self.state.datatype(datatype)?;
        let id = DatarecordId(self.allocate_id());
        self.put_datarecord(Datarecord {
            id,
            datatype,
            grandparent,
            deleted: None,
        });
        Ok(id)
    }
}

/// Shared handle to the registry.
#[derive(Clone)]
pub struct RegistryStore {
    state: Arc<RwLock<RegistryState>>,
    config: Arc<RegistryConfig>,
}

impl RegistryStore {
    pub fn new(config: RegistryConfig) -> Self {
        Self::from_state(RegistryState::new(), config)
    }

    pub fn from_state(state: RegistryState, config: RegistryConfig) -> Self {
        RegistryStore {
            state: Arc::new(RwLock::new(state)),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// A consistent read view. Writers wait until it is dropped.
    pub async fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().await
    }

    /// Run `f` as one atomic transaction on behalf of `actor`.
    ///
    /// The write lock is held from the first read in `f` to the commit. If `f`
    /// returns an error every row it wrote is restored and the error returned.
    pub async fn write<T, F>(&self, actor: ActorId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut guard = self.state.write().await;
        let mut txn = Transaction::new(&mut guard, actor, &self.config);

        match f(&mut txn) {
            Ok(value) => {
                let writes = txn.writes();
                let version = txn.commit();
                tracing::debug!("Committed transaction for actor {:?}: {} writes, version {}", actor, writes, version);
                Ok(value)
            }
            Err(e) => {
                let undone = txn.rollback();
                if undone > 0 {
                    tracing::warn!("Rolled back {} writes after error: {}", undone, e);
                }
                Err(e)
            }
        }
    }

    /// Default layouts of every active top-level datatype, building the cached
    /// index if a write dropped it. The registry version does not change.
    pub async fn top_level_layouts(&self) -> Vec<LayoutId> {
        self.state.write().await.top_level_layouts().to_vec()
    }

    /// Copy of the whole state, for persistence.
    pub async fn export(&self) -> RegistryState {
        self.state.read().await.clone()
    }
}
