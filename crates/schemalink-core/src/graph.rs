//! Schema snapshot using petgraph::StableDiGraph over datatype ids

use crate::cycle::LinkedFrom;
use crate::model::*;
use crate::store::RegistryState;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// What kind of relationship a snapshot edge represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaEdge {
    /// Ownership: the descendant renders nested inside the ancestor.
    Structural,
    /// Non-owning cross reference.
    Link {
        id: LinkEdgeId,
        multiple_allowed: bool,
    },
}

/// Active datatypes with their structural and link edges, read at one point in time.
///
/// Only ever built from a [`RegistryState`] the caller holds a lock on, so every
/// answer it gives comes from the same moment.
pub struct SchemaSnapshot {
    inner: StableDiGraph<DatatypeId, SchemaEdge>,
    index: HashMap<DatatypeId, NodeIndex>,
}

impl std::fmt::Debug for SchemaSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaSnapshot")
            .field("node_count", &self.inner.node_count())
            .field("edge_count", &self.inner.edge_count())
            .finish()
    }
}

impl SchemaSnapshot {
    /// Build a snapshot of the active rows in `state`.
    pub fn capture(state: &RegistryState) -> Self {
        let mut inner = StableDiGraph::new();
        let mut index = HashMap::new();

        for datatype in state.datatypes.values().filter(|d| d.is_active()) {
            index.insert(datatype.id, inner.add_node(datatype.id));
        }

        for edge in state.structural_edges.iter().filter(|e| e.deleted.is_none()) {
            if let (Some(&a), Some(&d)) = (index.get(&edge.ancestor), index.get(&edge.descendant)) {
                inner.add_edge(a, d, SchemaEdge::Structural);
            }
        }

        for edge in state.link_edges.values().filter(|e| e.is_active()) {
            if let (Some(&a), Some(&d)) = (index.get(&edge.ancestor), index.get(&edge.descendant)) {
                inner.add_edge(
                    a,
                    d,
                    SchemaEdge::Link {
                        id: edge.id,
                        multiple_allowed: edge.multiple_allowed,
                    },
                );
            }
        }

        tracing::debug!(
            "Captured schema snapshot: {} datatypes, {} edges",
            inner.node_count(),
            inner.edge_count()
        );

        SchemaSnapshot { inner, index }
    }

    /// Is this datatype present and active in the snapshot?
    pub fn contains(&self, id: DatatypeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn datatype_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Structural ancestors of `id`, nearest first, ending at its structural root.
    pub fn ancestry_chain(&self, id: DatatypeId) -> Vec<DatatypeId> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = id;

        while let Some(parent) = self.structural_parent(current) {
            if !seen.insert(parent) {
                tracing::warn!("Structural loop detected above datatype {:?}", id);
                break;
            }
            chain.push(parent);
            current = parent;
        }

        chain
    }

    /// The top of `id`'s structural chain (itself if top-level).
    pub fn structural_root(&self, id: DatatypeId) -> DatatypeId {
        self.ancestry_chain(id).last().copied().unwrap_or(id)
    }

    pub fn is_top_level(&self, id: DatatypeId) -> bool {
        self.contains(id) && self.structural_parent(id).is_none()
    }

    /// Datatypes `id` links to.
    pub fn link_targets(&self, id: DatatypeId) -> Vec<DatatypeId> {
        self.links(id, Direction::Outgoing)
    }

    /// Datatypes that link to `id`.
    pub fn reverse_link_sources(&self, id: DatatypeId) -> Vec<DatatypeId> {
        self.links(id, Direction::Incoming)
    }

    /// The link edge `ancestor -> descendant`, if active.
    pub fn link_edge(&self, ancestor: DatatypeId, descendant: DatatypeId) -> Option<SchemaEdge> {
        let a = *self.index.get(&ancestor)?;
        let d = *self.index.get(&descendant)?;
        self.inner
            .edges_directed(a, Direction::Outgoing)
            .filter(|e| self.inner.edge_endpoints(e.id()) == Some((a, d)))
            .map(|e| *e.weight())
            .find(|w| matches!(w, SchemaEdge::Link { .. }))
    }

    /// Reverse adjacency of all link edges, for the cycle guard.
    pub fn linked_from(&self) -> LinkedFrom {
        let mut map = LinkedFrom::new();
        for idx in self.inner.edge_indices() {
            let Some(SchemaEdge::Link { .. }) = self.inner.edge_weight(idx) else {
                continue;
            };
            if let Some((source, target)) = self.inner.edge_endpoints(idx) {
                map.entry(self.inner[target])
                    .or_default()
                    .insert(self.inner[source]);
            }
        }
        map
    }

    /// Reverse adjacency with the link `ancestor -> descendant` treated as already removed.
    pub fn linked_from_without(&self, ancestor: DatatypeId, descendant: DatatypeId) -> LinkedFrom {
        let mut map = self.linked_from();
        if let Some(sources) = map.get_mut(&descendant) {
            sources.remove(&ancestor);
        }
        map
    }

    fn structural_parent(&self, id: DatatypeId) -> Option<DatatypeId> {
        let idx = *self.index.get(&id)?;
        self.inner
            .edges_directed(idx, Direction::Incoming)
            .find(|e| *e.weight() == SchemaEdge::Structural)
            .and_then(|e| self.inner.edge_endpoints(e.id()))
            .map(|(source, _)| self.inner[source])
    }

    fn links(&self, id: DatatypeId, direction: Direction) -> Vec<DatatypeId> {
        let Some(&idx) = self.index.get(&id) else {
            return Vec::new();
        };
        self.inner
            .edges_directed(idx, direction)
            .filter(|e| matches!(e.weight(), SchemaEdge::Link { .. }))
            .filter_map(|e| self.inner.edge_endpoints(e.id()))
            .map(|(source, target)| match direction {
                Direction::Outgoing => self.inner[target],
                Direction::Incoming => self.inner[source],
            })
            .collect()
    }
}
