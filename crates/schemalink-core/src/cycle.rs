//! Cycle detection over the datatype link graph

use crate::model::DatatypeId;
use std::collections::{HashMap, HashSet};

/// Reverse adjacency of the link graph: for each datatype, the datatypes that link into it.
pub type LinkedFrom = HashMap<DatatypeId, HashSet<DatatypeId>>;

/// Would adding the link `local -> remote` close a loop of link edges?
pub fn would_create_cycle(linked_from: &LinkedFrom, local: DatatypeId, remote: DatatypeId) -> bool {
    find_cycle_path(linked_from, local, remote).is_some()
}

/// Like [`would_create_cycle`], but returns the existing link chain that the
/// candidate edge would close, as `[remote, .., local]`.
///
/// The walk starts at `local` and climbs the linked-from sets looking for
/// `remote`. Only a chain that ends at `local` counts, so a loop elsewhere in
/// the graph never blocks an unrelated link. Every datatype is expanded at
/// most once, so the walk terminates even if `linked_from` already contains a
/// cycle.
pub fn find_cycle_path(
    linked_from: &LinkedFrom,
    local: DatatypeId,
    remote: DatatypeId,
) -> Option<Vec<DatatypeId>> {
    if local == remote {
        return Some(vec![remote]);
    }

    let mut visited = HashSet::from([local]);
    // Datatype -> the datatype it links to on the way down to `local`.
    let mut links_to: HashMap<DatatypeId, DatatypeId> = HashMap::new();
    let mut stack = vec![local];

    while let Some(node) = stack.pop() {
        for &source in linked_from.get(&node).into_iter().flatten() {
            if !visited.insert(source) {
                continue;
            }
            links_to.insert(source, node);
            if source == remote {
                let mut path = vec![remote];
                let mut current = remote;
                while let Some(&next) = links_to.get(&current) {
                    path.push(next);
                    current = next;
                }
                return Some(path);
            }
            stack.push(source);
        }
    }

    None
}
