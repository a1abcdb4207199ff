//! Layout tree traversal

use crate::error::{Result, ValidationError};
use crate::model::*;
use crate::store::RegistryState;

/// Every active node below `root` (not including it), parents before children.
///
/// Uses an explicit stack. Fails once a node sits more than `max_depth`
/// levels below `root`.
pub fn collect_subtree(state: &RegistryState, root: LayoutNodeId, max_depth: usize) -> Result<Vec<LayoutNodeId>> {
    let mut found = Vec::new();
    let children_of = |node: LayoutNodeId| -> Vec<LayoutNodeId> { state.children(node).map(|c| c.id).collect() };
    // Pushed in reverse so the lowest id is popped first.
    let mut stack: Vec<(LayoutNodeId, usize)> = children_of(root).into_iter().rev().map(|c| (c, 1)).collect();

    while let Some((node, depth)) = stack.pop() {
        if depth > max_depth {
            return Err(ValidationError::LayoutTooDeep(root, max_depth).into());
        }
        found.push(node);
        stack.extend(children_of(node).into_iter().rev().map(|c| (c, depth + 1)));
    }

    Ok(found)
}

/// Slots in any layout that display the link `local -> remote`.
pub fn slots_showing_link(state: &RegistryState, local: DatatypeId, remote: DatatypeId) -> Vec<LayoutNodeId> {
    state
        .layout_nodes
        .values()
        .filter(|n| n.is_active() && n.region == local && n.content == SlotContent::Linked(remote))
        .map(|n| n.id)
        .collect()
}

/// The node in `target` that `slot` was (transitively) cloned from.
pub fn matching_slot(state: &RegistryState, slot: LayoutNodeId, target: LayoutId) -> Option<LayoutNodeId> {
    let mut current = state.layout_nodes.get(&slot)?;
    // Each hop moves to an older node, so the chain is at most as long as the table.
    for _ in 0..state.layout_nodes.len() {
        if current.layout == target {
            return current.is_active().then_some(current.id);
        }
        current = state.layout_nodes.get(&current.source?)?;
    }
    None
}

/// The top-level datatype whose viewing context a slot belongs to.
pub fn layout_root_of(state: &RegistryState, slot: &LayoutNode) -> Result<DatatypeId> {
    let layout = state.layout(slot.layout)?;
    Ok(state.datatype(layout.datatype)?.grandparent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::error::LinkError;
    use crate::store::RegistryStore;

    #[tokio::test]
    async fn test_subtree_is_preorder_and_bounded() {
        let store = RegistryStore::new(RegistryConfig::default());
        let (root, a, a1, b) = store
            .write(ActorId(1), |txn| {
                let dt = txn.add_datatype("Sample", false);
                let root = txn.state().default_layout(dt)?.root;
                let a = txn.add_slot(root, dt, SlotContent::Empty)?;
                let a1 = txn.add_slot(a, dt, SlotContent::Fields(vec![FieldId(1)]))?;
                let b = txn.add_slot(root, dt, SlotContent::Empty)?;
                Ok((root, a, a1, b))
            })
            .await
            .unwrap();

        let state = store.read().await;
        assert_eq!(collect_subtree(&state, root, 8).unwrap(), vec![a, a1, b]);
        assert_eq!(collect_subtree(&state, a1, 0).unwrap(), Vec::<LayoutNodeId>::new());
        assert_eq!(
            collect_subtree(&state, root, 1).unwrap_err(),
            LinkError::from(ValidationError::LayoutTooDeep(root, 1))
        );
    }
}
