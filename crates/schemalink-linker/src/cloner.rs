//! Layout cloning: copies a linked datatype's layout into a slot

use schemalink_core::layout::collect_subtree;
use schemalink_core::{DatatypeId, LayoutId, LayoutNode, LayoutNodeId, Result, SlotContent, Transaction, ValidationError};
use std::collections::HashMap;

/// Produces an independently owned copy of a layout subtree inside a slot.
pub trait LayoutCloner: Send + Sync {
    /// Copy everything below `source`'s root into `target_slot` and mark the
    /// slot as holding `remote`. Returns the number of nodes created.
    fn clone_layout(
        &self,
        txn: &mut Transaction<'_>,
        source: LayoutId,
        remote: DatatypeId,
        target_slot: LayoutNodeId,
    ) -> Result<usize>;

    fn name(&self) -> &str;
}

/// Deep copy, node by node, preserving order and slot contents.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubtreeCloner;

impl LayoutCloner for SubtreeCloner {
    fn clone_layout(
        &self,
        txn: &mut Transaction<'_>,
        source: LayoutId,
        remote: DatatypeId,
        target_slot: LayoutNodeId,
    ) -> Result<usize> {
        let source_root = txn.state().layout(source)?.root;
        let mut slot = txn.state().slot(target_slot)?.clone();
        if slot.content != SlotContent::Empty {
            return Err(ValidationError::SlotNotEmpty(target_slot).into());
        }

        // Parents come before children, so every parent is mapped by the time it is needed.
        let originals: Vec<LayoutNode> = collect_subtree(txn.state(), source_root, txn.config().max_layout_depth)?
            .into_iter()
            .map(|id| txn.state().slot(id).cloned())
            .collect::<Result<_>>()?;

        let mut copies: HashMap<LayoutNodeId, LayoutNodeId> = HashMap::from([(source_root, target_slot)]);
        for original in &originals {
            let parent = original.parent.and_then(|p| copies.get(&p).copied()).unwrap_or(target_slot);
            let id = LayoutNodeId(txn.allocate_id());
            copies.insert(original.id, id);
            txn.put_layout_node(LayoutNode {
                id,
                layout: slot.layout,
                parent: Some(parent),
                region: original.region,
                content: original.content.clone(),
                source: Some(original.id),
                deleted: None,
            });
        }

        slot.content = SlotContent::Linked(remote);
        txn.put_layout_node(slot);

        tracing::debug!(
            "Cloned {} layout nodes of datatype {:?} into slot {:?}",
            originals.len(),
            remote,
            target_slot
        );
        Ok(originals.len())
    }

    fn name(&self) -> &str {
        "subtree"
    }
}
