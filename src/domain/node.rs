//! Organization tree records: nodes, closure rows, binary slots, spillover audit.

use crate::domain::{NodeId, SlotPosition, SlotStatus, TimeMs, TreeType, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A participant's position in one organization tree.
///
/// Exactly one node exists per (tree_type, user_id). `path` is the
/// slash-delimited id sequence from the root down to this node, so the
/// ancestor chain can be derived without store round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationNode {
    pub node_id: NodeId,
    pub user_id: UserId,
    pub tree_type: TreeType,
    pub parent_node_id: Option<NodeId>,
    /// Who referred this participant; differs from the tree parent under spillover.
    pub sponsor_user_id: Option<UserId>,
    pub position: Option<SlotPosition>,
    pub depth: i64,
    pub path: String,
    pub rank: Option<String>,
    pub center_id: Option<String>,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}

impl OrganizationNode {
    /// A depth-0 node with `path = "/" + node_id`.
    pub fn root(tree_type: TreeType, user_id: UserId, created_at: TimeMs) -> Self {
        let node_id = NodeId::generate();
        let path = format!("/{}", node_id);
        OrganizationNode {
            node_id,
            user_id,
            tree_type,
            parent_node_id: None,
            sponsor_user_id: None,
            position: None,
            depth: 0,
            path,
            rank: None,
            center_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// A node placed under `parent`, extending its path by one segment.
    pub fn placed(
        tree_type: TreeType,
        user_id: UserId,
        sponsor_user_id: UserId,
        parent: &OrganizationNode,
        position: Option<SlotPosition>,
        created_at: TimeMs,
    ) -> Self {
        let node_id = NodeId::generate();
        let path = format!("{}/{}", parent.path, node_id);
        OrganizationNode {
            node_id,
            user_id,
            tree_type,
            parent_node_id: Some(parent.node_id.clone()),
            sponsor_user_id: Some(sponsor_user_id),
            position,
            depth: parent.depth + 1,
            path,
            rank: None,
            center_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Ancestor ids derived from `path`, nearest ancestor first, self excluded.
    pub fn ancestor_ids(&self) -> Vec<NodeId> {
        let mut parts: Vec<&str> = self.path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.last().copied() == Some(self.node_id.as_str()) {
            parts.pop();
        }
        parts.into_iter().rev().map(NodeId::new).collect()
    }

    /// Returns true for depth-0 nodes.
    pub fn is_root(&self) -> bool {
        self.parent_node_id.is_none()
    }
}

/// One materialized ancestor/descendant pair. Every node carries a depth-0
/// self-row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureRow {
    pub ancestor_id: NodeId,
    pub descendant_id: NodeId,
    pub tree_type: TreeType,
    pub depth: i64,
}

/// Occupancy of one binary child slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySlot {
    pub node_id: NodeId,
    pub slot: SlotPosition,
    pub status: SlotStatus,
    pub child_node_id: Option<NodeId>,
    pub last_assigned_at: Option<TimeMs>,
}

/// Audit record written when a binary placement lands under a different
/// parent than the sponsor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpilloverLog {
    pub log_id: String,
    pub tree_type: TreeType,
    pub sponsor_user_id: UserId,
    pub assigned_user_id: UserId,
    pub parent_node_id: NodeId,
    pub position: SlotPosition,
    pub created_at: TimeMs,
}

impl SpilloverLog {
    pub fn new(
        tree_type: TreeType,
        sponsor_user_id: UserId,
        assigned_user_id: UserId,
        parent_node_id: NodeId,
        position: SlotPosition,
        created_at: TimeMs,
    ) -> Self {
        SpilloverLog {
            log_id: Uuid::new_v4().to_string(),
            tree_type,
            sponsor_user_id,
            assigned_user_id,
            parent_node_id,
            position,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (OrganizationNode, OrganizationNode, OrganizationNode) {
        let now = TimeMs::new(1_000);
        let root = OrganizationNode::root(TreeType::Unilevel, UserId::new("root"), now);
        let mid = OrganizationNode::placed(
            TreeType::Unilevel,
            UserId::new("mid"),
            UserId::new("root"),
            &root,
            None,
            now,
        );
        let leaf = OrganizationNode::placed(
            TreeType::Unilevel,
            UserId::new("leaf"),
            UserId::new("mid"),
            &mid,
            None,
            now,
        );
        (root, mid, leaf)
    }

    #[test]
    fn test_root_shape() {
        let (root, _, _) = chain();
        assert!(root.is_root());
        assert_eq!(root.depth, 0);
        assert_eq!(root.path, format!("/{}", root.node_id));
        assert!(root.ancestor_ids().is_empty());
    }

    #[test]
    fn test_placed_extends_path() {
        let (root, mid, leaf) = chain();
        assert_eq!(mid.depth, 1);
        assert_eq!(leaf.depth, 2);
        assert_eq!(mid.parent_node_id.as_ref(), Some(&root.node_id));
        assert_eq!(
            leaf.path,
            format!("/{}/{}/{}", root.node_id, mid.node_id, leaf.node_id)
        );
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let (root, mid, leaf) = chain();
        assert_eq!(
            leaf.ancestor_ids(),
            vec![mid.node_id.clone(), root.node_id.clone()]
        );
        assert_eq!(mid.ancestor_ids(), vec![root.node_id]);
    }
}
