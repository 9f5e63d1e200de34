//! Organization tree management: roots, member placement, binary spillover.
//!
//! Placement is a read-scan-write cycle: the service picks a parent (for
//! binary trees, by breadth-first search from the sponsor), then asks the
//! store to persist the node, closure rows, slot claim, and spillover audit
//! in one transaction. Losing the slot claim to a concurrent placement
//! surfaces as [`StoreError::SlotOccupied`], after which the service rescans
//! the tree and tries again a bounded number of times.

use crate::domain::{
    NodeId, OrganizationNode, SlotPosition, SpilloverLog, TimeMs, TreeType, UserId,
};
use crate::store::{OrganizationRepository, StoreError};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// Slot-claim rescans before a binary placement gives up.
const MAX_PLACEMENT_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum OrganizationError {
    #[error("sponsor {user_id} has no node in the {tree_type} tree")]
    SponsorNotAssigned { tree_type: TreeType, user_id: UserId },

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("user {user_id} already has a node in the {tree_type} tree")]
    AlreadyPlaced { tree_type: TreeType, user_id: UserId },

    /// Every scan-then-claim attempt lost to a concurrent placement.
    #[error("binary placement for {user_id} lost {attempts} slot claims")]
    SlotContention { user_id: UserId, attempts: usize },

    /// The BFS ran out of candidates. Unreachable on a consistent tree;
    /// every filled slot leads to a child with two slots of its own.
    #[error("no open slot reachable from sponsor {sponsor_user_id}")]
    TreeExhausted { sponsor_user_id: UserId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Placement and lookup over the organization trees.
#[derive(Debug, Clone)]
pub struct OrganizationService {
    repo: Arc<dyn OrganizationRepository>,
}

impl OrganizationService {
    pub fn new(repo: Arc<dyn OrganizationRepository>) -> Self {
        OrganizationService { repo }
    }

    /// Create the depth-0 node of a tree.
    pub async fn create_root(
        &self,
        tree_type: TreeType,
        user_id: UserId,
    ) -> Result<OrganizationNode, OrganizationError> {
        let node = OrganizationNode::root(tree_type, user_id, TimeMs::now());
        match self.repo.create_node(&node, None).await {
            Ok(()) => Ok(node),
            Err(StoreError::DuplicateNode { tree_type, user_id }) => {
                Err(OrganizationError::AlreadyPlaced { tree_type, user_id })
            }
            Err(e) => Err(OrganizationError::Store(e)),
        }
    }

    /// Place a new member under their sponsor.
    ///
    /// Unilevel members attach directly to the sponsor node. Binary members
    /// take the first open slot found by breadth-first search from the
    /// sponsor, L before R per node; landing under anyone other than the
    /// sponsor writes a spillover audit record with the placement.
    pub async fn add_member(
        &self,
        tree_type: TreeType,
        user_id: UserId,
        sponsor_user_id: UserId,
    ) -> Result<OrganizationNode, OrganizationError> {
        let Some(sponsor_node) = self
            .repo
            .get_node_by_user(tree_type, &sponsor_user_id)
            .await?
        else {
            return Err(OrganizationError::SponsorNotAssigned {
                tree_type,
                user_id: sponsor_user_id,
            });
        };

        match tree_type {
            TreeType::Unilevel => self.attach_unilevel(user_id, &sponsor_node).await,
            TreeType::Binary => self.place_binary(user_id, &sponsor_node).await,
        }
    }

    pub async fn get_node(&self, node_id: &NodeId) -> Result<OrganizationNode, OrganizationError> {
        self.repo
            .get_node(node_id)
            .await?
            .ok_or_else(|| OrganizationError::NodeNotFound(node_id.clone()))
    }

    pub async fn get_node_by_user(
        &self,
        tree_type: TreeType,
        user_id: &UserId,
    ) -> Result<Option<OrganizationNode>, OrganizationError> {
        Ok(self.repo.get_node_by_user(tree_type, user_id).await?)
    }

    pub async fn is_descendant(
        &self,
        ancestor_id: &NodeId,
        descendant_id: &NodeId,
        tree_type: TreeType,
    ) -> Result<bool, OrganizationError> {
        Ok(self
            .repo
            .is_descendant(ancestor_id, descendant_id, tree_type)
            .await?)
    }

    pub async fn list_spillovers(
        &self,
        sponsor_user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<SpilloverLog>, OrganizationError> {
        Ok(self.repo.list_spillovers(sponsor_user_id, limit).await?)
    }

    /// Apply a rank/center classification produced by an external job.
    pub async fn update_classification(
        &self,
        node_id: &NodeId,
        rank: Option<&str>,
        center_id: Option<&str>,
    ) -> Result<(), OrganizationError> {
        if self.repo.get_node(node_id).await?.is_none() {
            return Err(OrganizationError::NodeNotFound(node_id.clone()));
        }
        Ok(self.repo.update_classification(node_id, rank, center_id).await?)
    }

    async fn attach_unilevel(
        &self,
        user_id: UserId,
        sponsor_node: &OrganizationNode,
    ) -> Result<OrganizationNode, OrganizationError> {
        let node = OrganizationNode::placed(
            TreeType::Unilevel,
            user_id,
            sponsor_node.user_id.clone(),
            sponsor_node,
            None,
            TimeMs::now(),
        );
        match self.repo.create_node(&node, None).await {
            Ok(()) => Ok(node),
            Err(StoreError::DuplicateNode { tree_type, user_id }) => {
                Err(OrganizationError::AlreadyPlaced { tree_type, user_id })
            }
            Err(e) => Err(OrganizationError::Store(e)),
        }
    }

    async fn place_binary(
        &self,
        user_id: UserId,
        sponsor_node: &OrganizationNode,
    ) -> Result<OrganizationNode, OrganizationError> {
        for attempt in 1..=MAX_PLACEMENT_ATTEMPTS {
            let (parent, position) = self.locate_open_slot(sponsor_node).await?;
            let now = TimeMs::now();
            let node = OrganizationNode::placed(
                TreeType::Binary,
                user_id.clone(),
                sponsor_node.user_id.clone(),
                &parent,
                Some(position),
                now,
            );
            let spillover = (parent.node_id != sponsor_node.node_id).then(|| {
                SpilloverLog::new(
                    TreeType::Binary,
                    sponsor_node.user_id.clone(),
                    user_id.clone(),
                    parent.node_id.clone(),
                    position,
                    now,
                )
            });

            match self.repo.create_node(&node, spillover.as_ref()).await {
                Ok(()) => {
                    if spillover.is_some() {
                        tracing::info!(
                            user_id = %node.user_id,
                            sponsor = %sponsor_node.user_id,
                            parent = %parent.node_id,
                            position = %position,
                            "binary spillover placement"
                        );
                    }
                    return Ok(node);
                }
                Err(StoreError::SlotOccupied { node_id, slot }) => {
                    tracing::debug!(
                        attempt,
                        node_id = %node_id,
                        slot = %slot,
                        "slot claim lost to concurrent placement, rescanning"
                    );
                }
                Err(StoreError::DuplicateNode { tree_type, user_id }) => {
                    return Err(OrganizationError::AlreadyPlaced { tree_type, user_id })
                }
                Err(e) => return Err(OrganizationError::Store(e)),
            }
        }
        Err(OrganizationError::SlotContention {
            user_id,
            attempts: MAX_PLACEMENT_ATTEMPTS,
        })
    }

    /// First node with an open child slot, breadth-first from `start`,
    /// L before R.
    async fn locate_open_slot(
        &self,
        start: &OrganizationNode,
    ) -> Result<(OrganizationNode, SlotPosition), OrganizationError> {
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(candidate) = queue.pop_front() {
            let children = self.repo.list_children(&candidate.node_id).await?;
            for slot in SlotPosition::ORDERED {
                if !children.iter().any(|child| child.position == Some(slot)) {
                    return Ok((candidate, slot));
                }
            }
            queue.extend(children);
        }
        Err(OrganizationError::TreeExhausted {
            sponsor_user_id: start.user_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SlotStatus;
    use crate::store::{init_db, SqliteStore};
    use tempfile::TempDir;

    async fn setup() -> (OrganizationService, SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let store = SqliteStore::new(pool);
        let service = OrganizationService::new(Arc::new(store.clone()));
        (service, store, temp_dir)
    }

    #[tokio::test]
    async fn create_root_rejects_second_node_for_user() {
        let (service, _store, _tmp) = setup().await;

        let root = service
            .create_root(TreeType::Unilevel, UserId::new("alice"))
            .await
            .unwrap();
        assert!(root.is_root());
        assert_eq!(root.path, format!("/{}", root.node_id));

        let err = service
            .create_root(TreeType::Unilevel, UserId::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrganizationError::AlreadyPlaced { .. }));
    }

    #[tokio::test]
    async fn unilevel_member_attaches_directly_to_sponsor() {
        let (service, _store, _tmp) = setup().await;

        let root = service
            .create_root(TreeType::Unilevel, UserId::new("root"))
            .await
            .unwrap();
        let member = service
            .add_member(
                TreeType::Unilevel,
                UserId::new("m1"),
                UserId::new("root"),
            )
            .await
            .unwrap();

        assert_eq!(member.parent_node_id, Some(root.node_id.clone()));
        assert_eq!(member.sponsor_user_id, Some(UserId::new("root")));
        assert_eq!(member.depth, 1);
        assert!(member.position.is_none());
    }

    #[tokio::test]
    async fn unknown_sponsor_is_rejected() {
        let (service, _store, _tmp) = setup().await;

        let err = service
            .add_member(
                TreeType::Unilevel,
                UserId::new("m1"),
                UserId::new("ghost"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrganizationError::SponsorNotAssigned { .. }));
    }

    #[tokio::test]
    async fn binary_fill_is_breadth_first_l_before_r() {
        let (service, _store, _tmp) = setup().await;

        let root = service
            .create_root(TreeType::Binary, UserId::new("root"))
            .await
            .unwrap();

        let mut placed = Vec::new();
        for name in ["b1", "b2", "b3", "b4", "b5", "b6", "b7"] {
            let node = service
                .add_member(TreeType::Binary, UserId::new(name), UserId::new("root"))
                .await
                .unwrap();
            placed.push(node);
        }

        // Level 1 fills the root's own slots.
        assert_eq!(placed[0].parent_node_id, Some(root.node_id.clone()));
        assert_eq!(placed[0].position, Some(SlotPosition::L));
        assert_eq!(placed[1].parent_node_id, Some(root.node_id.clone()));
        assert_eq!(placed[1].position, Some(SlotPosition::R));

        // Level 2 spills over left-to-right across level 1.
        assert_eq!(placed[2].parent_node_id, Some(placed[0].node_id.clone()));
        assert_eq!(placed[2].position, Some(SlotPosition::L));
        assert_eq!(placed[3].parent_node_id, Some(placed[0].node_id.clone()));
        assert_eq!(placed[3].position, Some(SlotPosition::R));
        assert_eq!(placed[4].parent_node_id, Some(placed[1].node_id.clone()));
        assert_eq!(placed[5].parent_node_id, Some(placed[1].node_id.clone()));

        // Level 3 starts under the leftmost level-2 node.
        assert_eq!(placed[6].parent_node_id, Some(placed[2].node_id.clone()));
        assert_eq!(placed[6].position, Some(SlotPosition::L));
        assert_eq!(placed[6].depth, 3);
    }

    #[tokio::test]
    async fn spillover_is_logged_for_non_sponsor_parents() {
        let (service, _store, _tmp) = setup().await;

        service
            .create_root(TreeType::Binary, UserId::new("root"))
            .await
            .unwrap();
        for name in ["b1", "b2", "b3"] {
            service
                .add_member(TreeType::Binary, UserId::new(name), UserId::new("root"))
                .await
                .unwrap();
        }

        // b1 and b2 landed on the sponsor itself; only b3 spilled over.
        let logs = service
            .list_spillovers(&UserId::new("root"), 10)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].assigned_user_id, UserId::new("b3"));
        assert_eq!(logs[0].sponsor_user_id, UserId::new("root"));
        assert_eq!(logs[0].position, SlotPosition::L);
    }

    #[tokio::test]
    async fn slots_track_claims() {
        let (service, store, _tmp) = setup().await;

        let root = service
            .create_root(TreeType::Binary, UserId::new("root"))
            .await
            .unwrap();
        let child = service
            .add_member(TreeType::Binary, UserId::new("b1"), UserId::new("root"))
            .await
            .unwrap();

        let root_slots = store.list_slots(&root.node_id).await.unwrap();
        assert_eq!(root_slots.len(), 2);
        assert_eq!(root_slots[0].slot, SlotPosition::L);
        assert_eq!(root_slots[0].status, SlotStatus::Filled);
        assert_eq!(root_slots[0].child_node_id, Some(child.node_id.clone()));
        assert_eq!(root_slots[1].status, SlotStatus::Open);

        // The new node starts with two open slots of its own.
        let child_slots = store.list_slots(&child.node_id).await.unwrap();
        assert_eq!(child_slots.len(), 2);
        assert!(child_slots.iter().all(|s| s.status == SlotStatus::Open));
    }

    #[tokio::test]
    async fn closure_answers_ancestry() {
        let (service, _store, _tmp) = setup().await;

        let root = service
            .create_root(TreeType::Binary, UserId::new("root"))
            .await
            .unwrap();
        let b1 = service
            .add_member(TreeType::Binary, UserId::new("b1"), UserId::new("root"))
            .await
            .unwrap();
        let b2 = service
            .add_member(TreeType::Binary, UserId::new("b2"), UserId::new("root"))
            .await
            .unwrap();

        assert!(service
            .is_descendant(&root.node_id, &b1.node_id, TreeType::Binary)
            .await
            .unwrap());
        assert!(service
            .is_descendant(&root.node_id, &root.node_id, TreeType::Binary)
            .await
            .unwrap());
        assert!(!service
            .is_descendant(&b1.node_id, &b2.node_id, TreeType::Binary)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn classification_requires_known_node() {
        let (service, _store, _tmp) = setup().await;

        let err = service
            .update_classification(&NodeId::new("missing"), Some("gold"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrganizationError::NodeNotFound(_)));

        let root = service
            .create_root(TreeType::Unilevel, UserId::new("root"))
            .await
            .unwrap();
        service
            .update_classification(&root.node_id, Some("gold"), Some("center-1"))
            .await
            .unwrap();

        let reloaded = service.get_node(&root.node_id).await.unwrap();
        assert_eq!(reloaded.rank.as_deref(), Some("gold"));
        assert_eq!(reloaded.center_id.as_deref(), Some("center-1"));
    }
}
