//! SQLite implementation of the organization repository.

use crate::domain::{
    BinarySlot, NodeId, OrganizationNode, SlotPosition, SlotStatus, SpilloverLog, TimeMs, TreeType,
    UserId,
};
use crate::store::{parse_field, OrganizationRepository, SqliteStore, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;

fn node_from_row(row: &SqliteRow) -> Result<OrganizationNode, StoreError> {
    let tree_type_raw: String = row.get("tree_type");
    let position_raw: Option<String> = row.get("position");
    let position = match position_raw {
        Some(p) => Some(parse_field(&p, "position")?),
        None => None,
    };

    let parent_node_id: Option<String> = row.get("parent_node_id");
    let sponsor_user_id: Option<String> = row.get("sponsor_user_id");
    let node_id: String = row.get("node_id");
    let user_id: String = row.get("user_id");

    Ok(OrganizationNode {
        node_id: NodeId::new(node_id),
        user_id: UserId::new(user_id),
        tree_type: parse_field(&tree_type_raw, "tree_type")?,
        parent_node_id: parent_node_id.map(NodeId::new),
        sponsor_user_id: sponsor_user_id.map(UserId::new),
        position,
        depth: row.get("depth"),
        path: row.get("path"),
        rank: row.get("rank"),
        center_id: row.get("center_id"),
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
    })
}

fn slot_from_row(row: &SqliteRow) -> Result<BinarySlot, StoreError> {
    let node_id: String = row.get("node_id");
    let slot_raw: String = row.get("slot");
    let status_raw: String = row.get("status");
    let child_node_id: Option<String> = row.get("child_node_id");
    let last_assigned_at: Option<i64> = row.get("last_assigned_at");

    Ok(BinarySlot {
        node_id: NodeId::new(node_id),
        slot: parse_field(&slot_raw, "slot")?,
        status: parse_field(&status_raw, "status")?,
        child_node_id: child_node_id.map(NodeId::new),
        last_assigned_at: last_assigned_at.map(TimeMs::new),
    })
}

fn spillover_from_row(row: &SqliteRow) -> Result<SpilloverLog, StoreError> {
    let tree_type_raw: String = row.get("tree_type");
    let position_raw: String = row.get("position");
    let sponsor_user_id: String = row.get("sponsor_user_id");
    let assigned_user_id: String = row.get("assigned_user_id");
    let parent_node_id: String = row.get("parent_node_id");

    Ok(SpilloverLog {
        log_id: row.get("log_id"),
        tree_type: parse_field(&tree_type_raw, "tree_type")?,
        sponsor_user_id: UserId::new(sponsor_user_id),
        assigned_user_id: UserId::new(assigned_user_id),
        parent_node_id: NodeId::new(parent_node_id),
        position: parse_field(&position_raw, "position")?,
        created_at: TimeMs::new(row.get("created_at")),
    })
}

const SELECT_NODE: &str = "SELECT node_id, user_id, tree_type, parent_node_id, sponsor_user_id, \
     position, depth, path, rank, center_id, created_at, updated_at FROM organization_nodes";

#[async_trait]
impl OrganizationRepository for SqliteStore {
    async fn create_node(
        &self,
        node: &OrganizationNode,
        spillover: Option<&SpilloverLog>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO organization_nodes \
             (node_id, user_id, tree_type, parent_node_id, sponsor_user_id, position, depth, \
              path, rank, center_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(node.node_id.as_str())
        .bind(node.user_id.as_str())
        .bind(node.tree_type.to_string())
        .bind(node.parent_node_id.as_ref().map(|id| id.as_str()))
        .bind(node.sponsor_user_id.as_ref().map(|id| id.as_str()))
        .bind(node.position.map(|p| p.as_str()))
        .bind(node.depth)
        .bind(&node.path)
        .bind(node.rank.as_deref())
        .bind(node.center_id.as_deref())
        .bind(node.created_at.as_i64())
        .bind(node.updated_at.as_i64())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(StoreError::DuplicateNode {
                    tree_type: node.tree_type,
                    user_id: node.user_id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query(
            "INSERT INTO organization_closure (ancestor_id, descendant_id, tree_type, depth) \
             VALUES (?, ?, ?, 0)",
        )
        .bind(node.node_id.as_str())
        .bind(node.node_id.as_str())
        .bind(node.tree_type.to_string())
        .execute(&mut *tx)
        .await?;

        if let Some(parent_id) = &node.parent_node_id {
            // One row per ancestor of the parent, shifted one level down.
            sqlx::query(
                "INSERT INTO organization_closure (ancestor_id, descendant_id, tree_type, depth) \
                 SELECT ancestor_id, ?, tree_type, depth + 1 \
                 FROM organization_closure WHERE descendant_id = ? AND tree_type = ?",
            )
            .bind(node.node_id.as_str())
            .bind(parent_id.as_str())
            .bind(node.tree_type.to_string())
            .execute(&mut *tx)
            .await?;
        }

        if node.tree_type == TreeType::Binary {
            for slot in SlotPosition::ORDERED {
                sqlx::query(
                    "INSERT INTO binary_slots (node_id, slot, status) VALUES (?, ?, ?)",
                )
                .bind(node.node_id.as_str())
                .bind(slot.as_str())
                .bind(SlotStatus::Open.to_string())
                .execute(&mut *tx)
                .await?;
            }

            if let (Some(parent_id), Some(position)) = (&node.parent_node_id, node.position) {
                let claimed = sqlx::query(
                    "UPDATE binary_slots \
                     SET status = ?, child_node_id = ?, last_assigned_at = ? \
                     WHERE node_id = ? AND slot = ? AND status = ?",
                )
                .bind(SlotStatus::Filled.to_string())
                .bind(node.node_id.as_str())
                .bind(node.created_at.as_i64())
                .bind(parent_id.as_str())
                .bind(position.as_str())
                .bind(SlotStatus::Open.to_string())
                .execute(&mut *tx)
                .await?;

                // Losing the claim drops the transaction, rolling back the
                // node and closure rows above.
                if claimed.rows_affected() == 0 {
                    return Err(StoreError::SlotOccupied {
                        node_id: parent_id.clone(),
                        slot: position,
                    });
                }
            }
        }

        if let Some(log) = spillover {
            insert_spillover(&mut tx, log).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_node(&self, node_id: &NodeId) -> Result<Option<OrganizationNode>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE node_id = ?", SELECT_NODE))
            .bind(node_id.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn get_node_by_user(
        &self,
        tree_type: TreeType,
        user_id: &UserId,
    ) -> Result<Option<OrganizationNode>, StoreError> {
        let row = sqlx::query(&format!(
            "{} WHERE tree_type = ? AND user_id = ?",
            SELECT_NODE
        ))
        .bind(tree_type.to_string())
        .bind(user_id.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn list_children(&self, node_id: &NodeId) -> Result<Vec<OrganizationNode>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE parent_node_id = ? ORDER BY position ASC, created_at ASC",
            SELECT_NODE
        ))
        .bind(node_id.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn get_nodes_by_ids(
        &self,
        node_ids: &[NodeId],
    ) -> Result<Vec<OrganizationNode>, StoreError> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; node_ids.len()].join(", ");
        let sql = format!("{} WHERE node_id IN ({})", SELECT_NODE, placeholders);
        let mut query = sqlx::query(&sql);
        for id in node_ids {
            query = query.bind(id.as_str());
        }
        let rows = query.fetch_all(self.pool()).await?;

        let mut by_id: HashMap<String, OrganizationNode> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let node = node_from_row(row)?;
            by_id.insert(node.node_id.as_str().to_string(), node);
        }

        Ok(node_ids
            .iter()
            .filter_map(|id| by_id.remove(id.as_str()))
            .collect())
    }

    async fn log_spillover(&self, log: &SpilloverLog) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        insert_spillover(&mut tx, log).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_spillovers(
        &self,
        sponsor_user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<SpilloverLog>, StoreError> {
        let rows = sqlx::query(
            "SELECT log_id, tree_type, sponsor_user_id, assigned_user_id, parent_node_id, \
             position, created_at \
             FROM organization_spillover_logs \
             WHERE sponsor_user_id = ? \
             ORDER BY created_at DESC, log_id ASC LIMIT ?",
        )
        .bind(sponsor_user_id.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(spillover_from_row).collect()
    }

    async fn is_descendant(
        &self,
        ancestor_id: &NodeId,
        descendant_id: &NodeId,
        tree_type: TreeType,
    ) -> Result<bool, StoreError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM organization_closure \
             WHERE ancestor_id = ? AND descendant_id = ? AND tree_type = ?",
        )
        .bind(ancestor_id.as_str())
        .bind(descendant_id.as_str())
        .bind(tree_type.to_string())
        .fetch_one(self.pool())
        .await?;
        Ok(count.0 > 0)
    }

    async fn update_classification(
        &self,
        node_id: &NodeId,
        rank: Option<&str>,
        center_id: Option<&str>,
    ) -> Result<(), StoreError> {
        // None keeps the current value; classification jobs send partial updates.
        sqlx::query(
            "UPDATE organization_nodes \
             SET rank = COALESCE(?, rank), center_id = COALESCE(?, center_id), updated_at = ? \
             WHERE node_id = ?",
        )
        .bind(rank)
        .bind(center_id)
        .bind(TimeMs::now().as_i64())
        .bind(node_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn list_slots(&self, node_id: &NodeId) -> Result<Vec<BinarySlot>, StoreError> {
        let rows = sqlx::query(
            "SELECT node_id, slot, status, child_node_id, last_assigned_at \
             FROM binary_slots WHERE node_id = ? ORDER BY slot ASC",
        )
        .bind(node_id.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(slot_from_row).collect()
    }
}

async fn insert_spillover(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    log: &SpilloverLog,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO organization_spillover_logs \
         (log_id, tree_type, sponsor_user_id, assigned_user_id, parent_node_id, position, \
          created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&log.log_id)
    .bind(log.tree_type.to_string())
    .bind(log.sponsor_user_id.as_str())
    .bind(log.assigned_user_id.as_str())
    .bind(log.parent_node_id.as_str())
    .bind(log.position.as_str())
    .bind(log.created_at.as_i64())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
