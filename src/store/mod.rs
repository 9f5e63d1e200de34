//! Persistence layer: repository traits and the SQLite-backed store.
//!
//! Every consumer goes through the traits; `SqliteStore` implements all of
//! them over one pool. Decimals are stored as canonical strings, timestamps
//! as epoch milliseconds, metadata as JSON text.

pub mod bonus;
pub mod commerce;
pub mod migrations;
pub mod organization;

pub use migrations::init_db;

use crate::domain::{
    BinarySlot, BonusEntry, BonusId, BonusMetadata, BonusRetryRecord, BonusType, IdempotencyKey,
    IdempotencyStatus, NodeId, OrderId, OrderRecord, OrganizationNode, SlotPosition, SpilloverLog,
    TimeMs, TreeType, UserId,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;

/// Errors surfaced by the repository layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// A guarded slot claim lost to a concurrent placement.
    #[error("slot {slot} on node {node_id} is already filled")]
    SlotOccupied { node_id: NodeId, slot: SlotPosition },

    /// The (tree_type, user_id) uniqueness constraint fired.
    #[error("user {user_id} already has a node in the {tree_type} tree")]
    DuplicateNode { tree_type: TreeType, user_id: UserId },

    /// A stored value failed to parse back into its domain type.
    #[error("corrupt stored value: {0}")]
    Decode(String),
}

/// Store of tree nodes, ancestor closure, binary slots, and spillover audit.
#[async_trait]
pub trait OrganizationRepository: Send + Sync + std::fmt::Debug {
    /// Persist a placement atomically: node row, closure rows (self plus one
    /// per parent ancestor), binary slot rows plus the guarded parent-slot
    /// claim, and the spillover record when one applies. A lost slot claim
    /// rolls the whole placement back with `StoreError::SlotOccupied`.
    async fn create_node(
        &self,
        node: &OrganizationNode,
        spillover: Option<&SpilloverLog>,
    ) -> Result<(), StoreError>;

    async fn get_node(&self, node_id: &NodeId) -> Result<Option<OrganizationNode>, StoreError>;

    async fn get_node_by_user(
        &self,
        tree_type: TreeType,
        user_id: &UserId,
    ) -> Result<Option<OrganizationNode>, StoreError>;

    /// Direct children, binary ones ordered L before R.
    async fn list_children(&self, node_id: &NodeId) -> Result<Vec<OrganizationNode>, StoreError>;

    /// Fetch several nodes at once, returned in input order; unknown ids are
    /// silently absent.
    async fn get_nodes_by_ids(
        &self,
        node_ids: &[NodeId],
    ) -> Result<Vec<OrganizationNode>, StoreError>;

    async fn log_spillover(&self, log: &SpilloverLog) -> Result<(), StoreError>;

    async fn list_spillovers(
        &self,
        sponsor_user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<SpilloverLog>, StoreError>;

    /// Closure-table membership test; a node is its own descendant.
    async fn is_descendant(
        &self,
        ancestor_id: &NodeId,
        descendant_id: &NodeId,
        tree_type: TreeType,
    ) -> Result<bool, StoreError>;

    /// Classification write driven by external rank/center jobs.
    async fn update_classification(
        &self,
        node_id: &NodeId,
        rank: Option<&str>,
        center_id: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn list_slots(&self, node_id: &NodeId) -> Result<Vec<BinarySlot>, StoreError>;
}

/// Store of commerce orders.
#[async_trait]
pub trait OrderRepository: Send + Sync + std::fmt::Debug {
    /// Insert or overwrite by order id; returns the stored record.
    async fn upsert_order(&self, order: &OrderRecord) -> Result<OrderRecord, StoreError>;

    async fn get_order(&self, order_id: &OrderId) -> Result<Option<OrderRecord>, StoreError>;
}

/// Store of idempotency gate rows.
#[async_trait]
pub trait IdempotencyRepository: Send + Sync + std::fmt::Debug {
    /// Atomic insert-if-absent on (scope, key). Returns true when this call
    /// created the row, false when it already existed.
    async fn create(&self, record: &IdempotencyKey) -> Result<bool, StoreError>;

    async fn get(&self, key: &str, scope: &str) -> Result<Option<IdempotencyKey>, StoreError>;

    /// Move the row's status; `resource_id` overwrites only when Some.
    async fn mark_status(
        &self,
        key: &str,
        scope: &str,
        status: IdempotencyStatus,
        resource_id: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Store of bonus entries and their retry-queue projection.
#[async_trait]
pub trait BonusRepository: Send + Sync + std::fmt::Debug {
    async fn record_bonus(&self, entry: &BonusEntry) -> Result<(), StoreError>;

    /// Persist all of an order's entries in one transaction; a failure
    /// persists none of them.
    async fn record_batch(&self, entries: &[BonusEntry]) -> Result<(), StoreError>;

    async fn get_entry(&self, bonus_id: &BonusId) -> Result<Option<BonusEntry>, StoreError>;

    /// PENDING entries oldest first, for the closing run.
    async fn list_pending(&self, limit: i64) -> Result<Vec<BonusEntry>, StoreError>;

    async fn list_by_order(&self, order_id: &OrderId) -> Result<Vec<BonusEntry>, StoreError>;

    /// Guarded confirm: flips the entry to CONFIRMED and any live queue row
    /// to COMPLETED in one transaction. Returns false when the entry was no
    /// longer settleable (already CONFIRMED or FAILED), in which case
    /// nothing is written.
    async fn mark_confirmed(&self, bonus_id: &BonusId, confirmed_at: TimeMs)
        -> Result<bool, StoreError>;

    /// Move the entry to RETRY with updated bookkeeping and upsert its
    /// PENDING queue row, in one transaction.
    async fn schedule_retry(
        &self,
        bonus_id: &BonusId,
        order_id: &OrderId,
        bonus_type: BonusType,
        metadata: &BonusMetadata,
        retry_after: TimeMs,
        now: TimeMs,
    ) -> Result<(), StoreError>;

    /// Terminal failure: entry FAILED, queue row (if any) FAILED.
    async fn mark_failed(
        &self,
        bonus_id: &BonusId,
        metadata: &BonusMetadata,
        now: TimeMs,
    ) -> Result<(), StoreError>;

    /// Due queue rows: PENDING with `retry_after` absent or <= now, ordered
    /// by `retry_after`.
    async fn list_retry_candidates(
        &self,
        now: TimeMs,
        limit: i64,
    ) -> Result<Vec<BonusRetryRecord>, StoreError>;

    async fn get_retry_record(
        &self,
        queue_id: &str,
    ) -> Result<Option<BonusRetryRecord>, StoreError>;

    /// Guarded PENDING→PROCESSING claim. Returns false when another worker
    /// already holds the row.
    async fn mark_retry_started(&self, queue_id: &str, now: TimeMs) -> Result<bool, StoreError>;

    async fn mark_retry_completed(&self, queue_id: &str, now: TimeMs) -> Result<(), StoreError>;

    async fn mark_retry_failed(
        &self,
        queue_id: &str,
        now: TimeMs,
        reason: &str,
    ) -> Result<(), StoreError>;
}

/// SQLite implementation of every repository trait, sharing one pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStore { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Parse a stored string column back into a domain type.
pub(crate) fn parse_field<T>(value: &str, field: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Decode(format!("{}: {}", field, e)))
}

pub(crate) fn encode_json<T: Serialize>(value: &T, field: &str) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Decode(format!("{}: {}", field, e)))
}

/// Decode a JSON text column; a missing or empty column decodes as `{}`.
pub(crate) fn decode_json<T: DeserializeOwned>(
    value: Option<String>,
    field: &str,
) -> Result<T, StoreError> {
    let text = match value {
        Some(ref s) if !s.trim().is_empty() => s.as_str(),
        _ => "{}",
    };
    serde_json::from_str(text).map_err(|e| StoreError::Decode(format!("{}: {}", field, e)))
}
