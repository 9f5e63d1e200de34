//! Bonus entries and the retry-queue projection.

use crate::domain::{
    BonusId, BonusStatus, BonusType, Decimal, OrderId, RetryStatus, TimeMs, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Retry bookkeeping carried on a bonus entry, plus rule provenance in the
/// free-form `extra` map (tree, source/ancestor node ids, PV basis).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BonusMetadata {
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<TimeMs>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One commission owed to one beneficiary for one order.
///
/// Created PENDING by the bonus engine; only the retry/closing engine moves
/// it afterward, and never deletes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusEntry {
    pub bonus_id: BonusId,
    /// Beneficiary.
    pub user_id: UserId,
    /// Purchasing participant the commission derives from.
    pub source_user_id: Option<UserId>,
    pub bonus_type: BonusType,
    pub order_id: OrderId,
    /// Ancestor distance for cascades; 0 for flat bonuses.
    pub level: i64,
    pub pv_amount: Decimal,
    pub bonus_amount: Decimal,
    pub status: BonusStatus,
    /// Mirrors the scheduled retry time while the entry sits in RETRY.
    pub hold_until: Option<TimeMs>,
    pub metadata: BonusMetadata,
    pub created_at: TimeMs,
    pub confirmed_at: Option<TimeMs>,
}

impl BonusEntry {
    /// A freshly computed, not yet settled entry.
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        user_id: UserId,
        source_user_id: Option<UserId>,
        bonus_type: BonusType,
        order_id: OrderId,
        level: i64,
        pv_amount: Decimal,
        bonus_amount: Decimal,
        metadata: BonusMetadata,
        created_at: TimeMs,
    ) -> Self {
        BonusEntry {
            bonus_id: BonusId::generate(),
            user_id,
            source_user_id,
            bonus_type,
            order_id,
            level,
            pv_amount,
            bonus_amount,
            status: BonusStatus::Pending,
            hold_until: None,
            metadata,
            created_at,
            confirmed_at: None,
        }
    }
}

/// Queue projection of one entry awaiting re-settlement. At most one row per
/// bonus entry, keyed `retry-{bonus_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusRetryRecord {
    pub queue_id: String,
    pub bonus_id: BonusId,
    pub order_id: OrderId,
    pub bonus_type: BonusType,
    pub failure_reason: Option<String>,
    pub retry_after: Option<TimeMs>,
    pub retry_count: u32,
    pub status: RetryStatus,
    pub created_at: TimeMs,
    pub updated_at: Option<TimeMs>,
}

impl BonusRetryRecord {
    /// The queue key for a bonus entry.
    pub fn queue_id_for(bonus_id: &BonusId) -> String {
        format!("retry-{}", bonus_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_entry_defaults() {
        let entry = BonusEntry::pending(
            UserId::new("sponsor"),
            Some(UserId::new("buyer")),
            BonusType::Recommend,
            OrderId::new("o1"),
            1,
            Decimal::from_str_canonical("100").unwrap(),
            Decimal::from_str_canonical("30").unwrap(),
            BonusMetadata::default(),
            TimeMs::new(1_000),
        );

        assert_eq!(entry.status, BonusStatus::Pending);
        assert!(entry.confirmed_at.is_none());
        assert!(entry.hold_until.is_none());
        assert_eq!(entry.metadata.retry_count, 0);
    }

    #[test]
    fn test_queue_id_convention() {
        let id = BonusId::new("b-42");
        assert_eq!(BonusRetryRecord::queue_id_for(&id), "retry-b-42");
    }

    #[test]
    fn test_metadata_json_roundtrip() {
        let mut metadata = BonusMetadata::default();
        metadata.retry_count = 3;
        metadata.last_error = Some("wallet unavailable".to_string());
        metadata.retry_after = Some(TimeMs::new(90_000));
        metadata
            .extra
            .insert("tree_type".to_string(), Value::String("unilevel".into()));

        let text = serde_json::to_string(&metadata).unwrap();
        let parsed: BonusMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn test_metadata_defaults_from_empty_json() {
        let parsed: BonusMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.retry_count, 0);
        assert!(parsed.last_error.is_none());
        assert!(parsed.retry_after.is_none());
        assert!(parsed.extra.is_empty());
    }
}
