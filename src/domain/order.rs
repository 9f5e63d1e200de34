//! Commerce order records and the inbound submission payload.

use crate::domain::{Decimal, OrderId, TimeMs, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Typed order metadata. Known settlement fields are explicit; anything else
/// the order source attaches rides in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_referrer_user_id: Option<UserId>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl OrderMetadata {
    /// Canonical JSON value form. Map keys come out sorted, so the same
    /// metadata always serializes to the same bytes; the idempotency payload
    /// hash and the stored column both use this.
    pub fn canonical_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(center) = &self.center_user_id {
            map.insert("center_user_id".to_string(), Value::String(center.0.clone()));
        }
        if let Some(referrer) = &self.center_referrer_user_id {
            map.insert(
                "center_referrer_user_id".to_string(),
                Value::String(referrer.0.clone()),
            );
        }
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// One inbound order submission, as delivered by the commerce channel.
///
/// `idempotency_key` is the caller-supplied token identifying "the same
/// logical request" across redeliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmission {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_amount: Decimal,
    pub pv_amount: Decimal,
    pub channel: String,
    #[serde(default)]
    pub metadata: OrderMetadata,
    pub idempotency_key: String,
}

impl OrderSubmission {
    /// SHA-256 over the canonical sorted-key serialization of the order's
    /// identity, amount, and metadata fields. Amounts hash in canonical
    /// decimal form, so "100" and "100.00" are the same payload.
    pub fn payload_hash(&self) -> String {
        let canonical = serde_json::json!({
            "order_id": self.order_id.as_str(),
            "user_id": self.user_id.as_str(),
            "total_amount": self.total_amount.to_canonical_string(),
            "pv_amount": self.pv_amount.to_canonical_string(),
            "channel": self.channel,
            "metadata": self.metadata.canonical_value(),
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// The commission-relevant projection handed to the bonus engine.
    pub fn to_event(&self) -> OrderEvent {
        OrderEvent {
            order_id: self.order_id.clone(),
            user_id: self.user_id.clone(),
            pv_amount: self.pv_amount,
            total_amount: self.total_amount,
            metadata: self.metadata.clone(),
        }
    }
}

/// The commission basis for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub pv_amount: Decimal,
    pub total_amount: Decimal,
    #[serde(default)]
    pub metadata: OrderMetadata,
}

/// A persisted commerce order. Upserted by order id; later writes overwrite
/// amounts and status (reconciliation reuses the same path as first write).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total_amount: Decimal,
    pub pv_amount: Decimal,
    pub status: String,
    pub channel: String,
    #[serde(default)]
    pub metadata: OrderMetadata,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}
