//! Idempotency records gating order ingestion.

use crate::domain::{IdempotencyStatus, TimeMs};
use serde::{Deserialize, Serialize};

/// One (scope, key) gate row. Created PENDING by insert-if-absent at first
/// submission; SUCCEEDED carries the order id as `resource_id`, FAILED stays
/// eligible for a resumable retry with the same key and payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub key: String,
    pub scope: String,
    pub payload_hash: String,
    pub status: IdempotencyStatus,
    pub resource_id: Option<String>,
    pub created_at: TimeMs,
    pub expires_at: Option<TimeMs>,
}

impl IdempotencyKey {
    /// A fresh PENDING gate row for one submission attempt.
    pub fn pending(
        key: impl Into<String>,
        scope: impl Into<String>,
        payload_hash: impl Into<String>,
        created_at: TimeMs,
        expires_at: Option<TimeMs>,
    ) -> Self {
        IdempotencyKey {
            key: key.into(),
            scope: scope.into(),
            payload_hash: payload_hash.into(),
            status: IdempotencyStatus::Pending,
            resource_id: None,
            created_at,
            expires_at,
        }
    }
}
