//! SQLite implementation of the order and idempotency repositories.

use crate::domain::{
    Decimal, IdempotencyKey, IdempotencyStatus, OrderId, OrderMetadata, OrderRecord, TimeMs,
    UserId,
};
use crate::store::{
    decode_json, parse_field, IdempotencyRepository, OrderRepository, SqliteStore, StoreError,
};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

fn order_from_row(row: &SqliteRow) -> Result<OrderRecord, StoreError> {
    let order_id: String = row.get("order_id");
    let user_id: String = row.get("user_id");
    let total_amount: String = row.get("total_amount");
    let pv_amount: String = row.get("pv_amount");
    let metadata: Option<String> = row.get("metadata");

    Ok(OrderRecord {
        order_id: OrderId::new(order_id),
        user_id: UserId::new(user_id),
        total_amount: parse_field::<Decimal>(&total_amount, "total_amount")?,
        pv_amount: parse_field::<Decimal>(&pv_amount, "pv_amount")?,
        status: row.get("status"),
        channel: row.get("channel"),
        metadata: decode_json::<OrderMetadata>(metadata, "order metadata")?,
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
    })
}

fn idempotency_from_row(row: &SqliteRow) -> Result<IdempotencyKey, StoreError> {
    let status_raw: String = row.get("status");
    let expires_at: Option<i64> = row.get("expires_at");

    Ok(IdempotencyKey {
        key: row.get("key"),
        scope: row.get("scope"),
        payload_hash: row.get("payload_hash"),
        status: parse_field(&status_raw, "idempotency status")?,
        resource_id: row.get("resource_id"),
        created_at: TimeMs::new(row.get("created_at")),
        expires_at: expires_at.map(TimeMs::new),
    })
}

#[async_trait]
impl OrderRepository for SqliteStore {
    async fn upsert_order(&self, order: &OrderRecord) -> Result<OrderRecord, StoreError> {
        sqlx::query(
            "INSERT INTO commerce_orders \
             (order_id, user_id, total_amount, pv_amount, status, channel, metadata, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(order_id) DO UPDATE SET \
                 user_id = excluded.user_id, \
                 total_amount = excluded.total_amount, \
                 pv_amount = excluded.pv_amount, \
                 status = excluded.status, \
                 channel = excluded.channel, \
                 metadata = excluded.metadata, \
                 updated_at = excluded.updated_at",
        )
        .bind(order.order_id.as_str())
        .bind(order.user_id.as_str())
        .bind(order.total_amount.to_canonical_string())
        .bind(order.pv_amount.to_canonical_string())
        .bind(&order.status)
        .bind(&order.channel)
        .bind(order.metadata.canonical_value().to_string())
        .bind(order.created_at.as_i64())
        .bind(order.updated_at.as_i64())
        .execute(self.pool())
        .await?;

        let row = sqlx::query(
            "SELECT order_id, user_id, total_amount, pv_amount, status, channel, metadata, \
             created_at, updated_at \
             FROM commerce_orders WHERE order_id = ?",
        )
        .bind(order.order_id.as_str())
        .fetch_one(self.pool())
        .await?;
        order_from_row(&row)
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<Option<OrderRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT order_id, user_id, total_amount, pv_amount, status, channel, metadata, \
             created_at, updated_at \
             FROM commerce_orders WHERE order_id = ?",
        )
        .bind(order_id.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }
}

#[async_trait]
impl IdempotencyRepository for SqliteStore {
    async fn create(&self, record: &IdempotencyKey) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO idempotency_keys \
             (key, scope, payload_hash, status, resource_id, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(scope, key) DO NOTHING",
        )
        .bind(&record.key)
        .bind(&record.scope)
        .bind(&record.payload_hash)
        .bind(record.status.to_string())
        .bind(record.resource_id.as_deref())
        .bind(record.created_at.as_i64())
        .bind(record.expires_at.map(|t| t.as_i64()))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &str, scope: &str) -> Result<Option<IdempotencyKey>, StoreError> {
        let row = sqlx::query(
            "SELECT key, scope, payload_hash, status, resource_id, created_at, expires_at \
             FROM idempotency_keys WHERE key = ? AND scope = ?",
        )
        .bind(key)
        .bind(scope)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(idempotency_from_row).transpose()
    }

    async fn mark_status(
        &self,
        key: &str,
        scope: &str,
        status: IdempotencyStatus,
        resource_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE idempotency_keys \
             SET status = ?, resource_id = COALESCE(?, resource_id) \
             WHERE key = ? AND scope = ?",
        )
        .bind(status.to_string())
        .bind(resource_id)
        .bind(key)
        .bind(scope)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
