//! SQLite implementation of the bonus repository: entries plus the
//! retry-queue projection, with the guarded transitions the settlement
//! engines rely on.

use crate::domain::{
    BonusEntry, BonusId, BonusMetadata, BonusRetryRecord, BonusStatus, BonusType, Decimal,
    OrderId, RetryStatus, TimeMs, UserId,
};
use crate::store::{
    decode_json, encode_json, parse_field, BonusRepository, SqliteStore, StoreError,
};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

fn entry_from_row(row: &SqliteRow) -> Result<BonusEntry, StoreError> {
    let bonus_id: String = row.get("bonus_id");
    let user_id: String = row.get("user_id");
    let source_user_id: Option<String> = row.get("source_user_id");
    let bonus_type_raw: String = row.get("bonus_type");
    let order_id: String = row.get("order_id");
    let pv_amount: String = row.get("pv_amount");
    let bonus_amount: String = row.get("bonus_amount");
    let status_raw: String = row.get("status");
    let hold_until: Option<i64> = row.get("hold_until");
    let metadata: Option<String> = row.get("metadata");
    let confirmed_at: Option<i64> = row.get("confirmed_at");

    Ok(BonusEntry {
        bonus_id: BonusId::new(bonus_id),
        user_id: UserId::new(user_id),
        source_user_id: source_user_id.map(UserId::new),
        bonus_type: parse_field(&bonus_type_raw, "bonus_type")?,
        order_id: OrderId::new(order_id),
        level: row.get("level"),
        pv_amount: parse_field::<Decimal>(&pv_amount, "pv_amount")?,
        bonus_amount: parse_field::<Decimal>(&bonus_amount, "bonus_amount")?,
        status: parse_field(&status_raw, "bonus status")?,
        hold_until: hold_until.map(TimeMs::new),
        metadata: decode_json::<BonusMetadata>(metadata, "bonus metadata")?,
        created_at: TimeMs::new(row.get("created_at")),
        confirmed_at: confirmed_at.map(TimeMs::new),
    })
}

fn retry_from_row(row: &SqliteRow) -> Result<BonusRetryRecord, StoreError> {
    let bonus_id: String = row.get("bonus_id");
    let order_id: String = row.get("order_id");
    let bonus_type_raw: String = row.get("bonus_type");
    let status_raw: String = row.get("status");
    let retry_after: Option<i64> = row.get("retry_after");
    let retry_count: i64 = row.get("retry_count");
    let updated_at: Option<i64> = row.get("updated_at");

    Ok(BonusRetryRecord {
        queue_id: row.get("queue_id"),
        bonus_id: BonusId::new(bonus_id),
        order_id: OrderId::new(order_id),
        bonus_type: parse_field(&bonus_type_raw, "bonus_type")?,
        failure_reason: row.get("failure_reason"),
        retry_after: retry_after.map(TimeMs::new),
        retry_count: retry_count.max(0) as u32,
        status: parse_field(&status_raw, "retry status")?,
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: updated_at.map(TimeMs::new),
    })
}

const SELECT_ENTRY: &str = "SELECT bonus_id, user_id, source_user_id, bonus_type, order_id, \
     level, pv_amount, bonus_amount, status, hold_until, metadata, created_at, confirmed_at \
     FROM bonus_transactions";

const SELECT_RETRY: &str = "SELECT queue_id, bonus_id, order_id, bonus_type, failure_reason, \
     retry_after, retry_count, status, created_at, updated_at FROM bonus_retry_queue";

async fn insert_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entry: &BonusEntry,
) -> Result<(), StoreError> {
    let metadata = encode_json(&entry.metadata, "bonus metadata")?;
    sqlx::query(
        "INSERT INTO bonus_transactions \
         (bonus_id, user_id, source_user_id, bonus_type, order_id, level, pv_amount, \
          bonus_amount, status, hold_until, metadata, created_at, confirmed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.bonus_id.as_str())
    .bind(entry.user_id.as_str())
    .bind(entry.source_user_id.as_ref().map(|id| id.as_str()))
    .bind(entry.bonus_type.to_string())
    .bind(entry.order_id.as_str())
    .bind(entry.level)
    .bind(entry.pv_amount.to_canonical_string())
    .bind(entry.bonus_amount.to_canonical_string())
    .bind(entry.status.to_string())
    .bind(entry.hold_until.map(|t| t.as_i64()))
    .bind(metadata)
    .bind(entry.created_at.as_i64())
    .bind(entry.confirmed_at.map(|t| t.as_i64()))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl BonusRepository for SqliteStore {
    async fn record_bonus(&self, entry: &BonusEntry) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        insert_entry(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_batch(&self, entries: &[BonusEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool().begin().await?;
        for entry in entries {
            insert_entry(&mut tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_entry(&self, bonus_id: &BonusId) -> Result<Option<BonusEntry>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE bonus_id = ?", SELECT_ENTRY))
            .bind(bonus_id.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<BonusEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = ? ORDER BY created_at ASC, bonus_id ASC LIMIT ?",
            SELECT_ENTRY
        ))
        .bind(BonusStatus::Pending.to_string())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn list_by_order(&self, order_id: &OrderId) -> Result<Vec<BonusEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE order_id = ? ORDER BY created_at ASC, bonus_id ASC",
            SELECT_ENTRY
        ))
        .bind(order_id.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn mark_confirmed(
        &self,
        bonus_id: &BonusId,
        confirmed_at: TimeMs,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query(
            "UPDATE bonus_transactions \
             SET status = ?, confirmed_at = ?, hold_until = NULL \
             WHERE bonus_id = ? AND status IN (?, ?)",
        )
        .bind(BonusStatus::Confirmed.to_string())
        .bind(confirmed_at.as_i64())
        .bind(bonus_id.as_str())
        .bind(BonusStatus::Pending.to_string())
        .bind(BonusStatus::Retry.to_string())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Already terminal; nothing to write.
            return Ok(false);
        }

        sqlx::query(
            "UPDATE bonus_retry_queue \
             SET status = ?, updated_at = ? \
             WHERE queue_id = ? AND status IN (?, ?)",
        )
        .bind(RetryStatus::Completed.to_string())
        .bind(confirmed_at.as_i64())
        .bind(BonusRetryRecord::queue_id_for(bonus_id))
        .bind(RetryStatus::Pending.to_string())
        .bind(RetryStatus::Processing.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn schedule_retry(
        &self,
        bonus_id: &BonusId,
        order_id: &OrderId,
        bonus_type: BonusType,
        metadata: &BonusMetadata,
        retry_after: TimeMs,
        now: TimeMs,
    ) -> Result<(), StoreError> {
        let payload = encode_json(metadata, "bonus metadata")?;
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE bonus_transactions SET status = ?, metadata = ?, hold_until = ? \
             WHERE bonus_id = ?",
        )
        .bind(BonusStatus::Retry.to_string())
        .bind(&payload)
        .bind(retry_after.as_i64())
        .bind(bonus_id.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO bonus_retry_queue \
             (queue_id, bonus_id, order_id, bonus_type, failure_reason, retry_after, \
              retry_count, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(queue_id) DO UPDATE SET \
                 failure_reason = excluded.failure_reason, \
                 retry_after = excluded.retry_after, \
                 retry_count = excluded.retry_count, \
                 status = excluded.status, \
                 updated_at = excluded.updated_at",
        )
        .bind(BonusRetryRecord::queue_id_for(bonus_id))
        .bind(bonus_id.as_str())
        .bind(order_id.as_str())
        .bind(bonus_type.to_string())
        .bind(metadata.last_error.as_deref())
        .bind(retry_after.as_i64())
        .bind(metadata.retry_count as i64)
        .bind(RetryStatus::Pending.to_string())
        .bind(now.as_i64())
        .bind(now.as_i64())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        bonus_id: &BonusId,
        metadata: &BonusMetadata,
        now: TimeMs,
    ) -> Result<(), StoreError> {
        let payload = encode_json(metadata, "bonus metadata")?;
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "UPDATE bonus_transactions SET status = ?, metadata = ?, hold_until = NULL \
             WHERE bonus_id = ?",
        )
        .bind(BonusStatus::Failed.to_string())
        .bind(&payload)
        .bind(bonus_id.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE bonus_retry_queue SET status = ?, failure_reason = ?, updated_at = ? \
             WHERE queue_id = ?",
        )
        .bind(RetryStatus::Failed.to_string())
        .bind(metadata.last_error.as_deref())
        .bind(now.as_i64())
        .bind(BonusRetryRecord::queue_id_for(bonus_id))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_retry_candidates(
        &self,
        now: TimeMs,
        limit: i64,
    ) -> Result<Vec<BonusRetryRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = ? AND (retry_after IS NULL OR retry_after <= ?) \
             ORDER BY retry_after ASC, queue_id ASC LIMIT ?",
            SELECT_RETRY
        ))
        .bind(RetryStatus::Pending.to_string())
        .bind(now.as_i64())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(retry_from_row).collect()
    }

    async fn get_retry_record(
        &self,
        queue_id: &str,
    ) -> Result<Option<BonusRetryRecord>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE queue_id = ?", SELECT_RETRY))
            .bind(queue_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(retry_from_row).transpose()
    }

    async fn mark_retry_started(&self, queue_id: &str, now: TimeMs) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bonus_retry_queue SET status = ?, updated_at = ? \
             WHERE queue_id = ? AND status = ?",
        )
        .bind(RetryStatus::Processing.to_string())
        .bind(now.as_i64())
        .bind(queue_id)
        .bind(RetryStatus::Pending.to_string())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_retry_completed(&self, queue_id: &str, now: TimeMs) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE bonus_retry_queue SET status = ?, updated_at = ? WHERE queue_id = ?",
        )
        .bind(RetryStatus::Completed.to_string())
        .bind(now.as_i64())
        .bind(queue_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn mark_retry_failed(
        &self,
        queue_id: &str,
        now: TimeMs,
        reason: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE bonus_retry_queue SET status = ?, failure_reason = ?, updated_at = ? \
             WHERE queue_id = ?",
        )
        .bind(RetryStatus::Failed.to_string())
        .bind(reason)
        .bind(now.as_i64())
        .bind(queue_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::init_db;
    use serde_json::Value;
    use tempfile::TempDir;

    async fn setup() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (SqliteStore::new(pool), temp_dir)
    }

    fn entry(bonus_id: &str, created_at: i64) -> BonusEntry {
        let mut metadata = BonusMetadata::default();
        metadata
            .extra
            .insert("tree_type".to_string(), Value::String("unilevel".into()));
        BonusEntry {
            bonus_id: BonusId::new(bonus_id),
            user_id: UserId::new("sponsor"),
            source_user_id: Some(UserId::new("buyer")),
            bonus_type: BonusType::Recommend,
            order_id: OrderId::new("o1"),
            level: 1,
            pv_amount: Decimal::from_str_canonical("100").unwrap(),
            bonus_amount: Decimal::from_str_canonical("30").unwrap(),
            status: BonusStatus::Pending,
            hold_until: None,
            metadata,
            created_at: TimeMs::new(created_at),
            confirmed_at: None,
        }
    }

    #[tokio::test]
    async fn test_record_and_fetch_entry() {
        let (store, _tmp) = setup().await;
        let e = entry("b1", 1_000);
        store.record_bonus(&e).await.unwrap();

        let fetched = store.get_entry(&BonusId::new("b1")).await.unwrap().unwrap();
        assert_eq!(fetched, e);
        assert!(store
            .get_entry(&BonusId::new("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_record_batch_is_all_or_nothing() {
        let (store, _tmp) = setup().await;

        // Second element reuses the first id; the whole batch must vanish.
        let err = store
            .record_batch(&[entry("dup", 1_000), entry("dup", 1_001)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlx(_)));
        assert!(store.get_entry(&BonusId::new("dup")).await.unwrap().is_none());

        store
            .record_batch(&[entry("b1", 1_000), entry("b2", 1_001)])
            .await
            .unwrap();
        assert_eq!(store.list_by_order(&OrderId::new("o1")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_pending_ordered_and_limited() {
        let (store, _tmp) = setup().await;
        store.record_bonus(&entry("late", 3_000)).await.unwrap();
        store.record_bonus(&entry("early", 1_000)).await.unwrap();
        store.record_bonus(&entry("mid", 2_000)).await.unwrap();

        let pending = store.list_pending(2).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].bonus_id, BonusId::new("early"));
        assert_eq!(pending[1].bonus_id, BonusId::new("mid"));
    }

    #[tokio::test]
    async fn test_mark_confirmed_is_guarded() {
        let (store, _tmp) = setup().await;
        store.record_bonus(&entry("b1", 1_000)).await.unwrap();
        let id = BonusId::new("b1");

        assert!(store.mark_confirmed(&id, TimeMs::new(5_000)).await.unwrap());
        let confirmed = store.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(confirmed.status, BonusStatus::Confirmed);
        assert_eq!(confirmed.confirmed_at, Some(TimeMs::new(5_000)));

        // A second confirm finds nothing settleable.
        assert!(!store.mark_confirmed(&id, TimeMs::new(6_000)).await.unwrap());
        let unchanged = store.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(unchanged.confirmed_at, Some(TimeMs::new(5_000)));

        // Confirmed entries leave the pending scan.
        assert!(store.list_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_retry_upserts_queue_row() {
        let (store, _tmp) = setup().await;
        store.record_bonus(&entry("b1", 1_000)).await.unwrap();
        let id = BonusId::new("b1");
        let order = OrderId::new("o1");

        let mut metadata = BonusMetadata::default();
        metadata.retry_count = 1;
        metadata.last_error = Some("wallet unavailable".to_string());
        metadata.retry_after = Some(TimeMs::new(10_000));
        store
            .schedule_retry(
                &id,
                &order,
                BonusType::Recommend,
                &metadata,
                TimeMs::new(10_000),
                TimeMs::new(2_000),
            )
            .await
            .unwrap();

        let updated = store.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(updated.status, BonusStatus::Retry);
        assert_eq!(updated.hold_until, Some(TimeMs::new(10_000)));
        assert_eq!(updated.metadata.retry_count, 1);

        let queue = store.get_retry_record("retry-b1").await.unwrap().unwrap();
        assert_eq!(queue.status, RetryStatus::Pending);
        assert_eq!(queue.retry_count, 1);
        assert_eq!(queue.retry_after, Some(TimeMs::new(10_000)));
        assert_eq!(queue.failure_reason.as_deref(), Some("wallet unavailable"));
        assert_eq!(queue.created_at, TimeMs::new(2_000));

        // Rescheduling rewrites the same row.
        metadata.retry_count = 2;
        store
            .schedule_retry(
                &id,
                &order,
                BonusType::Recommend,
                &metadata,
                TimeMs::new(40_000),
                TimeMs::new(12_000),
            )
            .await
            .unwrap();
        let queue = store.get_retry_record("retry-b1").await.unwrap().unwrap();
        assert_eq!(queue.retry_count, 2);
        assert_eq!(queue.retry_after, Some(TimeMs::new(40_000)));
        assert_eq!(queue.created_at, TimeMs::new(2_000));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bonus_retry_queue")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_retry_candidates_due_filter_and_claim() {
        let (store, _tmp) = setup().await;
        store.record_bonus(&entry("due", 1_000)).await.unwrap();
        store.record_bonus(&entry("future", 1_000)).await.unwrap();

        let mut metadata = BonusMetadata::default();
        metadata.retry_count = 1;
        let order = OrderId::new("o1");
        store
            .schedule_retry(
                &BonusId::new("due"),
                &order,
                BonusType::Recommend,
                &metadata,
                TimeMs::new(5_000),
                TimeMs::new(2_000),
            )
            .await
            .unwrap();
        store
            .schedule_retry(
                &BonusId::new("future"),
                &order,
                BonusType::Recommend,
                &metadata,
                TimeMs::new(99_000),
                TimeMs::new(2_000),
            )
            .await
            .unwrap();

        let due = store
            .list_retry_candidates(TimeMs::new(6_000), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].queue_id, "retry-due");

        // First claim wins, second loses.
        assert!(store
            .mark_retry_started("retry-due", TimeMs::new(6_000))
            .await
            .unwrap());
        assert!(!store
            .mark_retry_started("retry-due", TimeMs::new(6_001))
            .await
            .unwrap());

        // PROCESSING rows are no longer candidates.
        assert!(store
            .list_retry_candidates(TimeMs::new(6_000), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_mark_failed_closes_entry_and_queue() {
        let (store, _tmp) = setup().await;
        store.record_bonus(&entry("b1", 1_000)).await.unwrap();
        let id = BonusId::new("b1");
        let order = OrderId::new("o1");

        let mut metadata = BonusMetadata::default();
        metadata.retry_count = 5;
        metadata.last_error = Some("still down".to_string());
        store
            .schedule_retry(
                &id,
                &order,
                BonusType::Recommend,
                &metadata,
                TimeMs::new(10_000),
                TimeMs::new(2_000),
            )
            .await
            .unwrap();
        store
            .mark_failed(&id, &metadata, TimeMs::new(11_000))
            .await
            .unwrap();

        let failed = store.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(failed.status, BonusStatus::Failed);
        assert!(failed.hold_until.is_none());

        let queue = store.get_retry_record("retry-b1").await.unwrap().unwrap();
        assert_eq!(queue.status, RetryStatus::Failed);
        assert_eq!(queue.failure_reason.as_deref(), Some("still down"));

        // Terminal rows never come back as candidates.
        assert!(store
            .list_retry_candidates(TimeMs::new(99_999), 10)
            .await
            .unwrap()
            .is_empty());
        assert!(!store.mark_confirmed(&id, TimeMs::new(12_000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_confirmed_completes_queue_row() {
        let (store, _tmp) = setup().await;
        store.record_bonus(&entry("b1", 1_000)).await.unwrap();
        let id = BonusId::new("b1");
        let order = OrderId::new("o1");

        let mut metadata = BonusMetadata::default();
        metadata.retry_count = 1;
        store
            .schedule_retry(
                &id,
                &order,
                BonusType::Recommend,
                &metadata,
                TimeMs::new(5_000),
                TimeMs::new(2_000),
            )
            .await
            .unwrap();
        store
            .mark_retry_started("retry-b1", TimeMs::new(5_500))
            .await
            .unwrap();

        assert!(store.mark_confirmed(&id, TimeMs::new(6_000)).await.unwrap());

        let queue = store.get_retry_record("retry-b1").await.unwrap().unwrap();
        assert_eq!(queue.status, RetryStatus::Completed);
        let entry = store.get_entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, BonusStatus::Confirmed);
    }
}
