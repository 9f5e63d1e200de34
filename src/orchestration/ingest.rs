//! Idempotent order ingestion.
//!
//! One inbound submission runs a fixed state machine: claim the (scope, key)
//! gate with an atomic insert-if-absent, classify any existing claim by
//! payload hash and status, then upsert the order, run the bonus pipeline
//! under a short bounded retry, and mark the gate SUCCEEDED. Any failure
//! after the gate leaves it FAILED, which a later submission with the same
//! key and payload resumes.

use crate::domain::{
    BonusEntry, IdempotencyKey, IdempotencyStatus, OrderId, OrderRecord, OrderSubmission, TimeMs,
};
use crate::engine::BonusPipeline;
use crate::store::{IdempotencyRepository, OrderRepository, StoreError};
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const ORDER_STATUS_PAID: &str = "PAID";

#[derive(Debug, Error)]
pub enum IngestError {
    /// The idempotency key was reused with a different payload.
    #[error("idempotency key reused with a different payload")]
    Conflict,

    /// Another submission holds this key mid-flight; resubmit later.
    #[error("submission with this idempotency key is in progress")]
    InProgress,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a submission resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Created,
    Duplicate,
}

/// The recorded order plus whatever bonus entries this call produced.
/// Duplicate submissions return the stored order with no entries.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order: OrderRecord,
    pub bonuses: Vec<BonusEntry>,
    pub status: IngestStatus,
}

/// Ingestion tunables.
#[derive(Debug, Clone)]
pub struct IngestPolicy {
    /// Idempotency scope prefix; the full scope is `{prefix}:{user_id}`.
    pub scope_prefix: String,
    /// Gate row lifetime; expiry cleanup runs outside this service.
    pub idempotency_ttl_ms: i64,
    /// First pipeline retry delay.
    pub pipeline_retry_initial_ms: u64,
    /// Total time budget for pipeline retries.
    pub pipeline_retry_max_elapsed_ms: u64,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        IngestPolicy {
            scope_prefix: "aegmall".to_string(),
            idempotency_ttl_ms: 86_400_000,
            pipeline_retry_initial_ms: 1_000,
            pipeline_retry_max_elapsed_ms: 5_000,
        }
    }
}

/// Coordinates order persistence and bonus triggering behind the
/// idempotency gate.
#[derive(Debug)]
pub struct OrderIngestor {
    orders: Arc<dyn OrderRepository>,
    idempotency: Arc<dyn IdempotencyRepository>,
    pipeline: Arc<dyn BonusPipeline>,
    policy: IngestPolicy,
}

impl OrderIngestor {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        idempotency: Arc<dyn IdempotencyRepository>,
        pipeline: Arc<dyn BonusPipeline>,
        policy: IngestPolicy,
    ) -> Self {
        OrderIngestor {
            orders,
            idempotency,
            pipeline,
            policy,
        }
    }

    /// Ingest one submission.
    ///
    /// For a fixed (scope, key, payload) the order and its bonus fan-out are
    /// created at most once; identical resubmissions come back
    /// [`IngestStatus::Duplicate`], conflicting ones are rejected.
    pub async fn process_order(
        &self,
        submission: &OrderSubmission,
    ) -> Result<OrderOutcome, IngestError> {
        let now = TimeMs::now();
        let payload_hash = submission.payload_hash();
        let scope = format!("{}:{}", self.policy.scope_prefix, submission.user_id);

        let gate = IdempotencyKey::pending(
            submission.idempotency_key.clone(),
            scope.clone(),
            payload_hash.clone(),
            now,
            Some(now.plus_millis(self.policy.idempotency_ttl_ms)),
        );

        if !self.idempotency.create(&gate).await? {
            let Some(existing) = self
                .idempotency
                .get(&submission.idempotency_key, &scope)
                .await?
            else {
                return Err(IngestError::InProgress);
            };
            if existing.payload_hash != payload_hash {
                return Err(IngestError::Conflict);
            }
            if existing.status == IdempotencyStatus::Succeeded {
                if let Some(resource_id) = existing.resource_id.as_deref() {
                    let Some(order) = self.orders.get_order(&OrderId::new(resource_id)).await?
                    else {
                        return Err(IngestError::InProgress);
                    };
                    return Ok(OrderOutcome {
                        order,
                        bonuses: Vec::new(),
                        status: IngestStatus::Duplicate,
                    });
                }
            }
            // FAILED, or a stale claim with a matching payload: resume it.
            self.idempotency
                .mark_status(
                    &submission.idempotency_key,
                    &scope,
                    IdempotencyStatus::Pending,
                    None,
                )
                .await?;
        }

        match self.settle(submission, &scope, now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(mark_err) = self
                    .idempotency
                    .mark_status(
                        &submission.idempotency_key,
                        &scope,
                        IdempotencyStatus::Failed,
                        None,
                    )
                    .await
                {
                    tracing::warn!(
                        key = %submission.idempotency_key,
                        error = %mark_err,
                        "could not mark idempotency gate FAILED"
                    );
                }
                Err(e)
            }
        }
    }

    async fn settle(
        &self,
        submission: &OrderSubmission,
        scope: &str,
        now: TimeMs,
    ) -> Result<OrderOutcome, IngestError> {
        let order = self
            .orders
            .upsert_order(&OrderRecord {
                order_id: submission.order_id.clone(),
                user_id: submission.user_id.clone(),
                total_amount: submission.total_amount,
                pv_amount: submission.pv_amount,
                status: ORDER_STATUS_PAID.to_string(),
                channel: submission.channel.clone(),
                metadata: submission.metadata.clone(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        let bonuses = self.run_pipeline(submission).await;

        self.idempotency
            .mark_status(
                &submission.idempotency_key,
                scope,
                IdempotencyStatus::Succeeded,
                Some(order.order_id.as_str()),
            )
            .await?;

        Ok(OrderOutcome {
            order,
            bonuses,
            status: IngestStatus::Created,
        })
    }

    /// Run the bonus pipeline under a short retry budget. Exhaustion yields
    /// an empty entry set; order recording never blocks on settlement.
    async fn run_pipeline(&self, submission: &OrderSubmission) -> Vec<BonusEntry> {
        let event = submission.to_event();
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.policy.pipeline_retry_initial_ms),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_millis(
                self.policy.pipeline_retry_max_elapsed_ms,
            )),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.pipeline
                .process_order(&event)
                .await
                .map_err(backoff::Error::transient)
        })
        .await;

        match result {
            Ok(bonuses) => bonuses,
            Err(e) => {
                tracing::warn!(
                    order_id = %submission.order_id,
                    error = %e,
                    "bonus pipeline exhausted its retries, recording order without entries"
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decimal, OrderEvent, OrderMetadata, UserId};
    use crate::engine::BonusError;
    use crate::store::{init_db, SqliteStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Pipeline returning empty entry sets, scripted to fail first.
    #[derive(Debug, Default)]
    struct ScriptedPipeline {
        failures_remaining: AtomicUsize,
        calls: AtomicUsize,
        always_fail: bool,
    }

    impl ScriptedPipeline {
        fn with_failures(n: usize) -> Self {
            ScriptedPipeline {
                failures_remaining: AtomicUsize::new(n),
                ..Default::default()
            }
        }

        fn always_failing() -> Self {
            ScriptedPipeline {
                always_fail: true,
                ..Default::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BonusPipeline for ScriptedPipeline {
        async fn process_order(&self, _event: &OrderEvent) -> Result<Vec<BonusEntry>, BonusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if self.always_fail || remaining > 0 {
                if remaining > 0 {
                    self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                }
                return Err(BonusError::Store(StoreError::Sqlx(
                    sqlx::Error::PoolTimedOut,
                )));
            }
            Ok(Vec::new())
        }
    }

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

    fn test_policy() -> IngestPolicy {
        IngestPolicy {
            pipeline_retry_initial_ms: 5,
            pipeline_retry_max_elapsed_ms: 50,
            ..IngestPolicy::default()
        }
    }

    fn ingestor(store: &SqliteStore, pipeline: Arc<ScriptedPipeline>) -> OrderIngestor {
        OrderIngestor::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            pipeline,
            test_policy(),
        )
    }

    fn submission(key: &str, pv: &str) -> OrderSubmission {
        OrderSubmission {
            order_id: OrderId::new("o1"),
            user_id: UserId::new("member"),
            total_amount: Decimal::from_str_canonical("200").unwrap(),
            pv_amount: Decimal::from_str_canonical(pv).unwrap(),
            channel: "web".to_string(),
            metadata: OrderMetadata::default(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn first_submission_creates_order_and_marks_gate() {
        let (store, _tmp) = setup().await;
        let pipeline = Arc::new(ScriptedPipeline::default());
        let ingestor = ingestor(&store, pipeline.clone());

        let outcome = ingestor.process_order(&submission("k1", "100")).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Created);
        assert_eq!(outcome.order.status, "PAID");
        assert_eq!(pipeline.call_count(), 1);

        let gate = store.get("k1", "aegmall:member").await.unwrap().unwrap();
        assert_eq!(gate.status, IdempotencyStatus::Succeeded);
        assert_eq!(gate.resource_id.as_deref(), Some("o1"));
        assert!(gate.expires_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_submission_returns_stored_order_without_recompute() {
        let (store, _tmp) = setup().await;
        let pipeline = Arc::new(ScriptedPipeline::default());
        let ingestor = ingestor(&store, pipeline.clone());

        let first = ingestor.process_order(&submission("k1", "100")).await.unwrap();
        assert_eq!(first.status, IngestStatus::Created);

        let second = ingestor.process_order(&submission("k1", "100")).await.unwrap();
        assert_eq!(second.status, IngestStatus::Duplicate);
        assert_eq!(second.order.order_id, first.order.order_id);
        assert!(second.bonuses.is_empty());
        assert_eq!(pipeline.call_count(), 1);
    }

    #[tokio::test]
    async fn conflicting_payload_is_rejected() {
        let (store, _tmp) = setup().await;
        let ingestor = ingestor(&store, Arc::new(ScriptedPipeline::default()));

        ingestor.process_order(&submission("k1", "100")).await.unwrap();

        let err = ingestor
            .process_order(&submission("k1", "999"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Conflict));
    }

    #[tokio::test]
    async fn failed_gate_with_matching_payload_resumes() {
        let (store, _tmp) = setup().await;
        let pipeline = Arc::new(ScriptedPipeline::default());
        let ingestor = ingestor(&store, pipeline.clone());

        // A crashed earlier attempt left the gate FAILED.
        let submission = submission("k1", "100");
        let gate = IdempotencyKey::pending(
            "k1",
            "aegmall:member",
            submission.payload_hash(),
            TimeMs::new(1_000),
            None,
        );
        assert!(store.create(&gate).await.unwrap());
        store
            .mark_status("k1", "aegmall:member", IdempotencyStatus::Failed, None)
            .await
            .unwrap();

        let outcome = ingestor.process_order(&submission).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Created);
        assert_eq!(pipeline.call_count(), 1);

        let gate = store.get("k1", "aegmall:member").await.unwrap().unwrap();
        assert_eq!(gate.status, IdempotencyStatus::Succeeded);
    }

    #[tokio::test]
    async fn succeeded_gate_without_order_is_in_progress() {
        let (store, _tmp) = setup().await;
        let ingestor = ingestor(&store, Arc::new(ScriptedPipeline::default()));

        let submission = submission("k1", "100");
        let gate = IdempotencyKey::pending(
            "k1",
            "aegmall:member",
            submission.payload_hash(),
            TimeMs::new(1_000),
            None,
        );
        assert!(store.create(&gate).await.unwrap());
        store
            .mark_status(
                "k1",
                "aegmall:member",
                IdempotencyStatus::Succeeded,
                Some("o-unwritten"),
            )
            .await
            .unwrap();

        let err = ingestor.process_order(&submission).await.unwrap_err();
        assert!(matches!(err, IngestError::InProgress));
    }

    #[tokio::test]
    async fn pipeline_exhaustion_still_records_order() {
        let (store, _tmp) = setup().await;
        let pipeline = Arc::new(ScriptedPipeline::always_failing());
        let ingestor = ingestor(&store, pipeline.clone());

        let outcome = ingestor.process_order(&submission("k1", "100")).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Created);
        assert!(outcome.bonuses.is_empty());
        assert!(pipeline.call_count() >= 2);

        // Order recording is not rolled back by settlement failure.
        let order = store.get_order(&OrderId::new("o1")).await.unwrap();
        assert!(order.is_some());
        let gate = store.get("k1", "aegmall:member").await.unwrap().unwrap();
        assert_eq!(gate.status, IdempotencyStatus::Succeeded);
    }

    #[tokio::test]
    async fn transient_pipeline_failure_is_retried() {
        let (store, _tmp) = setup().await;
        let pipeline = Arc::new(ScriptedPipeline::with_failures(1));
        let ingestor = ingestor(&store, pipeline.clone());

        let outcome = ingestor.process_order(&submission("k1", "100")).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Created);
        assert_eq!(pipeline.call_count(), 2);
    }

    #[tokio::test]
    async fn scopes_isolate_users_with_same_key() {
        let (store, _tmp) = setup().await;
        let ingestor = ingestor(&store, Arc::new(ScriptedPipeline::default()));

        ingestor.process_order(&submission("k1", "100")).await.unwrap();

        let mut other_user = submission("k1", "100");
        other_user.user_id = UserId::new("other");
        other_user.order_id = OrderId::new("o2");
        let outcome = ingestor.process_order(&other_user).await.unwrap();
        assert_eq!(outcome.status, IngestStatus::Created);
    }
}
