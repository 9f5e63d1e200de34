//! Batch closing of pending bonus entries.
//!
//! A closing run drains a batch of PENDING entries oldest-first, pushing
//! each through the wallet-credit capability. Credits that land confirm the
//! entry; credits that fail move it onto the retry queue with a fixed
//! first-tier delay, or to FAILED once the retry ceiling is hit. Each
//! entry's transition commits independently, so an abandoned run leaves no
//! partial state behind.

use crate::domain::{BonusEntry, TimeMs};
use crate::orchestration::SettlementError;
use crate::store::BonusRepository;
use crate::wallet::{CreditRequest, WalletCreditor};
use std::sync::Arc;
use uuid::Uuid;

/// Closing run tunables.
#[derive(Debug, Clone)]
pub struct ClosingPolicy {
    /// Entries drained per run.
    pub batch_size: i64,
    /// Fixed delay before the first re-settlement attempt.
    pub retry_delay_ms: i64,
    /// Attempts before an entry fails terminally.
    pub max_retries: u32,
}

impl Default for ClosingPolicy {
    fn default() -> Self {
        ClosingPolicy {
            batch_size: 500,
            retry_delay_ms: 600_000,
            max_retries: 5,
        }
    }
}

/// Counters for one closing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingReport {
    pub job_id: String,
    pub started_at: TimeMs,
    pub completed_at: TimeMs,
    pub total: usize,
    pub confirmed: usize,
    pub rescheduled: usize,
    pub failed: usize,
}

/// Confirms pending bonus entries against the wallet.
#[derive(Debug)]
pub struct ClosingEngine {
    bonuses: Arc<dyn BonusRepository>,
    creditor: Arc<dyn WalletCreditor>,
    policy: ClosingPolicy,
}

impl ClosingEngine {
    pub fn new(
        bonuses: Arc<dyn BonusRepository>,
        creditor: Arc<dyn WalletCreditor>,
        policy: ClosingPolicy,
    ) -> Self {
        ClosingEngine {
            bonuses,
            creditor,
            policy,
        }
    }

    /// Run one closing batch.
    pub async fn run(&self) -> Result<ClosingReport, SettlementError> {
        let job_id = format!("closing-{}", Uuid::new_v4());
        let started_at = TimeMs::now();

        let entries = self.bonuses.list_pending(self.policy.batch_size).await?;

        let mut confirmed = 0;
        let mut rescheduled = 0;
        let mut failed = 0;
        for entry in &entries {
            match self.creditor.credit(&CreditRequest::for_bonus(entry)).await {
                Ok(()) => {
                    let settled = self
                        .bonuses
                        .mark_confirmed(&entry.bonus_id, TimeMs::now())
                        .await?;
                    if settled {
                        confirmed += 1;
                    } else {
                        tracing::debug!(
                            bonus_id = %entry.bonus_id,
                            "entry reached a terminal state under a concurrent worker"
                        );
                    }
                }
                Err(credit_err) => {
                    if self.reschedule(entry, &credit_err.to_string()).await? {
                        rescheduled += 1;
                    } else {
                        failed += 1;
                    }
                }
            }
        }

        let completed_at = TimeMs::now();
        let report = ClosingReport {
            job_id,
            started_at,
            completed_at,
            total: entries.len(),
            confirmed,
            rescheduled,
            failed,
        };
        tracing::info!(
            job_id = %report.job_id,
            total = report.total,
            confirmed = report.confirmed,
            rescheduled = report.rescheduled,
            failed = report.failed,
            duration_ms = completed_at.as_i64() - started_at.as_i64(),
            "closing run finished"
        );
        Ok(report)
    }

    /// Move a failed entry to the retry queue, or to FAILED once the
    /// ceiling is hit. Returns true when rescheduled.
    async fn reschedule(&self, entry: &BonusEntry, reason: &str) -> Result<bool, SettlementError> {
        let now = TimeMs::now();
        let mut metadata = entry.metadata.clone();
        metadata.retry_count += 1;
        metadata.last_error = Some(reason.to_string());

        if metadata.retry_count >= self.policy.max_retries {
            metadata.retry_after = None;
            self.bonuses
                .mark_failed(&entry.bonus_id, &metadata, now)
                .await?;
            tracing::warn!(
                bonus_id = %entry.bonus_id,
                retry_count = metadata.retry_count,
                error = %reason,
                "bonus entry failed terminally"
            );
            return Ok(false);
        }

        let retry_after = now.plus_millis(self.policy.retry_delay_ms);
        metadata.retry_after = Some(retry_after);
        self.bonuses
            .schedule_retry(
                &entry.bonus_id,
                &entry.order_id,
                entry.bonus_type,
                &metadata,
                retry_after,
                now,
            )
            .await?;
        Ok(true)
    }
}
