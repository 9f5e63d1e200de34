//! Retry sweep over the bonus retry queue.
//!
//! The sweeper drains queue rows whose `retry_after` has passed. Each row is
//! claimed with a guarded PENDING to PROCESSING transition first, so
//! concurrent sweepers never double-credit; a lost claim is skipped. Credit
//! failures re-arm the row with exponential backoff until the retry ceiling,
//! after which entry and row both fail terminally.

use crate::domain::{BonusEntry, BonusRetryRecord, TimeMs};
use crate::orchestration::SettlementError;
use crate::store::BonusRepository;
use crate::wallet::{CreditRequest, WalletCreditor};
use std::sync::Arc;

/// Sweep tunables.
#[derive(Debug, Clone)]
pub struct SweepPolicy {
    /// Queue rows drained per sweep.
    pub batch_size: i64,
    /// Backoff base: the delay before the second attempt.
    pub base_delay_ms: i64,
    /// Backoff multiplier per further attempt.
    pub backoff_factor: u32,
    /// Attempts before entry and queue row fail terminally.
    pub max_retries: u32,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        SweepPolicy {
            batch_size: 100,
            base_delay_ms: 900_000,
            backoff_factor: 2,
            max_retries: 5,
        }
    }
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due rows the sweep saw.
    pub processed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// Rows another worker claimed between the scan and our claim.
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Re-settles queued bonus entries with exponential backoff.
#[derive(Debug)]
pub struct RetrySweeper {
    bonuses: Arc<dyn BonusRepository>,
    creditor: Arc<dyn WalletCreditor>,
    policy: SweepPolicy,
}

impl RetrySweeper {
    pub fn new(
        bonuses: Arc<dyn BonusRepository>,
        creditor: Arc<dyn WalletCreditor>,
        policy: SweepPolicy,
    ) -> Self {
        RetrySweeper {
            bonuses,
            creditor,
            policy,
        }
    }

    /// Process every due queue row once.
    pub async fn sweep(&self) -> Result<SweepReport, SettlementError> {
        let now = TimeMs::now();
        let candidates = self
            .bonuses
            .list_retry_candidates(now, self.policy.batch_size)
            .await?;
        let mut report = SweepReport {
            processed: candidates.len(),
            ..SweepReport::default()
        };

        for candidate in &candidates {
            if !self
                .bonuses
                .mark_retry_started(&candidate.queue_id, TimeMs::now())
                .await?
            {
                report.skipped += 1;
                continue;
            }

            let Some(entry) = self.bonuses.get_entry(&candidate.bonus_id).await? else {
                // Queue row pointing at nothing is a data-integrity fault,
                // not a transient one.
                self.bonuses
                    .mark_retry_failed(&candidate.queue_id, TimeMs::now(), "bonus entry missing")
                    .await?;
                report.failed += 1;
                report
                    .errors
                    .push(format!("bonus entry {} missing", candidate.bonus_id));
                tracing::error!(
                    queue_id = %candidate.queue_id,
                    bonus_id = %candidate.bonus_id,
                    "retry queue row references a missing bonus entry"
                );
                continue;
            };

            match self.creditor.credit(&CreditRequest::for_bonus(&entry)).await {
                Ok(()) => {
                    let settled = self
                        .bonuses
                        .mark_confirmed(&entry.bonus_id, TimeMs::now())
                        .await?;
                    if !settled {
                        // Entry went terminal elsewhere; retire the claimed
                        // row so it never surfaces again.
                        self.bonuses
                            .mark_retry_completed(&candidate.queue_id, TimeMs::now())
                            .await?;
                    }
                    report.succeeded += 1;
                }
                Err(credit_err) => {
                    self.reschedule(&entry, candidate, &credit_err.to_string(), &mut report)
                        .await?;
                }
            }
        }

        if report.processed > 0 {
            tracing::info!(
                processed = report.processed,
                succeeded = report.succeeded,
                rescheduled = report.rescheduled,
                failed = report.failed,
                skipped = report.skipped,
                "retry sweep finished"
            );
        }
        Ok(report)
    }

    async fn reschedule(
        &self,
        entry: &BonusEntry,
        candidate: &BonusRetryRecord,
        reason: &str,
        report: &mut SweepReport,
    ) -> Result<(), SettlementError> {
        let now = TimeMs::now();
        // Closing runs and earlier sweeps may each have bumped a counter;
        // trust whichever got further.
        let next_count = candidate.retry_count.max(entry.metadata.retry_count) + 1;
        let mut metadata = entry.metadata.clone();
        metadata.retry_count = next_count;
        metadata.last_error = Some(reason.to_string());

        if next_count >= self.policy.max_retries {
            metadata.retry_after = None;
            self.bonuses
                .mark_failed(&entry.bonus_id, &metadata, now)
                .await?;
            report.failed += 1;
            report.errors.push(reason.to_string());
            tracing::warn!(
                bonus_id = %entry.bonus_id,
                retry_count = next_count,
                error = %reason,
                "bonus retry ceiling reached"
            );
            return Ok(());
        }

        let retry_after = now.plus_millis(self.delay_ms(next_count));
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
        report.rescheduled += 1;
        report.errors.push(reason.to_string());
        Ok(())
    }

    /// `base * factor^(retry_count - 1)`, saturating.
    fn delay_ms(&self, retry_count: u32) -> i64 {
        let exponent = retry_count.saturating_sub(1);
        i64::from(self.policy.backoff_factor)
            .saturating_pow(exponent)
            .saturating_mul(self.policy.base_delay_ms)
    }
}
