//! Order-to-settlement orchestration.
//!
//! `ingest` gates order submissions behind idempotency keys and runs the
//! bonus pipeline; `closing` confirms PENDING entries on a schedule; `retry`
//! sweeps the retry queue with exponential backoff.

pub mod closing;
pub mod ingest;
pub mod retry;

pub use closing::{ClosingEngine, ClosingPolicy, ClosingReport};
pub use ingest::{IngestError, IngestPolicy, IngestStatus, OrderIngestor, OrderOutcome};
pub use retry::{RetrySweeper, SweepPolicy, SweepReport};

use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the settlement jobs (closing runs and retry sweeps).
///
/// Wallet-credit failures never appear here; those stay inside a run and
/// drive the per-entry retry bookkeeping instead.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
