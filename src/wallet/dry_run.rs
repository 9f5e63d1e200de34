//! Accept-all creditor for running the worker without a ledger.

use super::{CreditError, CreditRequest, WalletCreditor};
use async_trait::async_trait;

/// Accepts every credit and logs it at info.
///
/// The settlement worker wires this in when no ledger client is configured;
/// entry state advances exactly as it would against a real ledger, and the
/// log line is the delivery record.
#[derive(Debug, Default)]
pub struct DryRunCreditor;

impl DryRunCreditor {
    pub fn new() -> Self {
        DryRunCreditor
    }
}

#[async_trait]
impl WalletCreditor for DryRunCreditor {
    async fn credit(&self, request: &CreditRequest) -> Result<(), CreditError> {
        tracing::info!(
            user_id = %request.user_id,
            amount = %request.amount,
            metadata = %request.metadata,
            "dry-run wallet credit"
        );
        Ok(())
    }
}
