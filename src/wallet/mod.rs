//! Wallet-credit capability used to settle bonus entries.
//!
//! The ledger itself lives outside this system; settlement only needs a
//! single injected credit call and treats its failures as transient.

use crate::domain::{BonusEntry, Decimal, UserId};
use async_trait::async_trait;
use std::fmt;

pub mod dry_run;
pub mod mock;

pub use dry_run::DryRunCreditor;
pub use mock::MockWalletCreditor;

/// One credit instruction for the external wallet ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub metadata: serde_json::Value,
}

impl CreditRequest {
    /// The credit instruction settling one bonus entry.
    pub fn for_bonus(entry: &BonusEntry) -> Self {
        CreditRequest {
            user_id: entry.user_id.clone(),
            amount: entry.bonus_amount,
            metadata: serde_json::json!({
                "bonus_id": entry.bonus_id.as_str(),
                "order_id": entry.order_id.as_str(),
                "bonus_type": entry.bonus_type.to_string(),
                "level": entry.level,
            }),
        }
    }
}

/// External wallet-credit capability.
///
/// No contract is assumed about the ledger's internal retries; delivery from
/// this side is at-least-once and failures are retried on the settlement
/// schedule.
#[async_trait]
pub trait WalletCreditor: Send + Sync + fmt::Debug {
    /// Credit `request.amount` to `request.user_id`'s wallet.
    async fn credit(&self, request: &CreditRequest) -> Result<(), CreditError>;
}

/// Error type for wallet-credit operations.
#[derive(Debug, Clone)]
pub enum CreditError {
    /// Ledger unreachable or contended (e.g., timeout, connection refused)
    Unavailable(String),
    /// Ledger refused the credit outright
    Rejected { code: String, message: String },
    /// Other error
    Other(String),
}

impl fmt::Display for CreditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditError::Unavailable(msg) => write!(f, "Wallet unavailable: {}", msg),
            CreditError::Rejected { code, message } => {
                write!(f, "Credit rejected {}: {}", code, message)
            }
            CreditError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CreditError {}
