//! Mock wallet creditor for testing without a ledger.

use super::{CreditError, CreditRequest, WalletCreditor};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Mock creditor with scripted failures and a call log.
///
/// By default every credit succeeds. `with_failures(n)` makes the next `n`
/// calls fail before recovering; `always_failing()` never recovers.
#[derive(Debug, Default)]
pub struct MockWalletCreditor {
    failures_remaining: AtomicUsize,
    always_fail: AtomicBool,
    calls: Mutex<Vec<CreditRequest>>,
}

impl MockWalletCreditor {
    /// Create a mock creditor that accepts every credit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` credit calls, then succeed.
    pub fn with_failures(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every credit call.
    pub fn always_failing(self) -> Self {
        self.always_fail.store(true, Ordering::SeqCst);
        self
    }

    /// Every request received so far, in call order.
    pub fn calls(&self) -> Vec<CreditRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of credit calls received.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl WalletCreditor for MockWalletCreditor {
    async fn credit(&self, request: &CreditRequest) -> Result<(), CreditError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }

        if self.always_fail.load(Ordering::SeqCst) {
            return Err(CreditError::Unavailable("scripted failure".to_string()));
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(CreditError::Unavailable("scripted failure".to_string()));
        }

        Ok(())
    }
}
