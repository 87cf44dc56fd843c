use async_trait::async_trait;

use crate::models::{Result, TransactionPage};

/// Source of a wallet's transaction history, one page at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainDataGateway: Send + Sync {
    /// Fetch the page following `cursor` (the first page when `None`).
    ///
    /// Records must be complete: timestamp, sender, recipient (absent for
    /// contract creation), wei value and gas used. An empty history is an
    /// empty page, never an error. Transient failures are reported as
    /// `GatewayUnavailable`.
    async fn fetch_transactions(&self, address: &str, cursor: Option<String>) -> Result<TransactionPage>;
}
