use async_trait::async_trait;

use crate::anomaly_detection::Severity;
use crate::core::domain::{Contract, ContractId, ContractStatus, Snapshot};
use crate::core::errors::Result;
use crate::notification::AlertNotice;

/// Source of watched contracts and their per-cycle activity snapshots.
///
/// Retry and backoff against the underlying ledger belong to the implementation;
/// callers see one attempt per call.
#[async_trait]
pub trait ContractSource: Send + Sync {
    /// Lists every contract currently under watch.
    async fn list_watched_contracts(&self) -> Result<Vec<Contract>>;

    /// Fetches the activity snapshot for `address`; `Ok(None)` when the backend does not know it.
    async fn fetch_snapshot(&self, address: &str) -> Result<Option<Snapshot>>;
}

/// Persistent side of an alert and the contract's coarse state.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Stores one alert record.
    async fn persist_alert(
        &self,
        contract_id: ContractId,
        rule_id: u32,
        title: &str,
        description: &str,
        severity: Severity,
    ) -> Result<()>;

    /// Updates the contract's coarse status.
    async fn update_contract_status(&self, contract_id: ContractId, status: ContractStatus) -> Result<()>;

    /// Halts further activity on the contract.
    async fn pause_contract(&self, contract_id: ContractId) -> Result<()>;

    /// Lifts a previous pause.
    async fn resume_contract(&self, contract_id: ContractId) -> Result<()>;
}

/// Outbound human-readable notification.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers one alert notice; the notice may carry a per-contract target override.
    async fn notify(&self, notice: &AlertNotice) -> Result<()>;

    /// Returns the channel name (e.g., "webhook", "log").
    fn channel_name(&self) -> &str;
}
