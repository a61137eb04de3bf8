//! 告警分发
//!
//! Turns one finding into its three external side effects, in order:
//! persist the alert, notify, update the contract's coarse status. Each step
//! is bounded by a timeout and independently fallible; a failed step is
//! logged and never stops the following ones.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::anomaly_detection::{Finding, Severity};
use crate::blockchain::traits::{AlertStore, NotificationChannel};
use crate::core::domain::{Contract, ContractStatus};
use crate::core::errors::{GuardianError, Result};
use crate::monitoring::metrics::MonitorMetrics;
use crate::notification::AlertNotice;

/// Outcome of one dispatch: which side effects went through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub persisted: bool,
    pub notified: bool,
    pub status_updated: bool,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.persisted && self.notified && self.status_updated
    }
}

/// Coarse status implied by a finding's severity.
pub fn status_for(severity: Severity) -> ContractStatus {
    match severity {
        Severity::Danger => ContractStatus::Critical,
        Severity::Warning | Severity::Info => ContractStatus::Warning,
    }
}

/// 告警分发器
pub struct AlertDispatcher {
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn NotificationChannel>,
    metrics: Arc<MonitorMetrics>,
    step_timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn NotificationChannel>,
        metrics: Arc<MonitorMetrics>,
        step_timeout: Duration,
    ) -> Self {
        Self { store, notifier, metrics, step_timeout }
    }

    /// Run one side effect under the step timeout.
    async fn bounded<F>(&self, step: &'static str, contract: &Contract, fut: F) -> bool
    where
        F: Future<Output = Result<()>>,
    {
        let outcome = match tokio::time::timeout(self.step_timeout, fut).await {
            Ok(result) => result,
            Err(elapsed) => Err(GuardianError::from(elapsed)),
        };

        match outcome {
            Ok(()) => {
                debug!(contract = %contract.address, step, "dispatch step done");
                true
            }
            Err(err @ GuardianError::Timeout(_)) => {
                warn!(contract = %contract.address, step, "dispatch step timed out: {}", err);
                self.metrics.record_dispatch_failure();
                false
            }
            Err(err) => {
                error!(contract = %contract.address, step, "dispatch step failed: {}", err);
                self.metrics.record_dispatch_failure();
                false
            }
        }
    }

    /// Persist, notify and update status for one finding.
    pub async fn dispatch(
        &self,
        contract: &Contract,
        finding: &Finding,
        webhook_override: Option<String>,
    ) -> DispatchReport {
        let persisted = self
            .bounded(
                "persist",
                contract,
                self.store.persist_alert(
                    contract.id,
                    finding.rule_id,
                    &finding.title,
                    &finding.description,
                    finding.severity,
                ),
            )
            .await;

        let notice = AlertNotice::new(contract, finding.clone(), webhook_override);
        let notified = self.bounded("notify", contract, self.notifier.notify(&notice)).await;

        let status = status_for(finding.severity);
        let status_updated = self
            .bounded("status", contract, self.store.update_contract_status(contract.id, status))
            .await;

        let report = DispatchReport { persisted, notified, status_updated };
        if !report.is_complete() {
            warn!(contract = %contract.address, rule_id = finding.rule_id, ?report, "alert partially dispatched");
        }
        report
    }
}
