//! 监控调度器
//!
//! One cycle fetches the watch list, then for every active contract fetches
//! its snapshot, runs the detector registry, dispatches each finding, feeds
//! the escalation tracker and pauses the contract when a freeze is due.
//! Contracts are processed sequentially; one failing or hanging contract never
//! stops the others. Between cycles the loop sleeps on a cancellable timer.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::anomaly_detection::{DetectionInput, DetectorRegistry, EscalationTracker, Finding};
use crate::blockchain::traits::{AlertStore, ContractSource, NotificationChannel};
use crate::core::config::{GuardianConfig, SchedulerConfig};
use crate::core::domain::{Contract, ContractId, ContractStatus};
use crate::core::errors::{GuardianError, Result};
use crate::monitoring::clock::{Clock, SystemClock};
use crate::monitoring::dispatch::{AlertDispatcher, DispatchReport};
use crate::monitoring::metrics::MonitorMetrics;

/// A finding together with the contract it was raised for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractFinding {
    pub contract_id: ContractId,
    pub contract_address: String,
    pub finding: Finding,
    pub dispatch: DispatchReport,
}

/// 单周期报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Contracts returned by the watch list
    pub contracts_seen: usize,
    /// Contracts whose snapshot was evaluated
    pub contracts_checked: usize,
    /// Inactive contracts and contracts without a snapshot
    pub contracts_skipped: usize,
    /// Contracts whose processing failed or timed out
    pub contracts_failed: usize,
    pub findings: Vec<ContractFinding>,
    /// Contracts paused this cycle
    pub freezes_requested: Vec<ContractId>,
}

/// One line of the status summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub nickname: String,
    pub address: String,
    pub status: ContractStatus,
    pub is_paused: bool,
}

/// 监控状态摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub running: bool,
    pub contracts: Vec<StatusEntry>,
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contracts.is_empty() {
            return f.write_str("No contracts are currently being monitored.");
        }
        write!(f, "🐦 Monitoring {} contracts:", self.contracts.len())?;
        for entry in &self.contracts {
            let short: String = entry.address.chars().take(10).collect();
            write!(f, "\n• {} ({}...): {}", entry.nickname, short, entry.status)?;
        }
        Ok(())
    }
}

enum ContractOutcome {
    Checked { findings: Vec<Finding>, dispatched: Vec<ContractFinding>, balance: f64 },
    NotFound,
}

struct RunHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// 监控调度器
pub struct MonitoringScheduler {
    config: SchedulerConfig,
    source: Arc<dyn ContractSource>,
    store: Arc<dyn AlertStore>,
    registry: DetectorRegistry,
    tracker: EscalationTracker,
    dispatcher: AlertDispatcher,
    clock: Arc<dyn Clock>,
    metrics: Arc<MonitorMetrics>,
    run: Mutex<Option<RunHandle>>,
}

impl MonitoringScheduler {
    /// 创建调度器
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        registry: DetectorRegistry,
        tracker: EscalationTracker,
        source: Arc<dyn ContractSource>,
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MonitorMetrics>,
    ) -> Self {
        let dispatcher = AlertDispatcher::new(
            store.clone(),
            notifier,
            metrics.clone(),
            Duration::from_secs(config.dispatch_timeout_secs),
        );
        Self {
            config,
            source,
            store,
            registry,
            tracker,
            dispatcher,
            clock,
            metrics,
            run: Mutex::new(None),
        }
    }

    /// Wire a scheduler from the full configuration, on the system clock.
    pub fn from_config(
        config: &GuardianConfig,
        source: Arc<dyn ContractSource>,
        store: Arc<dyn AlertStore>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Result<Self> {
        Ok(Self::new(
            config.scheduler.clone(),
            DetectorRegistry::with_thresholds(&config.detection),
            EscalationTracker::new(config.escalation.freeze_threshold, config.escalation.eviction_grace_cycles),
            source,
            store,
            notifier,
            Arc::new(SystemClock),
            Arc::new(MonitorMetrics::new()?),
        ))
    }

    pub fn tracker(&self) -> &EscalationTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run exactly one monitoring cycle.
    ///
    /// Fails only when the watch list cannot be fetched; per-contract failures
    /// are counted in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let list_timeout = Duration::from_secs(self.config.contract_timeout_secs);

        let contracts = match tokio::time::timeout(list_timeout, self.source.list_watched_contracts()).await {
            Ok(Ok(contracts)) => contracts,
            Ok(Err(err)) => {
                self.metrics.record_cycle_failure();
                error!("Failed to fetch watched contracts: {}", err);
                return Err(err);
            }
            Err(elapsed) => {
                self.metrics.record_cycle_failure();
                error!("Fetching watched contracts timed out");
                return Err(elapsed.into());
            }
        };

        let present: HashSet<&str> = contracts.iter().map(|c| c.address.as_str()).collect();
        let evicted = self.tracker.sweep(&present);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted escalation state of unwatched contracts");
        }

        let mut report = CycleReport { contracts_seen: contracts.len(), ..Default::default() };

        if contracts.is_empty() {
            info!("No contracts to monitor");
        } else {
            info!("Monitoring {} contracts...", contracts.len());
        }

        let contract_timeout = Duration::from_secs(self.config.contract_timeout_secs);
        for contract in &contracts {
            if !contract.is_active {
                debug!(contract = %contract.address, "skipping inactive contract");
                report.contracts_skipped += 1;
                continue;
            }

            match tokio::time::timeout(contract_timeout, self.check_contract(contract)).await {
                Ok(Ok(ContractOutcome::Checked { findings, dispatched, balance })) => {
                    report.contracts_checked += 1;
                    self.metrics.record_contract_checked();
                    report.findings.extend(dispatched);

                    // outside the contract timeout: a due freeze is never dropped mid-flight
                    let should_freeze = self.tracker.record(&contract.address, &findings, balance);
                    if should_freeze && self.freeze(contract).await {
                        report.freezes_requested.push(contract.id);
                    }
                }
                Ok(Ok(ContractOutcome::NotFound)) => {
                    warn!(contract = %contract.address, "no snapshot available, skipping");
                    report.contracts_skipped += 1;
                }
                Ok(Err(err)) => {
                    error!(contract = %contract.address, "Error checking contract: {}", err);
                    report.contracts_failed += 1;
                    self.metrics.record_contract_failure();
                }
                Err(_) => {
                    error!(
                        contract = %contract.address,
                        timeout_secs = self.config.contract_timeout_secs,
                        "contract check timed out"
                    );
                    report.contracts_failed += 1;
                    self.metrics.record_contract_failure();
                }
            }
        }

        let elapsed = started.elapsed();
        self.metrics.record_cycle(elapsed.as_secs_f64());
        info!(
            seen = report.contracts_seen,
            checked = report.contracts_checked,
            skipped = report.contracts_skipped,
            failed = report.contracts_failed,
            findings = report.findings.len(),
            freezes = report.freezes_requested.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "monitoring cycle complete"
        );

        Ok(report)
    }

    async fn check_contract(&self, contract: &Contract) -> Result<ContractOutcome> {
        info!(contract = %contract.address, "Checking rules for contract");

        let Some(snapshot) = self.source.fetch_snapshot(&contract.address).await? else {
            return Ok(ContractOutcome::NotFound);
        };

        let previous_balance = self.tracker.last_balance(&contract.address);
        let input = DetectionInput::new(&contract.address, self.clock.now(), previous_balance, &snapshot);

        let findings = panic::catch_unwind(AssertUnwindSafe(|| self.registry.evaluate_all(&input)))
            .map_err(|payload| GuardianError::Detector(panic_message(payload.as_ref())))?;

        let webhook_override = self.tracker.webhook_override(&contract.address);
        let mut dispatched = Vec::with_capacity(findings.len());
        for finding in &findings {
            warn!(
                contract = %contract.address,
                rule_id = finding.rule_id,
                severity = %finding.severity,
                "🚨 ALERT: {}",
                finding.title
            );
            self.metrics.record_finding(finding.severity);
            let dispatch = self.dispatcher.dispatch(contract, finding, webhook_override.clone()).await;
            dispatched.push(ContractFinding {
                contract_id: contract.id,
                contract_address: contract.address.clone(),
                finding: finding.clone(),
                dispatch,
            });
        }

        Ok(ContractOutcome::Checked { findings, dispatched, balance: snapshot.balance })
    }

    /// Pause a contract after sustained danger; returns whether a pause was issued.
    ///
    /// The streak restarts only when the contract ends up paused. A failed or
    /// timed out pause leaves the freeze pending for the next danger cycle.
    async fn freeze(&self, contract: &Contract) -> bool {
        if contract.is_paused {
            warn!(contract = %contract.address, "freeze due but contract is already paused");
            self.tracker.confirm_freeze(&contract.address);
            return false;
        }

        let step_timeout = Duration::from_secs(self.config.dispatch_timeout_secs);
        let outcome = match tokio::time::timeout(step_timeout, self.store.pause_contract(contract.id)).await {
            Ok(result) => result,
            Err(elapsed) => Err(elapsed.into()),
        };

        match outcome {
            Ok(()) => {
                warn!(
                    contract = %contract.address,
                    threshold = self.tracker.freeze_threshold(),
                    "🧊 contract paused after consecutive danger cycles"
                );
                self.tracker.confirm_freeze(&contract.address);
                self.metrics.record_freeze();
                true
            }
            Err(err) => {
                error!(
                    contract = %contract.address,
                    "Failed to pause contract, retrying on the next danger cycle: {}", err
                );
                false
            }
        }
    }

    /// Start the monitoring loop; `false` if it is already running.
    ///
    /// After `stop()` the previous loop may still be finishing its in-flight
    /// cycle; until that task has ended a new loop is refused, so at most one
    /// cycle ever touches the escalation state.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut run = self.run.lock();
        if let Some(handle) = run.as_ref() {
            if !handle.task.is_finished() {
                if handle.token.is_cancelled() {
                    warn!("Previous monitoring loop is still finishing its cycle");
                } else {
                    warn!("Monitoring is already running");
                }
                return false;
            }
        }

        let token = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let loop_token = token.clone();
        let task = tokio::spawn(async move { scheduler.run_loop(loop_token).await });

        *run = Some(RunHandle { token, task });
        true
    }

    async fn run_loop(&self, token: CancellationToken) {
        info!(interval_secs = self.config.interval_secs, "🐦 Canary Contract Guardian monitoring started");

        while !token.is_cancelled() {
            let pause_secs = match self.run_cycle().await {
                Ok(_) => self.config.interval_secs,
                Err(err) => {
                    error!(
                        retry_in_secs = self.config.recovery_interval_secs,
                        "Error in monitoring loop: {}", err
                    );
                    self.config.recovery_interval_secs
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(pause_secs)) => {}
            }
        }

        info!("Monitoring stopped");
    }

    /// Request the loop to stop; an in-flight cycle completes first.
    pub fn stop(&self) {
        if let Some(handle) = self.run.lock().as_ref() {
            handle.token.cancel();
        }
    }

    /// Stop and wait for the loop task to finish.
    pub async fn shutdown(&self) {
        let handle = self.run.lock().take();
        if let Some(handle) = handle {
            handle.token.cancel();
            if let Err(err) = handle.task.await {
                error!("Monitoring task ended abnormally: {}", err);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .map(|handle| !handle.token.is_cancelled() && !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Current watch list with each contract's last known status.
    pub async fn status_summary(&self) -> Result<StatusSummary> {
        let list_timeout = Duration::from_secs(self.config.contract_timeout_secs);
        let contracts = tokio::time::timeout(list_timeout, self.source.list_watched_contracts()).await??;
        Ok(StatusSummary {
            running: self.is_running(),
            contracts: contracts
                .into_iter()
                .map(|c| StatusEntry { nickname: c.nickname, address: c.address, status: c.status, is_paused: c.is_paused })
                .collect(),
        })
    }

    /// Resume a paused contract and clear its danger streak.
    pub async fn resume_contract(&self, contract_id: ContractId, address: &str) -> Result<()> {
        self.store.resume_contract(contract_id).await?;
        self.tracker.reset(address);
        info!(contract = %address, "contract resumed");
        Ok(())
    }

    /// Route notifications for `address` to a dedicated webhook.
    pub fn set_webhook_override(&self, address: &str, url: Option<String>) {
        match url {
            Some(url) => self.tracker.set_webhook_override(address, url),
            None => self.tracker.clear_webhook_override(address),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("detector panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("detector panicked: {}", message)
    } else {
        "detector panicked".to_string()
    }
}
