//! 调度器端到端测试
//!
//! Deterministic in-memory backend plus a manual clock; no network.

use async_trait::async_trait;
use canary_guardian::anomaly_detection::{
    DetectionInput, DetectionThresholds, Detector, DetectorRegistry, EscalationTracker, Finding, Severity,
};
use canary_guardian::blockchain::{AlertStore, InMemoryBackend, NotificationChannel};
use canary_guardian::core::config::SchedulerConfig;
use canary_guardian::core::domain::{Contract, ContractId, ContractStatus, FunctionCall, Snapshot, Transaction};
use canary_guardian::core::errors::{GuardianError, Result};
use canary_guardian::monitoring::{ManualClock, MonitorMetrics, MonitoringScheduler};
use canary_guardian::notification::{AlertNotice, LogNotifier};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_700_000_000;

/// Records every notice; fails for one address.
#[derive(Default)]
struct RecordingNotifier {
    fail_for: Option<String>,
    notices: Mutex<Vec<AlertNotice>>,
}

impl RecordingNotifier {
    fn failing_for(address: &str) -> Self {
        Self { fail_for: Some(address.to_string()), ..Default::default() }
    }

    fn addresses(&self) -> Vec<String> {
        self.notices.lock().iter().map(|n| n.contract_address.clone()).collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingNotifier {
    async fn notify(&self, notice: &AlertNotice) -> Result<()> {
        self.notices.lock().push(notice.clone());
        if self.fail_for.as_deref() == Some(notice.contract_address.as_str()) {
            return Err(GuardianError::Notification("webhook returned 500".to_string()));
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

/// Panics when evaluating one specific contract.
struct PanicsFor(&'static str);

impl Detector for PanicsFor {
    fn rule_id(&self) -> u32 {
        42
    }

    fn name(&self) -> &str {
        "Panics"
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<Finding> {
        if input.contract_key == self.0 {
            panic!("index out of bounds");
        }
        None
    }
}

/// Delegates to the in-memory backend after sleeping on every call.
struct SlowStore {
    inner: Arc<InMemoryBackend>,
    step: Duration,
    pause: Duration,
}

#[async_trait]
impl AlertStore for SlowStore {
    async fn persist_alert(
        &self,
        contract_id: ContractId,
        rule_id: u32,
        title: &str,
        description: &str,
        severity: Severity,
    ) -> Result<()> {
        tokio::time::sleep(self.step).await;
        self.inner.persist_alert(contract_id, rule_id, title, description, severity).await
    }

    async fn update_contract_status(&self, contract_id: ContractId, status: ContractStatus) -> Result<()> {
        tokio::time::sleep(self.step).await;
        self.inner.update_contract_status(contract_id, status).await
    }

    async fn pause_contract(&self, contract_id: ContractId) -> Result<()> {
        tokio::time::sleep(self.pause).await;
        self.inner.pause_contract(contract_id).await
    }

    async fn resume_contract(&self, contract_id: ContractId) -> Result<()> {
        self.inner.resume_contract(contract_id).await
    }
}

struct SlowNotifier(Duration);

#[async_trait]
impl NotificationChannel for SlowNotifier {
    async fn notify(&self, _notice: &AlertNotice) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "slow"
    }
}

fn scheduler_with(
    backend: &Arc<InMemoryBackend>,
    notifier: Arc<dyn NotificationChannel>,
    registry: DetectorRegistry,
    config: SchedulerConfig,
) -> Arc<MonitoringScheduler> {
    Arc::new(MonitoringScheduler::new(
        config,
        registry,
        EscalationTracker::default(),
        backend.clone(),
        backend.clone(),
        notifier,
        Arc::new(ManualClock::new(NOW)),
        Arc::new(MonitorMetrics::new().unwrap()),
    ))
}

fn scheduler(backend: &Arc<InMemoryBackend>, notifier: Arc<dyn NotificationChannel>) -> Arc<MonitoringScheduler> {
    scheduler_with(
        backend,
        notifier,
        DetectorRegistry::with_thresholds(&DetectionThresholds::default()),
        SchedulerConfig::default(),
    )
}

fn busy_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::with_balance(500.0);
    snapshot.transactions = (0..11).map(|i| Transaction::new(NOW - 60 * i - 1, 5.0, "transfer")).collect();
    snapshot
}

fn reentrant_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::with_balance(100.0);
    snapshot.function_calls = (0..3).map(|i| FunctionCall::new(NOW - 30 + i * 10, "withdraw", "attacker")).collect();
    snapshot
}

#[tokio::test]
async fn sustained_balance_drop_pauses_once() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "vault", "Vault")]));
    let balances = [1000.0, 400.0, 160.0, 64.0, 25.6, 10.24, 4.096, 1.6384, 0.65536, 0.262144, 0.1048576];
    backend.queue_snapshots("vault", balances.iter().map(|b| Snapshot::with_balance(*b)).collect());
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    // first sighting only records the balance
    let report = scheduler.run_cycle().await.unwrap();
    assert!(report.findings.is_empty());

    let second = scheduler.run_cycle().await.unwrap();
    assert_eq!(second.findings.len(), 1);
    assert_eq!(second.findings[0].finding.rule_id, 1);
    assert_eq!(second.findings[0].finding.severity, Severity::Danger);
    assert!(second.findings[0].finding.description.contains("60.0%"));

    for _ in 0..3 {
        assert!(scheduler.run_cycle().await.unwrap().freezes_requested.is_empty());
    }
    let fifth_danger = scheduler.run_cycle().await.unwrap();
    assert_eq!(fifth_danger.freezes_requested, vec![ContractId(1)]);
    assert_eq!(backend.pauses(), vec![ContractId(1)]);
    assert!(backend.contract("vault").unwrap().is_paused);

    // the counter restarted and the contract is now paused
    for _ in 0..5 {
        scheduler.run_cycle().await.unwrap();
    }
    assert_eq!(backend.pauses().len(), 1);
    assert_eq!(scheduler.metrics().freezes.get(), 1.0);
}

#[tokio::test]
async fn high_volume_raises_warning_and_updates_status() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(7, "dex", "DEX Pool")]));
    let mut snapshot = busy_snapshot();
    snapshot.transactions.push(Transaction::new(NOW - 3700, 5.0, "transfer"));
    backend.set_snapshot("dex", snapshot);

    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = scheduler(&backend, notifier.clone());
    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.contracts_checked, 1);
    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0].finding;
    assert_eq!(finding.severity, Severity::Warning);
    assert_eq!(finding.description, "Detected 11 transactions in the last hour (limit: 10)");
    assert!(report.findings[0].dispatch.is_complete());

    let alerts = backend.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].contract_id, ContractId(7));
    assert_eq!(alerts[0].rule_id, 2);
    assert_eq!(backend.status_updates(), vec![(ContractId(7), ContractStatus::Warning)]);
    assert_eq!(notifier.addresses(), vec!["dex".to_string()]);
}

#[tokio::test]
async fn notification_failure_is_isolated() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![
        Contract::new(1, "a", "A"),
        Contract::new(2, "b", "B"),
        Contract::new(3, "c", "C"),
    ]));
    for address in ["a", "b", "c"] {
        backend.set_snapshot(address, busy_snapshot());
    }

    let notifier = Arc::new(RecordingNotifier::failing_for("b"));
    let scheduler = scheduler(&backend, notifier.clone());
    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.contracts_checked, 3);
    assert_eq!(report.contracts_failed, 0);
    assert_eq!(notifier.addresses(), vec!["a", "b", "c"]);

    let b = report.findings.iter().find(|f| f.contract_address == "b").unwrap();
    assert!(b.dispatch.persisted);
    assert!(!b.dispatch.notified);
    assert!(b.dispatch.status_updated);

    let c = report.findings.iter().find(|f| f.contract_address == "c").unwrap();
    assert!(c.dispatch.is_complete());

    assert_eq!(backend.alerts().len(), 3);
    assert_eq!(backend.status_updates().len(), 3);
    assert_eq!(scheduler.metrics().dispatch_failures.get(), 1.0);
}

#[tokio::test]
async fn store_failure_does_not_block_notification() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "a", "A")]));
    backend.set_snapshot("a", busy_snapshot());
    backend.fail_persist(true);

    let notifier = Arc::new(RecordingNotifier::default());
    let report = scheduler(&backend, notifier.clone()).run_cycle().await.unwrap();

    let dispatch = report.findings[0].dispatch;
    assert!(!dispatch.persisted);
    assert!(dispatch.notified);
    assert!(dispatch.status_updated);
    assert_eq!(notifier.addresses(), vec!["a"]);
}

#[tokio::test]
async fn snapshot_failure_only_affects_that_contract() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![
        Contract::new(1, "a", "A"),
        Contract::new(2, "b", "B"),
        Contract::new(3, "c", "C"),
    ]));
    for address in ["a", "b", "c"] {
        backend.set_snapshot(address, busy_snapshot());
    }
    backend.fail_snapshot("b", true);

    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));
    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.contracts_checked, 2);
    assert_eq!(report.contracts_failed, 1);
    let addresses: Vec<&str> = report.findings.iter().map(|f| f.contract_address.as_str()).collect();
    assert_eq!(addresses, vec!["a", "c"]);
    assert!(scheduler.tracker().state("b").is_none());
}

#[tokio::test]
async fn detector_panic_is_contained() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![
        Contract::new(1, "a", "A"),
        Contract::new(2, "boom", "Boom"),
    ]));
    backend.set_snapshot("a", Snapshot::with_balance(10.0));
    backend.set_snapshot("boom", Snapshot::with_balance(10.0));

    let mut registry = DetectorRegistry::with_thresholds(&DetectionThresholds::default());
    registry.register(Box::new(PanicsFor("boom"))).unwrap();
    let scheduler = scheduler_with(&backend, Arc::new(LogNotifier::new()), registry, SchedulerConfig::default());

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.contracts_checked, 1);
    assert_eq!(report.contracts_failed, 1);
    assert!(scheduler.tracker().state("a").is_some());
    assert!(scheduler.tracker().state("boom").is_none());
}

#[tokio::test(start_paused = true)]
async fn hanging_contract_times_out() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![
        Contract::new(1, "slow", "Slow"),
        Contract::new(2, "fast", "Fast"),
    ]));
    backend.set_snapshot("slow", busy_snapshot());
    backend.set_snapshot("fast", busy_snapshot());
    backend.delay_snapshot("slow", Duration::from_secs(3600));

    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));
    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.contracts_failed, 1);
    assert_eq!(report.contracts_checked, 1);
    assert_eq!(report.findings[0].contract_address, "fast");
    assert_eq!(scheduler.metrics().contract_failures.get(), 1.0);
}

#[tokio::test]
async fn inactive_and_unknown_contracts_are_skipped() {
    let mut retired = Contract::new(2, "retired", "Retired");
    retired.is_active = false;
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![
        Contract::new(1, "a", "A"),
        retired,
        Contract::new(3, "ghost", "Ghost"),
    ]));
    backend.set_snapshot("a", Snapshot::with_balance(1.0));
    backend.set_snapshot("retired", busy_snapshot());

    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));
    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.contracts_seen, 3);
    assert_eq!(report.contracts_checked, 1);
    assert_eq!(report.contracts_skipped, 2);
    assert!(backend.alerts().is_empty());
    assert!(scheduler.tracker().state("retired").is_none());
}

#[tokio::test]
async fn already_paused_contract_is_not_paused_again() {
    let mut paused = Contract::new(1, "p", "Paused");
    paused.is_paused = true;
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![paused]));
    backend.set_snapshot("p", reentrant_snapshot());

    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));
    for _ in 0..5 {
        let report = scheduler.run_cycle().await.unwrap();
        assert!(report.freezes_requested.is_empty());
    }
    assert!(backend.pauses().is_empty());
}

#[tokio::test]
async fn resume_clears_danger_streak() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "r", "R")]));
    backend.set_snapshot("r", reentrant_snapshot());
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    for _ in 0..4 {
        scheduler.run_cycle().await.unwrap();
    }
    scheduler.resume_contract(ContractId(1), "r").await.unwrap();
    assert_eq!(backend.resumes(), vec![ContractId(1)]);

    let report = scheduler.run_cycle().await.unwrap();
    assert!(report.freezes_requested.is_empty());
    assert_eq!(scheduler.tracker().state("r").unwrap().consecutive_danger_count, 1);
}

#[tokio::test]
async fn webhook_override_reaches_notifier() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "a", "A")]));
    backend.set_snapshot("a", busy_snapshot());
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = scheduler(&backend, notifier.clone());

    scheduler.set_webhook_override("a", Some("https://hooks.example/a".to_string()));
    scheduler.run_cycle().await.unwrap();

    let notices = notifier.notices.lock();
    assert_eq!(notices[0].webhook_override.as_deref(), Some("https://hooks.example/a"));
    assert_eq!(notices[0].contract_nickname, "A");
}

#[tokio::test]
async fn removed_contract_state_is_evicted() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "a", "A"), Contract::new(2, "b", "B")]));
    backend.set_snapshot("a", Snapshot::with_balance(1.0));
    backend.set_snapshot("b", Snapshot::with_balance(1.0));
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    scheduler.run_cycle().await.unwrap();
    assert_eq!(scheduler.tracker().len(), 2);

    backend.remove_contract("b");
    for _ in 0..3 {
        scheduler.run_cycle().await.unwrap();
    }
    assert_eq!(scheduler.tracker().len(), 1);
    assert!(scheduler.tracker().state("b").is_none());
}

#[tokio::test]
async fn list_failure_fails_the_cycle() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "a", "A")]));
    backend.fail_listing(true);
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    let err = scheduler.run_cycle().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(scheduler.metrics().cycle_failures.get(), 1.0);
}

#[tokio::test]
async fn status_summary_lists_contracts() {
    let mut dex = Contract::new(2, "ryjl3-tyaaa-aaaaa-aaaba-cai", "DEX Pool");
    dex.status = ContractStatus::Critical;
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![
        Contract::new(1, "rrkah-fqaaa-aaaaa-aaaaq-cai", "Treasury Vault"),
        dex,
    ]));
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    let summary = scheduler.status_summary().await.unwrap();
    assert!(!summary.running);
    assert_eq!(
        summary.to_string(),
        "🐦 Monitoring 2 contracts:\n• Treasury Vault (rrkah-fqaa...): healthy\n• DEX Pool (ryjl3-tyaa...): critical"
    );
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_sleep_between_cycles() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "a", "A")]));
    backend.set_snapshot("a", busy_snapshot());
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(scheduler.is_running());

    // let the first cycle finish; the loop then sleeps for the full interval
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.alerts().len(), 1);

    scheduler.stop();
    assert!(!scheduler.is_running());
    tokio::time::timeout(Duration::from_secs(1), scheduler.shutdown())
        .await
        .expect("shutdown must not wait out the interval");
    assert_eq!(backend.alerts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn list_failure_retries_after_recovery_interval() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "a", "A")]));
    backend.set_snapshot("a", busy_snapshot());
    backend.fail_listing(true);
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(scheduler.metrics().cycle_failures.get(), 1.0);
    assert!(backend.alerts().is_empty());

    backend.fail_listing(false);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(scheduler.metrics().cycles.get(), 1.0);
    assert_eq!(backend.alerts().len(), 1);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_dispatch_does_not_swallow_the_freeze() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "r", "R")]));
    backend.set_snapshot("r", reentrant_snapshot());
    let store = Arc::new(SlowStore {
        inner: backend.clone(),
        step: Duration::from_secs(9),
        pause: Duration::from_secs(5),
    });
    let scheduler = MonitoringScheduler::new(
        SchedulerConfig::default(),
        DetectorRegistry::with_thresholds(&DetectionThresholds::default()),
        EscalationTracker::default(),
        backend.clone(),
        store,
        Arc::new(SlowNotifier(Duration::from_secs(9))),
        Arc::new(ManualClock::new(NOW)),
        Arc::new(MonitorMetrics::new().unwrap()),
    );

    for cycle in 1..=5u32 {
        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.contracts_failed, 0, "cycle {}", cycle);
        assert_eq!(report.contracts_checked, 1, "cycle {}", cycle);
        assert!(report.findings[0].dispatch.is_complete());
        if cycle < 5 {
            assert!(report.freezes_requested.is_empty());
            assert_eq!(scheduler.tracker().state("r").unwrap().consecutive_danger_count, cycle);
        } else {
            assert_eq!(report.freezes_requested, vec![ContractId(1)]);
        }
    }

    assert_eq!(backend.pauses(), vec![ContractId(1)]);
    assert_eq!(scheduler.tracker().state("r").unwrap().consecutive_danger_count, 0);
}

#[tokio::test]
async fn failed_pause_is_retried_next_danger_cycle() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "r", "R")]));
    backend.set_snapshot("r", reentrant_snapshot());
    backend.fail_pauses(true);
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    for _ in 0..5 {
        assert!(scheduler.run_cycle().await.unwrap().freezes_requested.is_empty());
    }
    assert!(backend.pauses().is_empty());
    assert_eq!(scheduler.tracker().state("r").unwrap().consecutive_danger_count, 5);

    backend.fail_pauses(false);
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.freezes_requested, vec![ContractId(1)]);
    assert_eq!(backend.pauses(), vec![ContractId(1)]);
    assert_eq!(scheduler.tracker().state("r").unwrap().consecutive_danger_count, 0);
    assert_eq!(scheduler.metrics().freezes.get(), 1.0);
}

#[tokio::test]
async fn unparseable_snapshot_fields_keep_other_rules_running() {
    let fixture = r#"{
        "contracts": [ { "id": 1, "address": "vault", "nickname": "Vault" } ],
        "snapshots": {
            "vault": [
                { "balance": 1000.0 },
                {
                    "balance": "400",
                    "transactions": [ { "timestamp": 1699999990.5, "amount": "n/a", "type": null } ],
                    "functionCalls": [ { "timestamp": 1699999991.25, "functionName": "upgradeTo", "caller": null } ],
                    "priceSamples": [ { "timestamp": "soon", "price": 1.0 }, [1, 2] ]
                }
            ]
        }
    }"#;
    let backend = Arc::new(InMemoryBackend::from_fixture_str(fixture).unwrap());
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    assert!(scheduler.run_cycle().await.unwrap().findings.is_empty());

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.contracts_failed, 0);
    let rule_ids: Vec<u32> = report.findings.iter().map(|f| f.finding.rule_id).collect();
    assert_eq!(rule_ids, vec![1, 3]);
    assert!(report.findings[1].finding.description.contains("by unknown"));
    assert_eq!(scheduler.tracker().last_balance("vault"), Some(400.0));
}

#[tokio::test(start_paused = true)]
async fn restart_waits_for_the_in_flight_cycle() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "a", "A")]));
    backend.set_snapshot("a", busy_snapshot());
    backend.delay_snapshot("a", Duration::from_secs(20));
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    assert!(scheduler.start());
    tokio::time::sleep(Duration::from_secs(5)).await;

    // the first cycle is still waiting for its snapshot
    scheduler.stop();
    assert!(!scheduler.is_running());
    assert!(!scheduler.start());
    assert!(backend.alerts().is_empty());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(backend.alerts().len(), 1);
    assert_eq!(scheduler.metrics().cycles.get(), 1.0);

    assert!(scheduler.start());
    assert!(scheduler.is_running());
    scheduler.shutdown().await;
    assert_eq!(backend.alerts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn status_summary_is_bounded() {
    let backend = Arc::new(InMemoryBackend::with_contracts(vec![Contract::new(1, "a", "A")]));
    backend.delay_listing(Duration::from_secs(3600));
    let scheduler = scheduler(&backend, Arc::new(LogNotifier::new()));

    let err = scheduler.status_summary().await.unwrap_err();
    assert!(matches!(err, GuardianError::Timeout(_)));
}
