//! 内存backend
//!
//! Deterministic `ContractSource` + `AlertStore` for tests, offline checks and
//! demos. Every write is recorded so callers can assert on exactly what the
//! scheduler asked the backend to do. Failures can be injected per operation.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::anomaly_detection::Severity;
use crate::blockchain::traits::{AlertStore, ContractSource};
use crate::core::domain::{Contract, ContractId, ContractStatus, Snapshot};
use crate::core::errors::{GuardianError, Result};

/// 已保存的告警记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAlert {
    pub contract_id: ContractId,
    pub rule_id: u32,
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

/// One snapshot, or a sequence served one per fetch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FixtureSnapshots {
    Sequence(Vec<Snapshot>),
    Single(Snapshot),
}

impl From<FixtureSnapshots> for VecDeque<Snapshot> {
    fn from(value: FixtureSnapshots) -> Self {
        match value {
            FixtureSnapshots::Sequence(snapshots) => snapshots.into(),
            FixtureSnapshots::Single(snapshot) => VecDeque::from([snapshot]),
        }
    }
}

/// JSON fixture: `{ "contracts": [...], "snapshots": { "<address>": Snapshot | [Snapshot] } }`
#[derive(Debug, Default, Deserialize)]
struct Fixture {
    #[serde(default)]
    contracts: Vec<Contract>,
    #[serde(default)]
    snapshots: HashMap<String, FixtureSnapshots>,
}

/// 内存backend
#[derive(Default)]
pub struct InMemoryBackend {
    contracts: RwLock<Vec<Contract>>,
    /// The front snapshot is served; it is popped while more are queued.
    snapshots: RwLock<HashMap<String, VecDeque<Snapshot>>>,

    alerts: Mutex<Vec<StoredAlert>>,
    status_updates: Mutex<Vec<(ContractId, ContractStatus)>>,
    pauses: Mutex<Vec<ContractId>>,
    resumes: Mutex<Vec<ContractId>>,

    fail_listing: AtomicBool,
    fail_persist: AtomicBool,
    fail_status_updates: AtomicBool,
    fail_pauses: AtomicBool,
    listing_delay: RwLock<Option<Duration>>,
    failing_snapshots: RwLock<HashSet<String>>,
    snapshot_delays: RwLock<HashMap<String, Duration>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contracts(contracts: Vec<Contract>) -> Self {
        let backend = Self::new();
        *backend.contracts.write() = contracts;
        backend
    }

    /// Parse a fixture document.
    pub fn from_fixture_str(json: &str) -> Result<Self> {
        let fixture: Fixture = serde_json::from_str(json)?;
        let backend = Self::with_contracts(fixture.contracts);
        *backend.snapshots.write() = fixture
            .snapshots
            .into_iter()
            .map(|(address, snapshots)| (address, snapshots.into()))
            .collect();
        Ok(backend)
    }

    /// Load a fixture file.
    pub fn from_fixture_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let backend = Self::from_fixture_str(&content)?;
        info!(
            contracts = backend.contracts.read().len(),
            "Loaded fixture from {}",
            path.as_ref().display()
        );
        Ok(backend)
    }

    pub fn add_contract(&self, contract: Contract) {
        self.contracts.write().push(contract);
    }

    /// Removes the contract from the watch list; its snapshot is kept.
    pub fn remove_contract(&self, address: &str) {
        self.contracts.write().retain(|c| c.address != address);
    }

    pub fn set_snapshot(&self, address: impl Into<String>, snapshot: Snapshot) {
        self.snapshots.write().insert(address.into(), VecDeque::from([snapshot]));
    }

    /// Serve `snapshots` one per fetch; the last one repeats.
    pub fn queue_snapshots(&self, address: impl Into<String>, snapshots: Vec<Snapshot>) {
        self.snapshots.write().insert(address.into(), snapshots.into());
    }

    pub fn set_active(&self, address: &str, active: bool) {
        if let Some(contract) = self.contracts.write().iter_mut().find(|c| c.address == address) {
            contract.is_active = active;
        }
    }

    pub fn contract(&self, address: &str) -> Option<Contract> {
        self.contracts.read().iter().find(|c| c.address == address).cloned()
    }

    pub fn contracts(&self) -> Vec<Contract> {
        self.contracts.read().clone()
    }

    // --- failure injection ---

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub fn fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pauses(&self, fail: bool) {
        self.fail_pauses.store(fail, Ordering::SeqCst);
    }

    /// Delay every watch-list fetch.
    pub fn delay_listing(&self, delay: Duration) {
        *self.listing_delay.write() = Some(delay);
    }

    pub fn fail_snapshot(&self, address: &str, fail: bool) {
        let mut failing = self.failing_snapshots.write();
        if fail {
            failing.insert(address.to_string());
        } else {
            failing.remove(address);
        }
    }

    /// Delay every snapshot fetch for `address`; used to exercise timeouts.
    pub fn delay_snapshot(&self, address: &str, delay: Duration) {
        self.snapshot_delays.write().insert(address.to_string(), delay);
    }

    // --- recorded writes ---

    pub fn alerts(&self) -> Vec<StoredAlert> {
        self.alerts.lock().clone()
    }

    pub fn status_updates(&self) -> Vec<(ContractId, ContractStatus)> {
        self.status_updates.lock().clone()
    }

    pub fn pauses(&self) -> Vec<ContractId> {
        self.pauses.lock().clone()
    }

    pub fn resumes(&self) -> Vec<ContractId> {
        self.resumes.lock().clone()
    }

    fn with_contract_mut<F>(&self, contract_id: ContractId, update: F) -> Result<()>
    where
        F: FnOnce(&mut Contract),
    {
        let mut contracts = self.contracts.write();
        let contract = contracts
            .iter_mut()
            .find(|c| c.id == contract_id)
            .ok_or_else(|| GuardianError::NotFound(format!("contract {}", contract_id)))?;
        update(contract);
        Ok(())
    }
}

#[async_trait]
impl ContractSource for InMemoryBackend {
    async fn list_watched_contracts(&self) -> Result<Vec<Contract>> {
        let delay = *self.listing_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(GuardianError::Network("contract source unreachable".to_string()));
        }
        Ok(self.contracts.read().clone())
    }

    async fn fetch_snapshot(&self, address: &str) -> Result<Option<Snapshot>> {
        let delay = self.snapshot_delays.read().get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_snapshots.read().contains(address) {
            return Err(GuardianError::Network(format!("snapshot fetch failed for {}", address)));
        }
        let mut snapshots = self.snapshots.write();
        let Some(queue) = snapshots.get_mut(address) else {
            return Ok(None);
        };
        if queue.len() > 1 {
            Ok(queue.pop_front())
        } else {
            Ok(queue.front().cloned())
        }
    }
}

#[async_trait]
impl AlertStore for InMemoryBackend {
    async fn persist_alert(
        &self,
        contract_id: ContractId,
        rule_id: u32,
        title: &str,
        description: &str,
        severity: Severity,
    ) -> Result<()> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(GuardianError::Backend { status: 503, message: "alert store unavailable".to_string() });
        }
        self.alerts.lock().push(StoredAlert {
            contract_id,
            rule_id,
            title: title.to_string(),
            description: description.to_string(),
            severity,
        });
        debug!(%contract_id, rule_id, "alert stored");
        Ok(())
    }

    async fn update_contract_status(&self, contract_id: ContractId, status: ContractStatus) -> Result<()> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(GuardianError::Backend { status: 503, message: "status update unavailable".to_string() });
        }
        self.with_contract_mut(contract_id, |c| c.status = status)?;
        self.status_updates.lock().push((contract_id, status));
        Ok(())
    }

    async fn pause_contract(&self, contract_id: ContractId) -> Result<()> {
        if self.fail_pauses.load(Ordering::SeqCst) {
            return Err(GuardianError::Backend { status: 503, message: "pause unavailable".to_string() });
        }
        self.with_contract_mut(contract_id, |c| c.is_paused = true)?;
        self.pauses.lock().push(contract_id);
        Ok(())
    }

    async fn resume_contract(&self, contract_id: ContractId) -> Result<()> {
        self.with_contract_mut(contract_id, |c| c.is_paused = false)?;
        self.resumes.lock().push(contract_id);
        Ok(())
    }
}
