//! 升级追踪器
//!
//! Counts consecutive danger cycles per contract address and decides when an
//! automatic freeze is due. Each address has its own lock so a parallel
//! scheduler can never interleave two updates for the same contract.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::anomaly_detection::Finding;

/// 每个合约的升级状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscalationState {
    /// 连续 danger 周期数
    pub consecutive_danger_count: u32,
    /// 上一周期余额（余额下降规则读取）
    pub last_balance: Option<f64>,
    /// 该合约专用的通知地址
    pub webhook_override: Option<String>,
    /// 连续未出现在监控列表中的次数
    pub missed_sweeps: u32,
}

/// 升级追踪器
pub struct EscalationTracker {
    states: RwLock<HashMap<String, Arc<Mutex<EscalationState>>>>,
    freeze_threshold: u32,
    eviction_grace_cycles: u32,
}

impl EscalationTracker {
    pub const DEFAULT_FREEZE_THRESHOLD: u32 = 5;
    pub const DEFAULT_EVICTION_GRACE: u32 = 3;

    pub fn new(freeze_threshold: u32, eviction_grace_cycles: u32) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            freeze_threshold: freeze_threshold.max(1),
            eviction_grace_cycles: eviction_grace_cycles.max(1),
        }
    }

    pub fn freeze_threshold(&self) -> u32 {
        self.freeze_threshold
    }

    /// Entry for `address`, created lazily on first sighting.
    fn entry(&self, address: &str) -> Arc<Mutex<EscalationState>> {
        if let Some(state) = self.states.read().get(address) {
            return state.clone();
        }
        let mut states = self.states.write();
        states.entry(address.to_string()).or_default().clone()
    }

    /// 上一周期余额；未见过的合约返回 `None`
    pub fn last_balance(&self, address: &str) -> Option<f64> {
        self.states.read().get(address).and_then(|state| state.lock().last_balance)
    }

    /// Record one cycle for `address`.
    ///
    /// Any danger finding extends the streak, anything else resets it. Returns
    /// `true` while the streak is at or above the freeze threshold; the streak
    /// only restarts once the caller reports the pause through
    /// [`confirm_freeze`](Self::confirm_freeze), so a pause that failed is
    /// requested again on the next danger cycle. `current_balance` becomes the
    /// next cycle's previous balance.
    pub fn record(&self, address: &str, findings: &[Finding], current_balance: f64) -> bool {
        let entry = self.entry(address);
        let mut state = entry.lock();

        state.last_balance = Some(current_balance);
        state.missed_sweeps = 0;

        if !findings.iter().any(Finding::is_danger) {
            if state.consecutive_danger_count > 0 {
                debug!(contract = %address, "danger streak reset");
            }
            state.consecutive_danger_count = 0;
            return false;
        }

        state.consecutive_danger_count += 1;
        debug!(
            contract = %address,
            streak = state.consecutive_danger_count,
            threshold = self.freeze_threshold,
            "danger cycle recorded"
        );

        if state.consecutive_danger_count >= self.freeze_threshold {
            warn!(
                contract = %address,
                streak = state.consecutive_danger_count,
                threshold = self.freeze_threshold,
                "freeze threshold reached"
            );
            return true;
        }

        false
    }

    /// The freeze requested by [`record`](Self::record) has been carried out;
    /// restart the streak.
    pub fn confirm_freeze(&self, address: &str) {
        if let Some(state) = self.states.read().get(address) {
            state.lock().consecutive_danger_count = 0;
            debug!(contract = %address, "freeze confirmed, danger streak restarted");
        }
    }

    /// Clear the danger streak, e.g. after an operator resumed the contract.
    pub fn reset(&self, address: &str) {
        if let Some(state) = self.states.read().get(address) {
            state.lock().consecutive_danger_count = 0;
        }
    }

    pub fn set_webhook_override(&self, address: &str, url: impl Into<String>) {
        self.entry(address).lock().webhook_override = Some(url.into());
    }

    pub fn clear_webhook_override(&self, address: &str) {
        if let Some(state) = self.states.read().get(address) {
            state.lock().webhook_override = None;
        }
    }

    pub fn webhook_override(&self, address: &str) -> Option<String> {
        self.states.read().get(address).and_then(|state| state.lock().webhook_override.clone())
    }

    /// fetch状态副本
    pub fn state(&self, address: &str) -> Option<EscalationState> {
        self.states.read().get(address).map(|state| state.lock().clone())
    }

    /// Drop all state kept for `address`.
    pub fn remove_contract(&self, address: &str) -> bool {
        let removed = self.states.write().remove(address).is_some();
        if removed {
            info!(contract = %address, "escalation state removed");
        }
        removed
    }

    /// Age out addresses missing from the latest watch list.
    ///
    /// An entry is evicted once it has been absent from `eviction_grace_cycles`
    /// consecutive sweeps. Returns the evicted addresses.
    pub fn sweep(&self, present: &HashSet<&str>) -> Vec<String> {
        let mut states = self.states.write();
        let mut evicted = Vec::new();

        for (address, state) in states.iter() {
            if present.contains(address.as_str()) {
                state.lock().missed_sweeps = 0;
                continue;
            }
            let mut state = state.lock();
            state.missed_sweeps += 1;
            if state.missed_sweeps >= self.eviction_grace_cycles {
                evicted.push(address.clone());
            }
        }

        for address in &evicted {
            states.remove(address);
            info!(contract = %address, "escalation state evicted: no longer watched");
        }

        evicted
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

impl Default for EscalationTracker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FREEZE_THRESHOLD, Self::DEFAULT_EVICTION_GRACE)
    }
}
