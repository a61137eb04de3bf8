use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::anomaly_detection::DetectionThresholds;
use crate::core::errors::{GuardianError, Result};

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep between monitoring cycles (seconds)
    pub interval_secs: u64,

    /// Sleep after the watch list could not be fetched (seconds)
    pub recovery_interval_secs: u64,

    /// Upper bound for one contract's fetch + evaluate + dispatch (seconds)
    pub contract_timeout_secs: u64,

    /// Upper bound for each individual dispatch side effect (seconds)
    pub dispatch_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            recovery_interval_secs: 60,
            contract_timeout_secs: 30,
            dispatch_timeout_secs: 10,
        }
    }
}

impl SchedulerConfig {
    /// Worst case for dispatching one finding: persist, notify, status.
    pub fn dispatch_budget_secs(&self) -> u64 {
        self.dispatch_timeout_secs.saturating_mul(3)
    }
}

/// Escalation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Consecutive danger cycles before an automatic freeze
    pub freeze_threshold: u32,

    /// Missed watch-list fetches before a contract's state is dropped
    pub eviction_grace_cycles: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { freeze_threshold: 5, eviction_grace_cycles: 3 }
    }
}

/// Contract backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub canister_id: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4943".to_string(),
            canister_id: "rdmx6-jaaaa-aaaah-qcaiq-cai".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Default webhook; alerts are only logged when unset
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
    pub username: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { webhook_url: None, timeout_secs: 10, username: "Canary Guardian".to_string() }
    }
}

/// Guardian configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub scheduler: SchedulerConfig,
    pub escalation: EscalationConfig,
    pub detection: DetectionThresholds,
    pub backend: BackendConfig,
    pub notification: NotificationConfig,
    pub log_level: String,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            escalation: EscalationConfig::default(),
            detection: DetectionThresholds::default(),
            backend: BackendConfig::default(),
            notification: NotificationConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl GuardianConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Defaults, then the optional file, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CANISTER_ID`, `CANISTER_BASE_URL`, `DISCORD_WEBHOOK_URL`,
    /// `MONITORING_INTERVAL` and `LOG_LEVEL` from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(canister_id) = lookup("CANISTER_ID") {
            self.backend.canister_id = canister_id;
        }
        if let Some(base_url) = lookup("CANISTER_BASE_URL") {
            self.backend.base_url = base_url;
        }
        if let Some(webhook) = lookup("DISCORD_WEBHOOK_URL").filter(|v| !v.trim().is_empty()) {
            self.notification.webhook_url = Some(webhook);
        }
        if let Some(interval) = lookup("MONITORING_INTERVAL") {
            self.scheduler.interval_secs = interval.trim().parse().map_err(|_| {
                GuardianError::Configuration(format!("MONITORING_INTERVAL is not a number: {}", interval))
            })?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        Ok(())
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(GuardianError::Configuration(msg.to_string()));

        if self.scheduler.interval_secs == 0 {
            return fail("Monitoring interval must be greater than 0");
        }
        if self.scheduler.recovery_interval_secs == 0 {
            return fail("Recovery interval must be greater than 0");
        }
        if self.scheduler.contract_timeout_secs == 0 || self.scheduler.dispatch_timeout_secs == 0 {
            return fail("Timeouts must be greater than 0");
        }
        if self.scheduler.contract_timeout_secs < self.scheduler.dispatch_budget_secs() {
            return fail("Contract timeout must cover the three dispatch steps of one finding");
        }
        if self.escalation.freeze_threshold == 0 {
            return fail("Freeze threshold must be at least 1");
        }
        if self.escalation.eviction_grace_cycles == 0 {
            return fail("Eviction grace must be at least 1 cycle");
        }
        if self.backend.base_url.trim().is_empty() {
            return fail("Backend base URL must not be empty");
        }
        self.detection.validate().map_err(GuardianError::Configuration)
    }
}
