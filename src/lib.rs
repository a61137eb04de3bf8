// src/lib.rs

pub mod anomaly_detection;
pub mod blockchain;
pub mod cli;
pub mod core;
pub mod monitoring;
pub mod notification;

pub use anomaly_detection::{DetectionThresholds, DetectorRegistry, EscalationTracker, Finding, Severity};
pub use crate::core::config::GuardianConfig;
pub use crate::core::errors::{GuardianError, Result};
pub use monitoring::{CycleReport, MonitoringScheduler};
