//! 检测器插件系统
//!
//! `Detector` is the seam every rule implements; `DetectorRegistry` runs them
//! in declaration order against one snapshot and collects the findings.

use tracing::debug;

use crate::anomaly_detection::{rules, DetectionThresholds, Finding};
use crate::core::domain::Snapshot;

/// 检测上下文（one contract, one cycle）
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    /// 合约标识（address）
    pub contract_key: &'a str,
    /// 当前时间（秒），由调度器的时钟提供
    pub now: i64,
    /// 上一周期记录的余额；首次出现时为 `None`
    pub previous_balance: Option<f64>,
    pub snapshot: &'a Snapshot,
}

impl<'a> DetectionInput<'a> {
    pub fn new(contract_key: &'a str, now: i64, previous_balance: Option<f64>, snapshot: &'a Snapshot) -> Self {
        Self { contract_key, now, previous_balance, snapshot }
    }

    /// Records strictly newer than `now - window_secs` are inside the window.
    pub fn in_window(&self, timestamp: i64, window_secs: i64) -> bool {
        timestamp > self.now - window_secs
    }
}

/// 检测器 trait
///
/// Implementations must be pure: no I/O, no interior mutability, at most one
/// finding per call.
pub trait Detector: Send + Sync {
    /// 稳定的规则 id
    fn rule_id(&self) -> u32;

    /// 规则名称
    fn name(&self) -> &str;

    /// 评估快照
    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<Finding>;
}

/// 检测器注册中心
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorRegistry {
    /// 创建空的注册中心
    pub fn new() -> Self {
        Self { detectors: Vec::new() }
    }

    /// Built-in detectors in declaration order, filtered by `enabled_rules`.
    pub fn with_thresholds(thresholds: &DetectionThresholds) -> Self {
        let mut registry = Self::new();
        for detector in rules::builtin_detectors(thresholds) {
            if thresholds.is_enabled(detector.rule_id()) {
                // builtin ids are unique
                let _ = registry.register(detector);
            }
        }
        debug!(count = registry.count(), "detector registry initialised");
        registry
    }

    /// 注册检测器（rule id 必须唯一）
    pub fn register(&mut self, detector: Box<dyn Detector>) -> Result<(), String> {
        let rule_id = detector.rule_id();
        if self.detectors.iter().any(|d| d.rule_id() == rule_id) {
            return Err(format!("Detector for rule {} is already registered", rule_id));
        }
        self.detectors.push(detector);
        Ok(())
    }

    /// 评估所有检测器
    pub fn evaluate_all(&self, input: &DetectionInput<'_>) -> Vec<Finding> {
        self.detectors.iter().filter_map(|detector| detector.evaluate(input)).collect()
    }

    pub fn rule_ids(&self) -> Vec<u32> {
        self.detectors.iter().map(|d| d.rule_id()).collect()
    }

    /// fetch检测器数量
    pub fn count(&self) -> usize {
        self.detectors.len()
    }
}
