//! 检测阈值配置
//!
//! Every numeric constant the detectors use lives here so operators can tune
//! them per deployment; the defaults are the reference thresholds.

use serde::{Deserialize, Serialize};

/// 检测阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    /// 启用的规则 id
    pub enabled_rules: Vec<u32>,

    /// 时间窗口（秒），所有规则共用
    pub window_secs: i64,

    /// 余额下降比例阈值
    pub balance_drop_ratio: f64,

    /// 窗口内transaction数量上限
    pub transaction_volume_limit: usize,

    /// 可疑函数名关键字
    pub suspicious_functions: Vec<String>,

    /// 重入：同一函数最少调用次数
    pub reentrancy_call_limit: usize,

    /// 重入：首末调用的最大跨度（秒，严格小于）
    pub reentrancy_window_secs: i64,

    /// 闪电贷金额阈值
    pub flash_loan_amount: f64,

    /// 闪电贷后续transaction窗口（秒）
    pub flash_loan_window_secs: i64,

    /// 闪电贷后续transaction最少数量
    pub flash_loan_follow_on: usize,

    /// 所有权/权限变更关键字
    pub ownership_keywords: Vec<String>,

    /// 相邻价格变化比例阈值
    pub price_change_ratio: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            enabled_rules: (1..=7).collect(),
            window_secs: 3600,
            balance_drop_ratio: 0.5,
            transaction_volume_limit: 10,
            suspicious_functions: ["upgrade", "admin", "owner", "destroy", "migrate"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            reentrancy_call_limit: 3,
            reentrancy_window_secs: 60,
            flash_loan_amount: 1_000_000.0,
            flash_loan_window_secs: 300,
            flash_loan_follow_on: 3,
            ownership_keywords: ["owner", "admin", "permission", "role", "access", "upgrade", "migrate"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            price_change_ratio: 0.3,
        }
    }
}

impl DetectionThresholds {
    pub fn is_enabled(&self, rule_id: u32) -> bool {
        self.enabled_rules.contains(&rule_id)
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<(), String> {
        if self.window_secs <= 0 {
            return Err("Detection window must be greater than 0".to_string());
        }

        for (name, ratio) in [
            ("balance_drop_ratio", self.balance_drop_ratio),
            ("price_change_ratio", self.price_change_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(format!("{} must be in (0.0, 1.0]", name));
            }
        }

        if self.reentrancy_call_limit < 2 {
            return Err("Reentrancy call limit must be at least 2".to_string());
        }

        if self.reentrancy_window_secs <= 0 || self.flash_loan_window_secs <= 0 {
            return Err("Rule windows must be greater than 0".to_string());
        }

        if self.flash_loan_amount <= 0.0 {
            return Err("Flash loan amount threshold must be greater than 0".to_string());
        }

        if let Some(unknown) = self.enabled_rules.iter().find(|id| !(1..=7).contains(*id)) {
            return Err(format!("Unknown rule id in enabled_rules: {}", unknown));
        }

        Ok(())
    }
}
