//! 合约异常检测模块
//!
//! Time-windowed rules evaluated against one contract snapshot per cycle,
//! plus the per-contract escalation tracker that decides on automatic freezes.
//!
//! ## 特性
//! - 七条独立规则（余额、transaction量、可疑调用、重入、闪电贷、权限变更、价格操纵）
//! - 纯函数检测器：no I/O, no shared mutable state
//! - 可配置阈值与规则开关
//! - 连续 danger 周期升级为冻结请求

pub mod config;
pub mod escalation;
pub mod plugins;
pub mod rules;

pub use config::DetectionThresholds;
pub use escalation::{EscalationState, EscalationTracker};
pub use plugins::{DetectionInput, Detector, DetectorRegistry};
pub use rules::{rule_descriptions, RuleDescription, Severity};

use serde::{Deserialize, Serialize};

/// Direction of an adjacent price move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Increased,
    Decreased,
}

impl PriceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceDirection::Increased => "increased",
            PriceDirection::Decreased => "decreased",
        }
    }
}

/// 结构化证据：每条规则一个变体，携带触发时的具体数值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    BalanceDrop {
        previous_balance: f64,
        current_balance: f64,
        drop_ratio: f64,
    },
    TransactionVolume {
        transaction_count: usize,
        window_secs: i64,
        threshold: usize,
    },
    SuspiciousCall {
        function_name: String,
        caller: String,
        timestamp: i64,
    },
    Reentrancy {
        function_name: String,
        call_count: usize,
        span_secs: i64,
        timestamps: Vec<i64>,
    },
    FlashLoan {
        loan_amount: f64,
        follow_on_count: usize,
        loan_timestamp: i64,
    },
    OwnershipChange {
        event_type: String,
        function_name: String,
        caller: String,
        timestamp: i64,
        details: serde_json::Value,
    },
    PriceMove {
        previous_price: f64,
        current_price: f64,
        change_ratio: f64,
        direction: PriceDirection,
        time_delta_secs: i64,
    },
}

/// 检测结果：one detector's verdict for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// 稳定的规则 id（关联键）
    pub rule_id: u32,
    pub rule_name: String,
    pub title: String,
    /// 人类可读描述，包含触发数值
    pub description: String,
    pub severity: Severity,
    pub data: Evidence,
}

impl Finding {
    pub fn is_danger(&self) -> bool {
        self.severity == Severity::Danger
    }
}
