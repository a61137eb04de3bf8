//! 告警通知
//!
//! `AlertNotice` is what the dispatcher hands to a `NotificationChannel`.
//! `LogNotifier` only writes the notice to the log; `WebhookNotifier` posts a
//! Discord-compatible embed.

pub mod webhook;

pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::anomaly_detection::{Finding, Severity};
use crate::blockchain::traits::NotificationChannel;
use crate::core::domain::Contract;
use crate::core::errors::Result;

/// 告警通知内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotice {
    pub contract_address: String,
    pub contract_nickname: String,
    pub finding: Finding,
    /// 该合约专用的通知地址（覆盖默认 webhook）
    pub webhook_override: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AlertNotice {
    pub fn new(contract: &Contract, finding: Finding, webhook_override: Option<String>) -> Self {
        Self {
            contract_address: contract.address.clone(),
            contract_nickname: contract.nickname.clone(),
            finding,
            webhook_override,
            timestamp: Utc::now(),
        }
    }

    /// One-line summary used by log output.
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} on {} ({}): {}",
            self.finding.severity.as_str().to_uppercase(),
            self.finding.title,
            self.contract_nickname,
            self.contract_address,
            self.finding.description
        )
    }
}

/// 日志通知器
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn notify(&self, notice: &AlertNotice) -> Result<()> {
        match notice.finding.severity {
            Severity::Danger | Severity::Warning => warn!(
                contract = %notice.contract_address,
                rule_id = notice.finding.rule_id,
                severity = %notice.finding.severity,
                "🚨 {}",
                notice.summary()
            ),
            Severity::Info => info!(
                contract = %notice.contract_address,
                rule_id = notice.finding.rule_id,
                "{}",
                notice.summary()
            ),
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}
