//! Discord webhook 通知器

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::anomaly_detection::Severity;
use crate::blockchain::traits::NotificationChannel;
use crate::core::config::NotificationConfig;
use crate::core::errors::{GuardianError, Result};
use crate::notification::AlertNotice;

const FOOTER_TEXT: &str = "Canary Contract Guardian";

/// Webhook 通知器
pub struct WebhookNotifier {
    client: reqwest::Client,
    default_url: Option<String>,
    username: String,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GuardianError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_url: config.webhook_url.clone().filter(|url| !url.trim().is_empty()),
            username: config.username.clone(),
        })
    }

    /// Embed colour per severity.
    pub fn severity_color(severity: Severity) -> u32 {
        match severity {
            Severity::Danger => 0xDC2626,
            Severity::Warning => 0xF59E0B,
            Severity::Info => 0x3B82F6,
        }
    }

    /// Discord 消息体
    pub fn build_payload(&self, notice: &AlertNotice) -> Value {
        let finding = &notice.finding;
        let severity = finding.severity.as_str();
        let mut severity_title = severity.to_string();
        if let Some(first) = severity_title.get_mut(0..1) {
            first.make_ascii_uppercase();
        }

        json!({
            "username": self.username,
            "embeds": [{
                "title": format!("🚨 {}", finding.title),
                "description": finding.description,
                "color": Self::severity_color(finding.severity),
                "timestamp": notice.timestamp.to_rfc3339(),
                "fields": [
                    { "name": "Contract", "value": format!("`{}`", notice.contract_address), "inline": true },
                    { "name": "Severity", "value": severity_title, "inline": true },
                    { "name": "Rule", "value": finding.rule_name, "inline": true },
                ],
                "footer": { "text": FOOTER_TEXT },
            }],
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotifier {
    async fn notify(&self, notice: &AlertNotice) -> Result<()> {
        let Some(url) = notice.webhook_override.as_deref().or(self.default_url.as_deref()) else {
            info!(contract = %notice.contract_address, "no webhook configured, alert logged only: {}", notice.summary());
            return Ok(());
        };

        let payload = self.build_payload(notice);
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GuardianError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            error!(contract = %notice.contract_address, status = status.as_u16(), "webhook delivery failed");
            return Err(GuardianError::Notification(format!("webhook returned {}", status.as_u16())));
        }

        debug!(contract = %notice.contract_address, rule_id = notice.finding.rule_id, "webhook delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}
