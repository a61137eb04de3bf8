//! Canister HTTP 客户端
//!
//! JSON-over-HTTP adapter for the contract backend. Every call is a POST of
//! `{"method": ..., "args": {...}}` to `{base_url}/?canisterId={id}`.
//! Retryable failures are retried here with exponential backoff; callers see
//! one logical attempt.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::anomaly_detection::Severity;
use crate::blockchain::traits::{AlertStore, ContractSource};
use crate::core::config::BackendConfig;
use crate::core::domain::{Contract, ContractId, ContractStatus, Snapshot};
use crate::core::errors::{GuardianError, Result};

/// `getContracts` 响应
#[derive(Debug, Default, Deserialize)]
struct ContractsResponse {
    #[serde(default)]
    contracts: Vec<Contract>,
}

/// `getContractSnapshot` 响应；`snapshot: null` 表示未找到
#[derive(Debug, Default, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    snapshot: Option<Snapshot>,
}

/// Canister 客户端
pub struct CanisterClient {
    client: reqwest::Client,
    endpoint: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl CanisterClient {
    /// 创建客户端
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GuardianError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/?canisterId={}",
                config.base_url.trim_end_matches('/'),
                config.canister_id
            ),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One HTTP round trip.
    async fn call_once(&self, method: &str, args: &Value) -> Result<Value> {
        let payload = json!({ "method": method, "args": args });

        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GuardianError::Backend { status: status.as_u16(), message });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Call `method`, retrying retryable failures with exponential backoff.
    async fn call(&self, method: &str, args: Value) -> Result<Value> {
        let mut attempt = 0;
        loop {
            match self.call_once(method, &args).await {
                Ok(value) => {
                    debug!(method, attempt, "canister call succeeded");
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(method, attempt, ?delay, "canister call failed, retrying: {}", err);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(method, attempt, "canister call failed: {}", err);
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl ContractSource for CanisterClient {
    async fn list_watched_contracts(&self) -> Result<Vec<Contract>> {
        let value = self.call("getContracts", json!({})).await?;
        let response: ContractsResponse = serde_json::from_value(value)?;
        Ok(response.contracts)
    }

    async fn fetch_snapshot(&self, address: &str) -> Result<Option<Snapshot>> {
        let value = self.call("getContractSnapshot", json!({ "address": address })).await?;
        if value.is_null() {
            return Ok(None);
        }
        let response: SnapshotResponse = serde_json::from_value(value)?;
        Ok(response.snapshot)
    }
}

#[async_trait]
impl AlertStore for CanisterClient {
    async fn persist_alert(
        &self,
        contract_id: ContractId,
        rule_id: u32,
        title: &str,
        description: &str,
        severity: Severity,
    ) -> Result<()> {
        let args = json!({
            "contractId": contract_id,
            "ruleId": rule_id,
            "title": title,
            "description": description,
            "severity": severity,
        });
        self.call("createAlert", args).await.map(|_| ())
    }

    async fn update_contract_status(&self, contract_id: ContractId, status: ContractStatus) -> Result<()> {
        self.call("updateContractStatus", json!({ "id": contract_id, "status": status }))
            .await
            .map(|_| ())
    }

    async fn pause_contract(&self, contract_id: ContractId) -> Result<()> {
        self.call("pauseContract", json!({ "id": contract_id })).await.map(|_| ())
    }

    async fn resume_contract(&self, contract_id: ContractId) -> Result<()> {
        self.call("resumeContract", json!({ "id": contract_id })).await.map(|_| ())
    }
}
