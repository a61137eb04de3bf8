//! Domain types shared by the detectors, the escalation tracker and the
//! collaborator adapters.
//!
//! Snapshot records are typed per event category. Every field decodes
//! leniently: a missing, `null` or mistyped value falls back to its zero value
//! and an undecodable list element is dropped, so bad data degrades the one
//! rule that reads it instead of the whole cycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque backend handle of a watched contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub u64);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ContractId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Coarse health status kept by the backend for each contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Healthy => "healthy",
            ContractStatus::Warning => "warning",
            ContractStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contract on the watch list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: ContractId,
    pub address: String,
    #[serde(default = "Contract::default_nickname")]
    pub nickname: String,
    #[serde(default)]
    pub status: ContractStatus,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default = "Contract::default_active")]
    pub is_active: bool,
}

impl Contract {
    fn default_nickname() -> String {
        "Unknown Contract".to_string()
    }

    fn default_active() -> bool {
        true
    }

    pub fn new(id: impl Into<ContractId>, address: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            nickname: nickname.into(),
            status: ContractStatus::Healthy,
            is_paused: false,
            is_active: true,
        }
    }
}

/// A balance-moving transaction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub amount: f64,
    /// Free-form transaction kind as reported by the backend (`transfer`, `borrow`, ...).
    #[serde(rename = "type", default, deserialize_with = "lenient::text")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::optional_text")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient::optional_text")]
    pub to: Option<String>,
}

impl Transaction {
    pub fn new(timestamp: i64, amount: f64, kind: impl Into<String>) -> Self {
        Self { timestamp, amount, kind: kind.into(), from: None, to: None }
    }
}

/// An invocation of a contract entry point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub function_name: String,
    #[serde(default = "unknown_caller", deserialize_with = "lenient::caller")]
    pub caller: String,
}

impl FunctionCall {
    pub fn new(timestamp: i64, function_name: impl Into<String>, caller: impl Into<String>) -> Self {
        Self { timestamp, function_name: function_name.into(), caller: caller.into() }
    }
}

/// An administrative event (ownership transfer, role grant, upgrade, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminEvent {
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub event_type: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub function_name: String,
    #[serde(default = "unknown_caller", deserialize_with = "lenient::caller")]
    pub caller: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AdminEvent {
    pub fn new(
        timestamp: i64,
        event_type: impl Into<String>,
        function_name: impl Into<String>,
        caller: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            event_type: event_type.into(),
            function_name: function_name.into(),
            caller: caller.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// One price observation for the asset the contract manages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceSample {
    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub price: f64,
    #[serde(default, deserialize_with = "lenient::number")]
    pub volume: f64,
}

impl PriceSample {
    pub fn new(timestamp: i64, price: f64) -> Self {
        Self { timestamp, price, volume: 0.0 }
    }
}

/// One cycle's read-only view of a contract's activity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, deserialize_with = "lenient::number")]
    pub balance: f64,
    #[serde(default, deserialize_with = "lenient::list")]
    pub transactions: Vec<Transaction>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub function_calls: Vec<FunctionCall>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub admin_events: Vec<AdminEvent>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub price_samples: Vec<PriceSample>,
}

impl Snapshot {
    pub fn with_balance(balance: f64) -> Self {
        Self { balance, ..Default::default() }
    }
}

fn unknown_caller() -> String {
    "unknown".to_string()
}

/// Field decoders that fall back to the zero value instead of failing.
mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use tracing::debug;

    /// Seconds since epoch; floats are truncated, numeric strings accepted.
    pub fn timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64),
            _ => None,
        };
        Ok(seconds.unwrap_or_default())
    }

    pub fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        Ok(value.filter(|f| f.is_finite()).unwrap_or_default())
    }

    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(to_text(Value::deserialize(deserializer)?).unwrap_or_default())
    }

    pub fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(to_text(Value::deserialize(deserializer)?))
    }

    pub fn caller<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(to_text(Value::deserialize(deserializer)?).unwrap_or_else(super::unknown_caller))
    }

    /// Elements that do not decode are dropped; a non-array is an empty list.
    pub fn list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let Value::Array(items) = Value::deserialize(deserializer)? else {
            return Ok(Vec::new());
        };
        let total = items.len();
        let decoded: Vec<T> = items.into_iter().filter_map(|item| serde_json::from_value(item).ok()).collect();
        if decoded.len() < total {
            debug!(dropped = total - decoded.len(), "skipped undecodable snapshot records");
        }
        Ok(decoded)
    }

    fn to_text(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}
