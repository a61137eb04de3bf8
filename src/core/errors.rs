//! Guardian error类型
//!
//! 统一的error类型：collaborator failures, malformed payloads and detector faults.
//! None of these is fatal to the monitoring loop; callers log and continue.

use thiserror::Error;

/// Guardian error类型
#[derive(Debug, Error)]
pub enum GuardianError {
    /// network/传输error
    #[error("Network error: {0}")]
    Network(String),

    /// 超时
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// backend返回非成功状态
    #[error("Backend error: {status} - {message}")]
    Backend { status: u16, message: String },

    /// 记录未找到
    #[error("Not found: {0}")]
    NotFound(String),

    /// 序列化/反序列化error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// notification channel error
    #[error("Notification error: {0}")]
    Notification(String),

    /// 配置error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// detector panicked or misbehaved
    #[error("Detector error: {0}")]
    Detector(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Guardian结果类型
pub type Result<T> = std::result::Result<T, GuardianError>;

impl GuardianError {
    /// 判断是否为可重试error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 判断是否为严重error
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Detector(_))
    }
}

impl From<reqwest::Error> for GuardianError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Backend { status: status.as_u16(), message: err.to_string() }
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GuardianError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GuardianError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for GuardianError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}
