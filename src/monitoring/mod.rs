//! 监控循环
//!
//! Scheduler, alert dispatch, injectable clock and prometheus metrics.

pub mod clock;
pub mod dispatch;
pub mod metrics;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{status_for, AlertDispatcher, DispatchReport};
pub use metrics::MonitorMetrics;
pub use scheduler::{ContractFinding, CycleReport, MonitoringScheduler, StatusEntry, StatusSummary};
