use prometheus::{Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::info;

use crate::anomaly_detection::Severity;
use crate::core::errors::{GuardianError, Result};

pub struct MonitorMetrics {
    registry: Registry,

    // Cycle metrics
    pub cycles: Counter,
    pub cycle_failures: Counter,
    pub cycle_duration: Histogram,

    // Contract metrics
    pub contracts_checked: Counter,
    pub contract_failures: Counter,

    // Alert metrics
    pub findings: CounterVec,
    pub freezes: Counter,
    pub dispatch_failures: Counter,
}

impl MonitorMetrics {
    pub fn new() -> Result<Self> {
        Self::build().map_err(|e| GuardianError::Configuration(format!("metrics: {}", e)))
    }

    fn build() -> prometheus::Result<Self> {
        info!("📊 Initializing guardian metrics");

        let registry = Registry::new();

        // Cycle metrics
        let cycles = Counter::new("guardian_cycles_total", "Total number of monitoring cycles run")?;
        let cycle_failures = Counter::new(
            "guardian_cycle_failures_total",
            "Total number of cycles aborted because the watch list could not be fetched",
        )?;
        let cycle_duration = Histogram::with_opts(HistogramOpts::new(
            "guardian_cycle_duration_seconds",
            "Monitoring cycle duration in seconds",
        ))?;

        // Contract metrics
        let contracts_checked =
            Counter::new("guardian_contracts_checked_total", "Total number of contract evaluations")?;
        let contract_failures = Counter::new(
            "guardian_contract_failures_total",
            "Total number of contract evaluations that failed or timed out",
        )?;

        // Alert metrics
        let findings = CounterVec::new(
            Opts::new("guardian_findings_total", "Total number of detector findings"),
            &["severity"],
        )?;
        let freezes = Counter::new("guardian_freezes_total", "Total number of automatic freezes requested")?;
        let dispatch_failures = Counter::new(
            "guardian_dispatch_failures_total",
            "Total number of failed alert side effects",
        )?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(cycle_failures.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(contracts_checked.clone()))?;
        registry.register(Box::new(contract_failures.clone()))?;
        registry.register(Box::new(findings.clone()))?;
        registry.register(Box::new(freezes.clone()))?;
        registry.register(Box::new(dispatch_failures.clone()))?;

        Ok(Self {
            registry,
            cycles,
            cycle_failures,
            cycle_duration,
            contracts_checked,
            contract_failures,
            findings,
            freezes,
            dispatch_failures,
        })
    }

    pub fn export_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| GuardianError::Serialization(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| GuardianError::Serialization(e.to_string()))
    }

    pub fn record_cycle(&self, duration_secs: f64) {
        self.cycles.inc();
        self.cycle_duration.observe(duration_secs);
    }

    pub fn record_cycle_failure(&self) {
        self.cycle_failures.inc();
    }

    pub fn record_contract_checked(&self) {
        self.contracts_checked.inc();
    }

    pub fn record_contract_failure(&self) {
        self.contract_failures.inc();
    }

    pub fn record_finding(&self, severity: Severity) {
        self.findings.with_label_values(&[severity.as_str()]).inc();
    }

    pub fn record_freeze(&self) {
        self.freezes.inc();
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.inc();
    }

    pub fn findings_total(&self, severity: Severity) -> f64 {
        self.findings.with_label_values(&[severity.as_str()]).get()
    }
}
