//! Contract anomaly rules
//!
//! One detector per anomaly category. Each detector is a pure function of the
//! snapshot, the evaluation time and its configured thresholds, and reports at
//! most one finding per cycle: the first violation it meets wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::anomaly_detection::{
    DetectionInput, DetectionThresholds, Detector, Evidence, Finding, PriceDirection,
};

/// Severity classification for findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only
    Info,
    /// Suspicious, worth a look
    Warning,
    /// Counts toward automatic freeze
    Danger,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Danger => "danger",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const BALANCE_DROP_RULE: u32 = 1;
pub const TRANSACTION_VOLUME_RULE: u32 = 2;
pub const SUSPICIOUS_CALL_RULE: u32 = 3;
pub const REENTRANCY_RULE: u32 = 4;
pub const FLASH_LOAN_RULE: u32 = 5;
pub const OWNERSHIP_CHANGE_RULE: u32 = 6;
pub const PRICE_MANIPULATION_RULE: u32 = 7;

/// Catalogue entry describing one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDescription {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub enabled: bool,
}

/// Describe all rules with the configured thresholds rendered in
pub fn rule_descriptions(thresholds: &DetectionThresholds) -> Vec<RuleDescription> {
    let window_label = format_window(thresholds.window_secs);
    let entries = [
        (
            BALANCE_DROP_RULE,
            BalanceDropDetector::NAME,
            format!(
                "Triggers when contract balance drops by more than {:.0}% between monitoring cycles",
                thresholds.balance_drop_ratio * 100.0
            ),
            Severity::Danger,
        ),
        (
            TRANSACTION_VOLUME_RULE,
            TransactionVolumeDetector::NAME,
            format!(
                "Triggers when more than {} transactions occur in the last {}",
                thresholds.transaction_volume_limit, window_label
            ),
            Severity::Warning,
        ),
        (
            SUSPICIOUS_CALL_RULE,
            SuspiciousCallDetector::NAME,
            format!(
                "Triggers when potentially dangerous functions ({}) are called",
                thresholds.suspicious_functions.join(", ")
            ),
            Severity::Warning,
        ),
        (
            REENTRANCY_RULE,
            ReentrancyDetector::NAME,
            format!(
                "Detects potential reentrancy attacks: {} or more calls to one function within {}s",
                thresholds.reentrancy_call_limit, thresholds.reentrancy_window_secs
            ),
            Severity::Danger,
        ),
        (
            FLASH_LOAN_RULE,
            FlashLoanDetector::NAME,
            format!(
                "Detects flash loan attack patterns - large loans (>{}) followed by {} or more transactions within {}s",
                format_amount(thresholds.flash_loan_amount),
                thresholds.flash_loan_follow_on,
                thresholds.flash_loan_window_secs
            ),
            Severity::Danger,
        ),
        (
            OWNERSHIP_CHANGE_RULE,
            OwnershipChangeDetector::NAME,
            "Monitors changes in contract ownership, permissions, and admin functions".to_string(),
            Severity::Warning,
        ),
        (
            PRICE_MANIPULATION_RULE,
            PriceManipulationDetector::NAME,
            format!(
                "Detects abnormal price changes (>{:.0}%) that could indicate manipulation",
                thresholds.price_change_ratio * 100.0
            ),
            Severity::Warning,
        ),
    ];

    entries
        .into_iter()
        .map(|(id, name, description, severity)| RuleDescription {
            id,
            name: name.to_string(),
            description,
            severity,
            enabled: thresholds.is_enabled(id),
        })
        .collect()
}

/// All built-in detectors in declaration order
pub fn builtin_detectors(thresholds: &DetectionThresholds) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(BalanceDropDetector::new(thresholds)) as Box<dyn Detector>,
        Box::new(TransactionVolumeDetector::new(thresholds)),
        Box::new(SuspiciousCallDetector::new(thresholds)),
        Box::new(ReentrancyDetector::new(thresholds)),
        Box::new(FlashLoanDetector::new(thresholds)),
        Box::new(OwnershipChangeDetector::new(thresholds)),
        Box::new(PriceManipulationDetector::new(thresholds)),
    ]
}

/// Rule 1: balance fell by more than the configured ratio since last cycle
#[derive(Debug, Clone)]
pub struct BalanceDropDetector {
    drop_ratio: f64,
}

impl BalanceDropDetector {
    pub const NAME: &'static str = "Balance Drop Alert";

    pub fn new(thresholds: &DetectionThresholds) -> Self {
        Self { drop_ratio: thresholds.balance_drop_ratio }
    }
}

impl Detector for BalanceDropDetector {
    fn rule_id(&self) -> u32 {
        BALANCE_DROP_RULE
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<Finding> {
        // first sighting behaves like "no change"
        let previous = input.previous_balance?;
        if previous == 0.0 {
            return None;
        }

        let current = input.snapshot.balance;
        let drop = (previous - current) / previous;
        if drop <= self.drop_ratio {
            return None;
        }

        Some(Finding {
            rule_id: BALANCE_DROP_RULE,
            rule_name: Self::NAME.to_string(),
            title: "Large Balance Drop Detected".to_string(),
            description: format!(
                "Balance decreased by {:.1}% in recent monitoring cycle ({} -> {})",
                drop * 100.0,
                format_amount(previous),
                format_amount(current)
            ),
            severity: Severity::Danger,
            data: Evidence::BalanceDrop {
                previous_balance: previous,
                current_balance: current,
                drop_ratio: drop,
            },
        })
    }
}

/// Rule 2: too many transactions inside the window
#[derive(Debug, Clone)]
pub struct TransactionVolumeDetector {
    window_secs: i64,
    limit: usize,
}

impl TransactionVolumeDetector {
    pub const NAME: &'static str = "High Transaction Volume";

    pub fn new(thresholds: &DetectionThresholds) -> Self {
        Self { window_secs: thresholds.window_secs, limit: thresholds.transaction_volume_limit }
    }
}

impl Detector for TransactionVolumeDetector {
    fn rule_id(&self) -> u32 {
        TRANSACTION_VOLUME_RULE
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<Finding> {
        let count = input
            .snapshot
            .transactions
            .iter()
            .filter(|tx| input.in_window(tx.timestamp, self.window_secs))
            .count();

        if count <= self.limit {
            return None;
        }

        Some(Finding {
            rule_id: TRANSACTION_VOLUME_RULE,
            rule_name: Self::NAME.to_string(),
            title: "Unusual Transaction Activity".to_string(),
            description: format!(
                "Detected {} transactions in the last {} (limit: {})",
                count,
                format_window(self.window_secs),
                self.limit
            ),
            severity: Severity::Warning,
            data: Evidence::TransactionVolume {
                transaction_count: count,
                window_secs: self.window_secs,
                threshold: self.limit,
            },
        })
    }
}

/// Rule 3: a privileged-looking function was called
#[derive(Debug, Clone)]
pub struct SuspiciousCallDetector {
    window_secs: i64,
    keywords: Vec<String>,
}

impl SuspiciousCallDetector {
    pub const NAME: &'static str = "Suspicious Function Call";

    pub fn new(thresholds: &DetectionThresholds) -> Self {
        Self {
            window_secs: thresholds.window_secs,
            keywords: lowercase_all(&thresholds.suspicious_functions),
        }
    }
}

impl Detector for SuspiciousCallDetector {
    fn rule_id(&self) -> u32 {
        SUSPICIOUS_CALL_RULE
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<Finding> {
        let call = input
            .snapshot
            .function_calls
            .iter()
            .filter(|call| input.in_window(call.timestamp, self.window_secs))
            .find(|call| contains_any(&call.function_name.to_lowercase(), &self.keywords))?;

        Some(Finding {
            rule_id: SUSPICIOUS_CALL_RULE,
            rule_name: Self::NAME.to_string(),
            title: "Potentially Dangerous Function Called".to_string(),
            description: format!(
                "Function '{}' was called recently by {}",
                call.function_name, call.caller
            ),
            severity: Severity::Warning,
            data: Evidence::SuspiciousCall {
                function_name: call.function_name.clone(),
                caller: call.caller.clone(),
                timestamp: call.timestamp,
            },
        })
    }
}

/// Rule 4: the same function hammered within a short span
#[derive(Debug, Clone)]
pub struct ReentrancyDetector {
    window_secs: i64,
    call_limit: usize,
    span_secs: i64,
}

impl ReentrancyDetector {
    pub const NAME: &'static str = "Reentrancy Attack Detection";

    pub fn new(thresholds: &DetectionThresholds) -> Self {
        Self {
            window_secs: thresholds.window_secs,
            call_limit: thresholds.reentrancy_call_limit,
            span_secs: thresholds.reentrancy_window_secs,
        }
    }
}

impl Detector for ReentrancyDetector {
    fn rule_id(&self) -> u32 {
        REENTRANCY_RULE
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<Finding> {
        // groups kept in first-seen order so the reported function is deterministic
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<(&str, Vec<i64>)> = Vec::new();

        for call in input
            .snapshot
            .function_calls
            .iter()
            .filter(|call| input.in_window(call.timestamp, self.window_secs))
            .filter(|call| !call.function_name.is_empty())
        {
            let name = call.function_name.as_str();
            let slot = *index.entry(name).or_insert_with(|| {
                groups.push((name, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(call.timestamp);
        }

        for (name, mut timestamps) in groups {
            if timestamps.len() < self.call_limit {
                continue;
            }
            timestamps.sort_unstable();
            let span = timestamps[timestamps.len() - 1] - timestamps[0];
            if span >= self.span_secs {
                continue;
            }

            return Some(Finding {
                rule_id: REENTRANCY_RULE,
                rule_name: Self::NAME.to_string(),
                title: "Potential Reentrancy Attack Detected".to_string(),
                description: format!(
                    "Function '{}' called {} times within {}s - possible reentrancy attack",
                    name,
                    timestamps.len(),
                    span
                ),
                severity: Severity::Danger,
                data: Evidence::Reentrancy {
                    function_name: name.to_string(),
                    call_count: timestamps.len(),
                    span_secs: span,
                    timestamps,
                },
            });
        }

        None
    }
}

/// Rule 5: a large borrow followed by a burst of transactions
#[derive(Debug, Clone)]
pub struct FlashLoanDetector {
    window_secs: i64,
    amount: f64,
    follow_on_window_secs: i64,
    follow_on: usize,
}

impl FlashLoanDetector {
    pub const NAME: &'static str = "Flash Loan Attack Pattern";

    pub fn new(thresholds: &DetectionThresholds) -> Self {
        Self {
            window_secs: thresholds.window_secs,
            amount: thresholds.flash_loan_amount,
            follow_on_window_secs: thresholds.flash_loan_window_secs,
            follow_on: thresholds.flash_loan_follow_on,
        }
    }

    fn is_loan(kind: &str) -> bool {
        let kind = kind.to_lowercase();
        kind.contains("borrow") || kind.contains("loan")
    }
}

impl Detector for FlashLoanDetector {
    fn rule_id(&self) -> u32 {
        FLASH_LOAN_RULE
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<Finding> {
        let recent: Vec<_> = input
            .snapshot
            .transactions
            .iter()
            .filter(|tx| input.in_window(tx.timestamp, self.window_secs))
            .collect();

        for (i, loan) in recent.iter().enumerate() {
            if loan.amount <= self.amount || !Self::is_loan(&loan.kind) {
                continue;
            }

            let follow_on = recent[i + 1..]
                .iter()
                .filter(|tx| tx.timestamp - loan.timestamp < self.follow_on_window_secs)
                .count();

            if follow_on >= self.follow_on {
                return Some(Finding {
                    rule_id: FLASH_LOAN_RULE,
                    rule_name: Self::NAME.to_string(),
                    title: "Potential Flash Loan Attack Pattern".to_string(),
                    description: format!(
                        "Large loan of {} followed by {} rapid transactions - possible flash loan attack",
                        format_amount(loan.amount),
                        follow_on
                    ),
                    severity: Severity::Danger,
                    data: Evidence::FlashLoan {
                        loan_amount: loan.amount,
                        follow_on_count: follow_on,
                        loan_timestamp: loan.timestamp,
                    },
                });
            }
        }

        None
    }
}

/// Rule 6: ownership, role or permission changes
#[derive(Debug, Clone)]
pub struct OwnershipChangeDetector {
    window_secs: i64,
    keywords: Vec<String>,
}

impl OwnershipChangeDetector {
    pub const NAME: &'static str = "Ownership Change Alert";

    pub fn new(thresholds: &DetectionThresholds) -> Self {
        Self {
            window_secs: thresholds.window_secs,
            keywords: lowercase_all(&thresholds.ownership_keywords),
        }
    }
}

impl Detector for OwnershipChangeDetector {
    fn rule_id(&self) -> u32 {
        OWNERSHIP_CHANGE_RULE
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<Finding> {
        let event = input
            .snapshot
            .admin_events
            .iter()
            .filter(|event| input.in_window(event.timestamp, self.window_secs))
            .find(|event| {
                contains_any(&event.event_type.to_lowercase(), &self.keywords)
                    || contains_any(&event.function_name.to_lowercase(), &self.keywords)
            })?;

        let label = if event.event_type.is_empty() { "Unknown event" } else { event.event_type.as_str() };

        Some(Finding {
            rule_id: OWNERSHIP_CHANGE_RULE,
            rule_name: Self::NAME.to_string(),
            title: "Contract Ownership/Permission Change Detected".to_string(),
            description: format!("Ownership or permission change detected: {}", label),
            severity: Severity::Warning,
            data: Evidence::OwnershipChange {
                event_type: event.event_type.clone(),
                function_name: event.function_name.clone(),
                caller: event.caller.clone(),
                timestamp: event.timestamp,
                details: event.details.clone(),
            },
        })
    }
}

/// Rule 7: an adjacent price pair moved more than the configured ratio
#[derive(Debug, Clone)]
pub struct PriceManipulationDetector {
    window_secs: i64,
    change_ratio: f64,
}

impl PriceManipulationDetector {
    pub const NAME: &'static str = "Price Manipulation Alert";

    pub fn new(thresholds: &DetectionThresholds) -> Self {
        Self { window_secs: thresholds.window_secs, change_ratio: thresholds.price_change_ratio }
    }
}

impl Detector for PriceManipulationDetector {
    fn rule_id(&self) -> u32 {
        PRICE_MANIPULATION_RULE
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<Finding> {
        let mut recent: Vec<_> = input
            .snapshot
            .price_samples
            .iter()
            .filter(|sample| input.in_window(sample.timestamp, self.window_secs))
            .collect();

        if recent.len() < 2 {
            return None;
        }
        recent.sort_by_key(|sample| sample.timestamp);

        for pair in recent.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            if prev.price <= 0.0 {
                continue;
            }

            let change = (curr.price - prev.price).abs() / prev.price;
            if change <= self.change_ratio {
                continue;
            }

            let direction = if curr.price > prev.price {
                PriceDirection::Increased
            } else {
                PriceDirection::Decreased
            };

            return Some(Finding {
                rule_id: PRICE_MANIPULATION_RULE,
                rule_name: Self::NAME.to_string(),
                title: "Abnormal Price Change Detected".to_string(),
                description: format!(
                    "Price {} by {:.1}% in short timeframe - possible manipulation",
                    direction.as_str(),
                    change * 100.0
                ),
                severity: Severity::Warning,
                data: Evidence::PriceMove {
                    previous_price: prev.price,
                    current_price: curr.price,
                    change_ratio: change,
                    direction,
                    time_delta_secs: curr.timestamp - prev.timestamp,
                },
            });
        }

        None
    }
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_lowercase()).filter(|v| !v.is_empty()).collect()
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle.as_str()))
}

fn format_window(window_secs: i64) -> String {
    match window_secs {
        3600 => "hour".to_string(),
        s if s % 3600 == 0 => format!("{} hours", s / 3600),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{} seconds", s),
    }
}

/// `1500000.0` -> `1,500,000.00`
pub fn format_amount(amount: f64) -> String {
    let formatted = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac_part)
}
