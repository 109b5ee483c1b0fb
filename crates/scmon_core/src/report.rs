use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Synthetic service identifier for findings that concern the catalog as a whole.
pub const GENERAL_SERVICE: &str = "general";

/// Finding level. Declaration order doubles as the serialized key order, so
/// it must stay alphabetical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Success,
    Warn,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Success => "success",
            Severity::Warn => "warn",
        }
    }
}

pub type ServiceFindings = BTreeMap<Severity, Vec<String>>;

/// Pass/fail outcome of one named check against one service, kept for
/// per-check metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub service: Option<String>,
    pub check: String,
    pub failed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub error: usize,
    pub warn: usize,
    pub success: usize,
}

impl SeverityCounts {
    pub fn from_findings(findings: Option<&ServiceFindings>) -> Self {
        let len = |severity: Severity| {
            findings
                .and_then(|f| f.get(&severity))
                .map_or(0, Vec::len)
        };
        Self {
            error: len(Severity::Error),
            warn: len(Severity::Warn),
            success: len(Severity::Success),
        }
    }
}

/// Accumulates findings for a single run. Every check receives it by `&mut`
/// and only ever appends.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    findings: BTreeMap<String, ServiceFindings>,
    checks: Vec<CheckRecord>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        severity: Severity,
        check: &str,
        service: &str,
        message: impl Into<String>,
    ) {
        let message = message.into();
        debug!(
            target: "scmon.validate",
            check,
            service,
            severity = severity.as_str(),
            %message,
            "finding recorded"
        );
        self.findings
            .entry(service.to_owned())
            .or_default()
            .entry(severity)
            .or_default()
            .push(message);
    }

    pub fn error(&mut self, check: &str, service: &str, message: impl Into<String>) {
        self.record(Severity::Error, check, service, message);
    }

    pub fn warn(&mut self, check: &str, service: &str, message: impl Into<String>) {
        self.record(Severity::Warn, check, service, message);
    }

    pub fn success(&mut self, check: &str, service: &str, message: impl Into<String>) {
        self.record(Severity::Success, check, service, message);
    }

    pub fn record_check(&mut self, service: Option<&str>, check: &str, failed: bool) {
        self.checks.push(CheckRecord {
            service: service.map(str::to_owned),
            check: check.to_owned(),
            failed,
        });
    }

    pub fn messages(&self, service: &str, severity: Severity) -> &[String] {
        self.findings
            .get(service)
            .and_then(|f| f.get(&severity))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn counts(&self, service: &str) -> SeverityCounts {
        SeverityCounts::from_findings(self.findings.get(service))
    }

    pub fn total(&self, severity: Severity) -> usize {
        self.findings
            .values()
            .filter_map(|f| f.get(&severity))
            .map(Vec::len)
            .sum()
    }

    pub fn findings(&self) -> &BTreeMap<String, ServiceFindings> {
        &self.findings
    }

    pub fn checks(&self) -> &[CheckRecord] {
        &self.checks
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: String,
    pub timestamp: String,
    pub status: ReportStatus,
    pub results: BTreeMap<String, ServiceFindings>,
    #[serde(default)]
    pub checks: Vec<CheckRecord>,
}

impl RunReport {
    pub fn new(id: impl Into<String>, result: ValidationResult) -> Self {
        let status = summarize(&result);
        Self {
            id: id.into(),
            timestamp: Utc::now().to_rfc3339(),
            status,
            results: result.findings,
            checks: result.checks,
        }
    }

    pub fn counts(&self, service: &str) -> SeverityCounts {
        SeverityCounts::from_findings(self.results.get(service))
    }

    pub fn totals(&self) -> SeverityCounts {
        self.results
            .values()
            .map(|f| SeverityCounts::from_findings(Some(f)))
            .fold(SeverityCounts::default(), |acc, c| SeverityCounts {
                error: acc.error + c.error,
                warn: acc.warn + c.warn,
                success: acc.success + c.success,
            })
    }
}

fn summarize(result: &ValidationResult) -> ReportStatus {
    if result.total(Severity::Error) > 0 {
        ReportStatus::Fail
    } else if result.total(Severity::Warn) > 0 {
        ReportStatus::Warn
    } else {
        ReportStatus::Pass
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pass,
    Fail,
    Warn,
}
