use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

/// Display order is the declaration order: critical first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [Self::Critical, Self::High, Self::Medium, Self::Low, Self::Info];

    /// Unknown or missing severities count as `info`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("critical") => Self::Critical,
            Some("high") => Self::High,
            Some("medium") => Self::Medium,
            Some("low") => Self::Low,
            _ => Self::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(rename = "template-id", alias = "template_id", default)]
    template_id: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(rename = "matched-at", alias = "matched_at", default)]
    matched_at: Option<String>,
    #[serde(default)]
    info: RawInfo,
}

#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vulnerability {
    pub severity: Severity,
    pub template_id: String,
    pub name: String,
    pub host: String,
    pub matched_at: Option<String>,
    pub description: Option<String>,
}

/// Parses one JSONL line. Malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<Vulnerability> {
    let raw: RawFinding = serde_json::from_str(line.trim()).ok()?;
    let template_id = raw.template_id.unwrap_or_else(|| "unknown".to_string());
    Some(Vulnerability {
        severity: Severity::parse(raw.info.severity.as_deref()),
        name: raw.info.name.unwrap_or_else(|| template_id.clone()),
        template_id,
        host: raw.host.unwrap_or_else(|| "unknown".to_string()),
        matched_at: raw.matched_at,
        description: raw.info.description,
    })
}

/// Findings in discovery order plus per-severity counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NucleiReport {
    pub findings: Vec<Vulnerability>,
    pub skipped_lines: usize,
}

impl NucleiReport {
    pub fn counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Findings ordered critical → info; discovery order is kept within a severity.
    pub fn by_severity(&self) -> Vec<&Vulnerability> {
        let mut ordered: Vec<&Vulnerability> = self.findings.iter().collect();
        ordered.sort_by_key(|v| v.severity);
        ordered
    }
}

/// Parses a nuclei JSONL export. Each line is independent; malformed or
/// truncated lines are skipped.
pub fn parse_nuclei(path: &Path) -> NucleiReport {
    let mut report = NucleiReport::default();
    let Ok(bytes) = fs::read(path) else {
        return report;
    };
    let text = String::from_utf8_lossy(&bytes);

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match parse_line(line) {
            Some(v) => report.findings.push(v),
            None => report.skipped_lines += 1,
        }
    }

    if report.skipped_lines > 0 {
        debug!("{}: skipped {} malformed line(s)", path.display(), report.skipped_lines);
    }
    report
}

/// Plain-text summary written next to the JSONL export.
pub fn render_summary(domain: &str, report: &NucleiReport) -> String {
    let counts = report.counts();
    let mut out = String::new();
    out.push_str(&format!("VULNERABILITY SCAN SUMMARY FOR: {}\n", domain));
    out.push_str(&"=".repeat(60));
    out.push_str("\n\n");
    out.push_str(&format!("Total Issues Found: {}\n", report.findings.len()));
    for severity in Severity::ALL {
        let label = format!("{}:", capitalize(severity.as_str()));
        out.push_str(&format!("  {:<9} {}\n", label, counts.get(&severity).copied().unwrap_or(0)));
    }
    out.push('\n');
    out.push_str(&"=".repeat(60));
    out.push_str("\n\nDETAILED FINDINGS:\n\n");

    for v in report.by_severity() {
        out.push_str(&format!("[{}] {}\n", v.severity.as_str().to_uppercase(), v.name));
        out.push_str(&format!("  Template: {}\n", v.template_id));
        out.push_str(&format!("  Target: {}\n", v.host));
        if let Some(ref matched) = v.matched_at {
            out.push_str(&format!("  Matched: {}\n", matched));
        }
        if let Some(ref description) = v.description {
            out.push_str(&format!("  Description: {}\n", description));
        }
        out.push('\n');
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
