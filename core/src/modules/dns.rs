use std::path::Path;

use serde::Serialize;

use crate::core::layout::OutputLayout;
use crate::utils;

/// One `(recordType, target, value)` tuple from `dns/records.txt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsRecord {
    pub record_type: String,
    pub target: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DnsReport {
    pub records: Vec<DnsRecord>,
    pub zone_transfer: Vec<String>,
    pub misconfig: Vec<String>,
}

impl DnsReport {
    pub fn zone_transfer_possible(&self) -> bool {
        self.zone_transfer
            .iter()
            .any(|l| l.to_lowercase().contains("zone transfer successful"))
    }

    /// Lines of the misconfiguration check flagged with `[!]`.
    pub fn warnings(&self) -> impl Iterator<Item = &String> {
        self.misconfig.iter().filter(|l| l.starts_with("[!]"))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.zone_transfer.is_empty() && self.misconfig.is_empty()
    }
}

fn is_separator(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c == '-' || c == '=')
}

/// Parses the record listing:
///
/// ```text
/// DNS RECORDS FOR: example.com
/// ====
/// A Records:
/// ----
///   93.184.216.34
/// ```
///
/// Lines before the first section header and `[!]` diagnostics are ignored.
pub fn parse_records(path: &Path, default_target: &str) -> Vec<DnsRecord> {
    let mut target = default_target.to_string();
    let mut current: Option<String> = None;
    let mut records = Vec::new();

    for line in utils::read_lines(path).unwrap_or_default() {
        if is_separator(&line) {
            continue;
        }
        if let Some(rest) = line.strip_prefix("DNS RECORDS FOR:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                target = rest.to_string();
            }
            continue;
        }
        if let Some(kind) = line.strip_suffix(" Records:") {
            current = Some(kind.trim().to_uppercase());
            continue;
        }
        if line.starts_with("[!]") {
            continue;
        }
        if let Some(ref kind) = current {
            records.push(DnsRecord {
                record_type: kind.clone(),
                target: target.clone(),
                value: line,
            });
        }
    }
    records
}

/// Free-form check output with the title banner and rulers removed.
pub fn parse_notes(path: &Path) -> Vec<String> {
    utils::read_lines(path)
        .unwrap_or_default()
        .into_iter()
        .filter(|l| !is_separator(l))
        .skip_while(|l| l.contains(" FOR: "))
        .collect()
}

pub fn parse_dns(layout: &OutputLayout, domain: &str) -> DnsReport {
    DnsReport {
        records: parse_records(&layout.dns_records(), domain),
        zone_transfer: parse_notes(&layout.dns_zone_attempt()),
        misconfig: parse_notes(&layout.dns_misconfig()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const RECORDS: &str = "DNS RECORDS FOR: ex.com
============================================================

A Records:
----------------------------------------
  93.184.216.34

MX Records:
----------------------------------------
  10 mail.ex.com.
  20 backup.ex.com.

CNAME Records:
----------------------------------------
  [!] No CNAME records found

";

    #[test]
    fn test_records_grouped_by_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.txt");
        fs::write(&path, RECORDS).unwrap();

        let records = parse_records(&path, "fallback.com");
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0],
            DnsRecord {
                record_type: "A".into(),
                target: "ex.com".into(),
                value: "93.184.216.34".into(),
            }
        );
        assert_eq!(records[2].record_type, "MX");
        assert_eq!(records[2].value, "20 backup.ex.com.");
    }

    #[test]
    fn test_notes_drop_banner() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        fs::create_dir_all(layout.dns_dir()).unwrap();
        fs::write(
            layout.dns_zone_attempt(),
            "ZONE TRANSFER ATTEMPT FOR: ex.com\n=====\n\n[!] Zone transfer successful from ns1.ex.com!\n",
        )
        .unwrap();
        fs::write(
            layout.dns_misconfig(),
            "DNS MISCONFIGURATION CHECK FOR: ex.com\n====\nSPF Record Check:\n----\n[!] No SPF record found\n",
        )
        .unwrap();

        let report = parse_dns(&layout, "ex.com");
        assert!(report.records.is_empty());
        assert!(report.zone_transfer_possible());
        assert_eq!(report.misconfig, vec!["SPF Record Check:", "[!] No SPF record found"]);
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_missing_files_are_empty() {
        let dir = tempdir().unwrap();
        assert!(parse_dns(&OutputLayout::new(dir.path()), "ex.com").is_empty());
    }
}
