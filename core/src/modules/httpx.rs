use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Serialize;

use crate::utils;

/// One line of prober output: `<url> [200] [Title] [Nginx,PHP]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveHost {
    pub url: String,
    pub status_code: Option<u16>,
    pub technologies: Vec<String>,
}

fn bracket_pattern() -> Regex {
    Regex::new(r"\[([^\]]*)\]").expect("static bracket pattern")
}

fn parse_with(pattern: &Regex, line: &str) -> Option<LiveHost> {
    let line = line.trim();
    let url = line.split_whitespace().next()?.to_string();
    let annotations = &line[url.len()..];

    let mut status_code = None;
    let mut technologies = Vec::new();
    for cap in pattern.captures_iter(annotations) {
        let inner = cap[1].trim();
        if inner.is_empty() {
            continue;
        }
        if inner.chars().all(|c| c.is_ascii_digit()) {
            if status_code.is_none() {
                status_code = inner.parse().ok();
            }
        } else {
            technologies.push(inner.to_string());
        }
    }

    Some(LiveHost { url, status_code, technologies })
}

pub fn parse_httpx_line(line: &str) -> Option<LiveHost> {
    parse_with(&bracket_pattern(), line)
}

/// Parses an httpx result file. Missing or empty files yield no hosts.
pub fn parse_httpx(path: &Path) -> Vec<LiveHost> {
    let pattern = bracket_pattern();
    utils::read_lines(path)
        .unwrap_or_default()
        .iter()
        .filter_map(|line| parse_with(&pattern, line))
        .collect()
}

/// Number of hosts per status code; hosts without a code are not counted.
pub fn status_distribution(hosts: &[LiveHost]) -> BTreeMap<u16, usize> {
    let mut counts = BTreeMap::new();
    for code in hosts.iter().filter_map(|h| h.status_code) {
        *counts.entry(code).or_insert(0) += 1;
    }
    counts
}

/// Plain-text `httpx_summary.txt`: host count, status distribution, host list.
pub fn render_summary(domain: &str, hosts: &[LiveHost]) -> String {
    let mut out = format!("HTTP PROBING SUMMARY FOR: {}\n{}\n\n", domain, "=".repeat(60));
    out.push_str(&format!("Total Live Hosts: {}\n\n", hosts.len()));

    let distribution = status_distribution(hosts);
    if !distribution.is_empty() {
        out.push_str(&format!("Status Code Distribution:\n{}\n", "-".repeat(40)));
        for (code, count) in &distribution {
            out.push_str(&format!("  {}: {}\n", code, count));
        }
        out.push('\n');
    }

    out.push_str(&format!("Live Hosts:\n{}\n", "-".repeat(40)));
    for host in hosts {
        out.push_str(&format!("  {}\n", host.url));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parses_status_and_technologies() {
        let host = parse_httpx_line("https://app.ex.com [200] [Login Page] [Nginx,PHP]").unwrap();
        assert_eq!(host.url, "https://app.ex.com");
        assert_eq!(host.status_code, Some(200));
        assert_eq!(host.technologies, vec!["Login Page", "Nginx,PHP"]);
    }

    #[test]
    fn test_bare_url_line() {
        let host = parse_httpx_line("http://ex.com").unwrap();
        assert_eq!(host.status_code, None);
        assert!(host.technologies.is_empty());
    }

    #[test]
    fn test_file_parsing_and_distribution() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("httpx_results.txt");
        std::fs::write(&path, "https://a.ex.com [200]\nhttps://b.ex.com [301] [Redirect]\nhttps://c.ex.com [200]\n").unwrap();

        let hosts = parse_httpx(&path);
        assert_eq!(hosts.len(), 3);
        let dist = status_distribution(&hosts);
        assert_eq!(dist.get(&200), Some(&2));
        assert_eq!(dist.get(&301), Some(&1));
    }

    #[test]
    fn test_missing_file_yields_nothing() {
        let dir = tempdir().unwrap();
        assert!(parse_httpx(&dir.path().join("none.txt")).is_empty());
    }

    #[test]
    fn test_summary_lists_distribution_and_hosts() {
        let hosts: Vec<LiveHost> = ["https://a.ex.com [200]", "https://b.ex.com [404]", "https://c.ex.com [200] [Home]"]
            .iter()
            .filter_map(|l| parse_httpx_line(l))
            .collect();

        let text = render_summary("ex.com", &hosts);
        assert!(text.starts_with("HTTP PROBING SUMMARY FOR: ex.com\n"));
        assert!(text.contains("Total Live Hosts: 3\n"));
        assert!(text.contains("  200: 2\n  404: 1\n"));
        assert!(text.ends_with("  https://a.ex.com\n  https://b.ex.com\n  https://c.ex.com\n"));
    }

    #[test]
    fn test_summary_without_status_codes() {
        let hosts = vec![parse_httpx_line("http://ex.com").unwrap()];
        let text = render_summary("ex.com", &hosts);
        assert!(!text.contains("Status Code Distribution"));
        assert!(text.contains("Total Live Hosts: 1"));
    }
}
