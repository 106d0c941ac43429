use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::Serialize;

use crate::utils;

const API_MARKERS: &[&str] = &["/api/", "/v1/", "/v2/"];
const API_SUFFIXES: &[&str] = &[".json", ".xml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UrlKind {
    Script,
    Api,
    Page,
}

/// One crawled URL broken into its canonical endpoint and query parameter names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawledUrl {
    pub url: String,
    pub endpoint: String,
    pub kind: UrlKind,
    pub parameters: Vec<String>,
}

/// Classifies a URL by its path. The path without query string is the
/// canonical endpoint.
pub fn classify_url(url: &str) -> CrawledUrl {
    let url = url.trim();
    let (endpoint, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    let endpoint = endpoint.split('#').next().unwrap_or(endpoint);
    let lowered = endpoint.to_lowercase();

    let kind = if lowered.ends_with(".js") {
        UrlKind::Script
    } else if API_MARKERS.iter().any(|m| lowered.contains(m)) || API_SUFFIXES.iter().any(|s| lowered.ends_with(s)) {
        UrlKind::Api
    } else {
        UrlKind::Page
    };

    let mut parameters = Vec::new();
    if let Some(query) = query {
        let query = query.split('#').next().unwrap_or(query);
        for pair in query.split('&') {
            if let Some((key, _)) = pair.split_once('=') {
                let key = key.trim();
                if !key.is_empty() && !parameters.iter().any(|p| p == key) {
                    parameters.push(key.to_string());
                }
            }
        }
    }

    CrawledUrl {
        url: url.to_string(),
        endpoint: endpoint.to_string(),
        kind,
        parameters,
    }
}

/// Aggregate view of one crawl artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    /// Distinct URLs, in discovery order.
    pub urls: Vec<CrawledUrl>,
    pub endpoints: BTreeSet<String>,
    pub parameters: BTreeSet<String>,
}

impl CrawlSummary {
    pub fn scripts(&self) -> impl Iterator<Item = &CrawledUrl> {
        self.urls.iter().filter(|u| u.kind == UrlKind::Script)
    }

    pub fn api_endpoints(&self) -> impl Iterator<Item = &CrawledUrl> {
        self.urls.iter().filter(|u| u.kind == UrlKind::Api)
    }
}

pub fn summarize<I, S>(urls: I) -> CrawlSummary
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut summary = CrawlSummary::default();
    let mut seen = HashSet::new();

    for raw in urls {
        let raw = raw.as_ref().trim();
        if raw.is_empty() || !seen.insert(raw.to_string()) {
            continue;
        }
        let crawled = classify_url(raw);
        summary.endpoints.insert(crawled.endpoint.clone());
        summary.parameters.extend(crawled.parameters.iter().cloned());
        summary.urls.push(crawled);
    }

    summary
}

/// Parses a katana output file (one URL per line).
pub fn parse_katana(path: &Path) -> CrawlSummary {
    summarize(utils::read_lines(path).unwrap_or_default())
}

fn push_list<'a>(out: &mut String, title: &str, items: impl Iterator<Item = &'a str>) {
    let items: Vec<&str> = items.collect();
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("{}:\n{}\n", title, "-".repeat(40)));
    for item in items {
        out.push_str(&format!("  {}\n", item));
    }
    out.push('\n');
}

/// Plain-text `katana_summary.txt`.
pub fn render_summary(domain: &str, summary: &CrawlSummary) -> String {
    let mut out = format!("WEB CRAWLING SUMMARY FOR: {}\n{}\n\n", domain, "=".repeat(60));
    out.push_str(&format!("Total URLs Discovered: {}\n", summary.urls.len()));
    out.push_str(&format!("Unique Endpoints: {}\n", summary.endpoints.len()));
    out.push_str(&format!("Parameters Found: {}\n", summary.parameters.len()));
    out.push_str(&format!("JavaScript Files: {}\n", summary.scripts().count()));
    out.push_str(&format!("API Endpoints: {}\n", summary.api_endpoints().count()));
    out.push_str(&format!("\n{}\n\n", "=".repeat(60)));

    push_list(&mut out, "Discovered Parameters", summary.parameters.iter().map(String::as_str));
    push_list(&mut out, "JavaScript Files", summary.scripts().map(|u| u.url.as_str()));
    push_list(&mut out, "API Endpoints", summary.api_endpoints().map(|u| u.url.as_str()));
    out
}
