use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::layout::OutputLayout;
use crate::core::merger;
use crate::core::stage::{StageRun, StageStatus};
use crate::modules::aquatone::{self, Screenshot};
use crate::modules::crawler::{self, CrawlSummary};
use crate::modules::dns::{self, DnsReport};
use crate::modules::httpx::{self, LiveHost};
use crate::modules::nmap::{self, PortScan};
use crate::modules::nuclei::{self, NucleiReport};
use crate::utils;

/// A report section either carries parsed findings or the reason it has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "camelCase")]
pub enum Section<T> {
    Available(T),
    Unavailable(String),
}

impl<T> Section<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            Section::Available(v) => Some(v),
            Section::Unavailable(_) => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Section::Available(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCounts {
    pub subdomains: usize,
    pub live_hosts: usize,
    pub urls: usize,
    pub open_ports: usize,
    pub vulnerabilities: usize,
    pub screenshots: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportModel {
    pub target: String,
    pub generated_at: DateTime<Utc>,
    pub stages: Vec<StageRun>,
    pub subdomains: Section<Vec<String>>,
    pub live_hosts: Section<Vec<LiveHost>>,
    pub crawl: Section<CrawlSummary>,
    pub ports: Section<PortScan>,
    pub vulnerabilities: Section<NucleiReport>,
    pub dns: Section<DnsReport>,
    pub screenshots: Section<Vec<Screenshot>>,
}

/// Decides whether a producer's artifact may be read.
///
/// With a status table, only `Completed` producers are parsed. Without one
/// (regenerating from a bare directory) whatever is on disk is used.
struct Gate<'a> {
    statuses: Option<&'a [StageRun]>,
}

impl Gate<'_> {
    fn check(&self, stage: &str, artifact: &std::path::Path) -> Option<String> {
        match self.statuses.and_then(|runs| runs.iter().find(|r| r.name == stage)) {
            Some(run) if run.status == StageStatus::Completed => None,
            Some(run) => Some(match run.reason {
                Some(ref reason) => format!("{} {}: {}", stage, run.status, reason),
                None => format!("{} {}", stage, run.status),
            }),
            None if utils::has_content(artifact) => None,
            None => Some("no data available".to_string()),
        }
    }

    fn section<T>(&self, stage: &str, artifact: &std::path::Path, parse: impl FnOnce() -> T) -> Section<T> {
        match self.check(stage, artifact) {
            Some(reason) => Section::Unavailable(reason),
            None => Section::Available(parse()),
        }
    }
}

impl ReportModel {
    pub fn build(
        layout: &OutputLayout,
        target: &str,
        statuses: Option<&[StageRun]>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let gate = Gate { statuses };

        let ports = match gate.check("nmap", &layout.nmap_xml()) {
            Some(reason) => Section::Unavailable(reason),
            None => match nmap::parse_nmap_xml(&layout.nmap_xml()) {
                Ok(scan) => Section::Available(scan),
                Err(e) => {
                    log::warn!("{}", e);
                    Section::Unavailable(e.to_string())
                }
            },
        };

        Self {
            target: target.to_string(),
            generated_at,
            stages: statuses.map(|s| s.to_vec()).unwrap_or_default(),
            subdomains: gate.section("subdomains", &layout.all_subdomains(), || {
                merger::merge_lines(&[layout.all_subdomains()])
            }),
            live_hosts: gate.section("httpx", &layout.httpx_results(), || {
                httpx::parse_httpx(&layout.httpx_results())
            }),
            crawl: gate.section("katana", &layout.katana(), || crawler::parse_katana(&layout.katana())),
            ports,
            vulnerabilities: gate.section("nuclei", &layout.nuclei_json(), || {
                nuclei::parse_nuclei(&layout.nuclei_json())
            }),
            dns: gate.section("dns", &layout.dns_dir(), || dns::parse_dns(layout, target)),
            screenshots: gate.section("aquatone", &layout.screenshots_dir(), || {
                aquatone::list_screenshots(layout)
            }),
        }
    }

    pub fn counts(&self) -> ReportCounts {
        ReportCounts {
            subdomains: self.subdomains.data().map_or(0, |s| s.len()),
            live_hosts: self.live_hosts.data().map_or(0, |h| h.len()),
            urls: self.crawl.data().map_or(0, |c| c.urls.len()),
            open_ports: self.ports.data().map_or(0, |p| p.open_port_count()),
            vulnerabilities: self.vulnerabilities.data().map_or(0, |v| v.findings.len()),
            screenshots: self.screenshots.data().map_or(0, |s| s.len()),
        }
    }
}
