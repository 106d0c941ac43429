pub mod html;
pub mod model;

use std::fs;
use std::path::Path;

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};

use crate::core::layout::OutputLayout;
use crate::core::stage::StageRun;
use crate::error::Result;
use crate::modules::{crawler, httpx, nmap, nuclei};

pub use model::{ReportCounts, ReportModel, Section};

/// Per-section row caps for the HTML report. Anything past a cap is replaced
/// by an "...and N more" line; the text summaries are never truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportLimits {
    pub subdomains: usize,
    pub live_hosts: usize,
    pub urls: usize,
    pub dns_records: usize,
    /// Hosts, not ports.
    pub ports: usize,
    pub vulnerabilities: usize,
    pub screenshots: usize,
}

impl ReportLimits {
    pub const DEFAULT: ReportLimits = ReportLimits {
        subdomains: 500,
        live_hosts: 500,
        urls: 1000,
        dns_records: 200,
        ports: 200,
        vulnerabilities: 500,
        screenshots: 100,
    };
}

impl Default for ReportLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Builds the model from the output directory, writes `report.html` and the
/// plain-text summaries for the sections that have data.
pub fn generate_report(
    layout: &OutputLayout,
    target: &str,
    statuses: Option<&[StageRun]>,
    limits: &ReportLimits,
) -> Result<ReportModel> {
    let model = ReportModel::build(layout, target, statuses, Utc::now());

    if let Section::Available(ref hosts) = model.live_hosts {
        write_atomic(&layout.httpx_summary(), &httpx::render_summary(target, hosts))?;
    }
    if let Section::Available(ref crawl) = model.crawl {
        write_atomic(&layout.katana_summary(), &crawler::render_summary(target, crawl))?;
    }
    if let Section::Available(ref scan) = model.ports {
        write_atomic(&layout.port_summary(), &nmap::render_port_summary(target, scan))?;
    }
    if let Section::Available(ref report) = model.vulnerabilities {
        write_atomic(&layout.nuclei_summary(), &nuclei::render_summary(target, report))?;
    }

    write_atomic(&layout.report(), &html::render(&model, limits))?;
    info!("report written to {}", layout.report().display());
    Ok(model)
}
