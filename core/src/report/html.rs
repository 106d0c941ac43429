/// Self-contained HTML report renderer.
///
/// Produces a single .html file with embedded CSS and relative links into the
/// output directory. All dynamic text goes through `HtmlWriter::text`, which
/// escapes; markup can only be emitted from `&'static str`.

use std::fmt::Display;

use crate::core::stage::StageStatus;
use crate::modules::crawler::CrawlSummary;
use crate::modules::dns::DnsReport;
use crate::modules::httpx::{self, LiveHost};
use crate::modules::nmap::PortScan;
use crate::modules::nuclei::{NucleiReport, Severity};

use super::model::{ReportModel, Section};
use super::ReportLimits;

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Default)]
pub struct HtmlWriter {
    buf: String,
}

impl HtmlWriter {
    pub fn raw(&mut self, markup: &'static str) -> &mut Self {
        self.buf.push_str(markup);
        self
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        self.buf.push_str(&escape(text));
        self
    }

    pub fn value(&mut self, v: impl Display) -> &mut Self {
        self.text(&v.to_string())
    }

    pub fn finish(self) -> String {
        self.buf
    }

    fn section_start(&mut self, title: &'static str, badge: Option<String>) -> &mut Self {
        self.raw("<div class=\"panel\">\n<div class=\"panel-header\">").raw(title);
        if let Some(badge) = badge {
            self.raw(" <span class=\"badge\">").text(&badge).raw("</span>");
        }
        self.raw("</div>\n")
    }

    fn section_end(&mut self) -> &mut Self {
        self.raw("</div>\n")
    }

    fn empty(&mut self, message: &str) -> &mut Self {
        self.raw("<div class=\"empty\">").text(message).raw("</div>\n")
    }

    fn more(&mut self, hidden: usize) -> &mut Self {
        if hidden > 0 {
            self.raw("<div class=\"more\">...and ").value(hidden).raw(" more</div>\n");
        }
        self
    }
}

/// First `cap` items plus the number left out.
fn capped<T>(items: &[T], cap: usize) -> (&[T], usize) {
    let shown = items.len().min(cap);
    (&items[..shown], items.len() - shown)
}

const STYLE: &str = r#"<style>
* { margin: 0; padding: 0; box-sizing: border-box; }
body { background: #0a0a0c; color: #e1e1e6; font-family: 'Inter', system-ui, sans-serif; padding: 2rem; }
.header { display: flex; align-items: center; gap: 1rem; margin-bottom: 2rem; }
.header h1 { font-size: 1.5rem; font-weight: 700; }
.meta { display: grid; grid-template-columns: repeat(auto-fill, minmax(180px, 1fr)); gap: 1rem; margin-bottom: 2rem; }
.meta-card { background: rgba(255,255,255,0.035); border: 1px solid rgba(255,255,255,0.08); border-radius: 12px; padding: 1.25rem; }
.meta-card .label { font-size: 0.7rem; text-transform: uppercase; letter-spacing: 0.08em; color: #64647a; margin-bottom: 0.5rem; }
.meta-card .value { font-size: 1.5rem; font-weight: 700; font-family: 'JetBrains Mono', monospace; color: #00d5be; }
.panel { background: rgba(255,255,255,0.02); border: 1px solid rgba(255,255,255,0.08); border-radius: 12px; overflow: hidden; margin-bottom: 2rem; }
.panel-header { padding: 1rem 1.25rem; border-bottom: 1px solid rgba(255,255,255,0.08); font-weight: 600; font-size: 0.85rem; }
.badge { background: rgba(0,213,190,0.1); color: #00d5be; padding: 0.15rem 0.6rem; border-radius: 6px; font-size: 0.7rem; font-weight: 600; }
table { width: 100%; border-collapse: collapse; font-size: 0.85rem; }
thead th { text-align: left; padding: 0.6rem 1rem; border-bottom: 1px solid rgba(255,255,255,0.08); color: #64647a; font-size: 0.7rem; text-transform: uppercase; letter-spacing: 0.08em; }
tbody td { padding: 0.6rem 1rem; border-bottom: 1px solid rgba(255,255,255,0.04); vertical-align: top; }
.mono, pre { font-family: 'JetBrains Mono', monospace; font-size: 0.8rem; }
pre { padding: 1rem 1.25rem; white-space: pre-wrap; word-break: break-all; }
.empty, .more { padding: 1rem 1.25rem; color: #64647a; }
.sev { padding: 0.15rem 0.5rem; border-radius: 9999px; font-size: 0.7rem; font-weight: 700; text-transform: uppercase; }
.sev-critical { background: rgba(244,63,94,0.15); color: #f43f5e; }
.sev-high { background: rgba(249,115,22,0.15); color: #f97316; }
.sev-medium { background: rgba(234,179,8,0.15); color: #eab308; }
.sev-low { background: rgba(59,130,246,0.15); color: #3b82f6; }
.sev-info { background: rgba(148,148,158,0.15); color: #94949e; }
.st-Completed { color: #10b981; } .st-Failed, .st-TimedOut { color: #f43f5e; } .st-Running, .st-Pending { color: #eab308; }
.gallery { display: grid; grid-template-columns: repeat(auto-fill, minmax(220px, 1fr)); gap: 1rem; padding: 1rem 1.25rem; }
.gallery img { width: 100%; border-radius: 6px; }
.gallery p { font-size: 0.7rem; color: #94949e; word-break: break-all; }
</style>"#;

fn severity_class(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "sev sev-critical",
        Severity::High => "sev sev-high",
        Severity::Medium => "sev sev-medium",
        Severity::Low => "sev sev-low",
        Severity::Info => "sev sev-info",
    }
}

fn status_class(s: StageStatus) -> &'static str {
    match s {
        StageStatus::Pending => "st-Pending",
        StageStatus::Running => "st-Running",
        StageStatus::Completed => "st-Completed",
        StageStatus::Failed => "st-Failed",
        StageStatus::TimedOut => "st-TimedOut",
    }
}

/// Renders the report. The output depends only on `model` and `limits`.
pub fn render(model: &ReportModel, limits: &ReportLimits) -> String {
    let mut w = HtmlWriter::default();
    let counts = model.counts();

    w.raw("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n")
        .raw("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n<title>Recon Report: ")
        .text(&model.target)
        .raw("</title>\n")
        .raw(STYLE)
        .raw("\n</head>\n<body>\n<div class=\"header\"><h1>Recon Report: ")
        .text(&model.target)
        .raw("</h1><span class=\"badge\">")
        .text(&model.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .raw("</span></div>\n<div class=\"meta\">\n");

    for (label, value) in [
        ("Subdomains", counts.subdomains),
        ("Live Hosts", counts.live_hosts),
        ("Crawled URLs", counts.urls),
        ("Open Ports", counts.open_ports),
        ("Vulnerabilities", counts.vulnerabilities),
        ("Screenshots", counts.screenshots),
    ] {
        w.raw("<div class=\"meta-card\"><div class=\"label\">")
            .text(label)
            .raw("</div><div class=\"value\">")
            .value(value)
            .raw("</div></div>\n");
    }
    w.raw("</div>\n");

    render_stages(&mut w, model);
    render_lines(&mut w, "Subdomains", &model.subdomains, limits.subdomains);
    render_live_hosts(&mut w, &model.live_hosts, limits.live_hosts);
    render_dns(&mut w, &model.dns, limits.dns_records);
    render_ports(&mut w, &model.ports, limits.ports);
    render_vulnerabilities(&mut w, &model.vulnerabilities, limits.vulnerabilities);
    render_screenshots(&mut w, model, limits.screenshots);
    render_crawl(&mut w, &model.crawl, limits.urls);

    w.raw("</body>\n</html>\n");
    w.finish()
}

fn render_stages(w: &mut HtmlWriter, model: &ReportModel) {
    if model.stages.is_empty() {
        return;
    }
    w.section_start("Pipeline Stages", None)
        .raw("<table><thead><tr><th>Stage</th><th>Status</th><th>Started</th><th>Finished</th><th>Detail</th></tr></thead><tbody>\n");
    for run in &model.stages {
        let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| t.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default();
        w.raw("<tr><td class=\"mono\">")
            .text(&run.name)
            .raw("</td><td class=\"")
            .raw(status_class(run.status))
            .raw("\">")
            .value(run.status)
            .raw("</td><td>")
            .text(&fmt(run.started_at))
            .raw("</td><td>")
            .text(&fmt(run.finished_at))
            .raw("</td><td>")
            .text(run.reason.as_deref().unwrap_or(""))
            .raw("</td></tr>\n");
    }
    w.raw("</tbody></table>\n").section_end();
}

fn render_lines(w: &mut HtmlWriter, title: &'static str, section: &Section<Vec<String>>, cap: usize) {
    match section {
        Section::Unavailable(reason) => {
            w.section_start(title, None).empty(reason);
        }
        Section::Available(lines) => {
            w.section_start(title, Some(format!("{} found", lines.len())));
            if lines.is_empty() {
                w.empty("Nothing found");
            } else {
                let (shown, hidden) = capped(lines, cap);
                w.raw("<pre>");
                for line in shown {
                    w.text(line).raw("\n");
                }
                w.raw("</pre>\n").more(hidden);
            }
        }
    }
    w.section_end();
}

fn render_live_hosts(w: &mut HtmlWriter, section: &Section<Vec<LiveHost>>, cap: usize) {
    let hosts = match section {
        Section::Unavailable(reason) => {
            w.section_start("Live Hosts", None).empty(reason).section_end();
            return;
        }
        Section::Available(hosts) => hosts,
    };

    w.section_start("Live Hosts", Some(format!("{} responding", hosts.len())));
    if hosts.is_empty() {
        w.empty("No live hosts").section_end();
        return;
    }

    let distribution = httpx::status_distribution(hosts);
    if !distribution.is_empty() {
        w.raw("<div class=\"more\">");
        for (code, count) in &distribution {
            w.raw("<span class=\"badge\">").value(code).raw(": ").value(count).raw("</span> ");
        }
        w.raw("</div>\n");
    }

    let (shown, hidden) = capped(hosts, cap);
    w.raw("<table><thead><tr><th>URL</th><th>Status</th><th>Annotations</th></tr></thead><tbody>\n");
    for host in shown {
        w.raw("<tr><td class=\"mono\">")
            .text(&host.url)
            .raw("</td><td>")
            .text(&host.status_code.map(|c| c.to_string()).unwrap_or_default())
            .raw("</td><td>")
            .text(&host.technologies.join(" | "))
            .raw("</td></tr>\n");
    }
    w.raw("</tbody></table>\n").more(hidden).section_end();
}

fn render_dns(w: &mut HtmlWriter, section: &Section<DnsReport>, cap: usize) {
    let report = match section {
        Section::Unavailable(reason) => {
            w.section_start("DNS Records", None).empty(reason).section_end();
            return;
        }
        Section::Available(report) => report,
    };

    w.section_start("DNS Records", Some(format!("{} records", report.records.len())));
    if report.records.is_empty() {
        w.empty("No DNS records");
    } else {
        let (shown, hidden) = capped(&report.records, cap);
        w.raw("<table><thead><tr><th>Type</th><th>Name</th><th>Value</th></tr></thead><tbody>\n");
        for r in shown {
            w.raw("<tr><td>")
                .text(&r.record_type)
                .raw("</td><td class=\"mono\">")
                .text(&r.target)
                .raw("</td><td class=\"mono\">")
                .text(&r.value)
                .raw("</td></tr>\n");
        }
        w.raw("</tbody></table>\n").more(hidden);
    }
    w.section_end();

    for (title, lines) in [
        ("Zone Transfer Attempt", &report.zone_transfer),
        ("DNS Misconfigurations", &report.misconfig),
    ] {
        w.section_start(title, None);
        if lines.is_empty() {
            w.empty("No data");
        } else {
            let (shown, hidden) = capped(lines, cap);
            w.raw("<pre>");
            for line in shown {
                w.text(line).raw("\n");
            }
            w.raw("</pre>\n").more(hidden);
        }
        w.section_end();
    }
}

fn render_ports(w: &mut HtmlWriter, section: &Section<PortScan>, cap: usize) {
    let scan = match section {
        Section::Unavailable(reason) => {
            w.section_start("Open Ports", None).empty(reason).section_end();
            return;
        }
        Section::Available(scan) => scan,
    };

    w.section_start("Open Ports", Some(format!("{} open", scan.open_port_count())));
    if scan.hosts.is_empty() {
        w.empty("No hosts scanned");
    } else {
        let (shown, hidden) = capped(&scan.hosts, cap);
        w.raw("<table><thead><tr><th>Host</th><th>Port</th><th>Service</th><th>Version</th></tr></thead><tbody>\n");
        for host in shown {
            let label = match host.hostnames.first() {
                Some(name) => format!("{} ({})", host.address, name),
                None => host.address.clone(),
            };
            if host.open_ports.is_empty() {
                w.raw("<tr><td class=\"mono\">").text(&label).raw("</td><td colspan=\"3\">No open ports</td></tr>\n");
            }
            for p in &host.open_ports {
                w.raw("<tr><td class=\"mono\">")
                    .text(&label)
                    .raw("</td><td>")
                    .text(&format!("{}/{}", p.port, p.protocol))
                    .raw("</td><td>")
                    .text(&p.service)
                    .raw("</td><td>")
                    .text(&p.version_string())
                    .raw("</td></tr>\n");
            }
        }
        w.raw("</tbody></table>\n").more(hidden);
    }
    if scan.truncated {
        w.empty("Scan output was incomplete; only finished hosts are shown.");
    }
    w.section_end();
}

fn render_vulnerabilities(w: &mut HtmlWriter, section: &Section<NucleiReport>, cap: usize) {
    let report = match section {
        Section::Unavailable(reason) => {
            w.section_start("Vulnerabilities", None).empty(reason).section_end();
            return;
        }
        Section::Available(report) => report,
    };

    w.section_start("Vulnerabilities", Some(format!("{} findings", report.findings.len())));
    let counts = report.counts();
    w.raw("<div class=\"more\">");
    for severity in Severity::ALL {
        w.raw("<span class=\"")
            .raw(severity_class(severity))
            .raw("\">")
            .text(severity.as_str())
            .raw(" ")
            .value(counts.get(&severity).copied().unwrap_or(0))
            .raw("</span> ");
    }
    w.raw("</div>\n");

    if report.findings.is_empty() {
        w.empty("No vulnerabilities found").section_end();
        return;
    }

    let ordered = report.by_severity();
    let (shown, hidden) = capped(&ordered, cap);
    w.raw("<table><thead><tr><th>Severity</th><th>Template</th><th>Name</th><th>Matched</th></tr></thead><tbody>\n");
    for v in shown {
        w.raw("<tr><td><span class=\"")
            .raw(severity_class(v.severity))
            .raw("\">")
            .text(v.severity.as_str())
            .raw("</span></td><td class=\"mono\">")
            .text(&v.template_id)
            .raw("</td><td>")
            .text(&v.name)
            .raw("</td><td class=\"mono\">")
            .text(v.matched_at.as_deref().unwrap_or(&v.host))
            .raw("</td></tr>\n");
    }
    w.raw("</tbody></table>\n").more(hidden).section_end();
}

fn render_screenshots(w: &mut HtmlWriter, model: &ReportModel, cap: usize) {
    let shots = match &model.screenshots {
        Section::Unavailable(reason) => {
            w.section_start("Screenshots", None).empty(reason).section_end();
            return;
        }
        Section::Available(shots) => shots,
    };

    w.section_start("Screenshots", Some(format!("{} captured", shots.len())));
    if shots.is_empty() {
        w.empty("No screenshots captured").section_end();
        return;
    }
    let (shown, hidden) = capped(shots, cap);
    w.raw("<div class=\"gallery\">\n");
    for shot in shown {
        w.raw("<div><a href=\"")
            .text(&shot.path)
            .raw("\" target=\"_blank\"><img src=\"")
            .text(&shot.thumbnail)
            .raw("\" alt=\"")
            .text(&shot.filename)
            .raw("\" loading=\"lazy\"></a><p>")
            .text(&shot.filename)
            .raw("</p></div>\n");
    }
    w.raw("</div>\n").more(hidden).section_end();
}

fn render_crawl(w: &mut HtmlWriter, section: &Section<CrawlSummary>, cap: usize) {
    let crawl = match section {
        Section::Unavailable(reason) => {
            w.section_start("Crawled URLs", None).empty(reason).section_end();
            return;
        }
        Section::Available(crawl) => crawl,
    };

    w.section_start(
        "Crawled URLs",
        Some(format!(
            "{} URLs, {} endpoints, {} parameters",
            crawl.urls.len(),
            crawl.endpoints.len(),
            crawl.parameters.len()
        )),
    );
    if crawl.urls.is_empty() {
        w.empty("Nothing crawled").section_end();
        return;
    }

    if !crawl.parameters.is_empty() {
        w.raw("<div class=\"more\">Parameters: <span class=\"mono\">");
        let names: Vec<&str> = crawl.parameters.iter().map(String::as_str).collect();
        w.text(&names.join(", ")).raw("</span></div>\n");
    }

    let (shown, hidden) = capped(&crawl.urls, cap);
    w.raw("<table><thead><tr><th>Kind</th><th>URL</th></tr></thead><tbody>\n");
    for u in shown {
        w.raw("<tr><td>")
            .value(format!("{:?}", u.kind))
            .raw("</td><td class=\"mono\">")
            .text(&u.url)
            .raw("</td></tr>\n");
    }
    w.raw("</tbody></table>\n").more(hidden).section_end();
}
