use std::time::Duration;

use crate::core::layout::OutputLayout;
use crate::core::stage::{CommandSpec, InternalTask, MergeSource, Stage, SuccessPolicy};
use crate::core::target::Target;

pub const ENUMERATORS: &[&str] = &["amass", "subfinder", "assetfinder"];
pub const REPORT_STAGE: &str = "report";

const ENUM_TIMEOUT: u64 = 600;
const HTTPX_TIMEOUT: u64 = 600;
const KATANA_TIMEOUT: u64 = 1800;
const NUCLEI_TIMEOUT: u64 = 3600;
const AQUATONE_TIMEOUT: u64 = 1800;
const DNS_TIMEOUT: u64 = 600;
const NMAP_TIMEOUT: u64 = 1800;

/// Builds the static stage catalog for one run.
///
/// `timeout_override` replaces every per-stage default when set.
pub fn build_catalog(target: &Target, layout: &OutputLayout, timeout_override: Option<u64>) -> Vec<Stage> {
    let budget = |default: u64| Duration::from_secs(timeout_override.unwrap_or(default));
    let domain = target.as_str();

    let amass_out = layout.raw_subdomains("amass");
    let subfinder_out = layout.raw_subdomains("subfinder");
    // assetfinder only prints to stdout, so its log is the artifact.
    let assetfinder_out = layout.stage_log("assetfinder");

    let amass = Stage::external(
        "amass",
        CommandSpec::new("amass")
            .arg("enum")
            .arg("-passive")
            .arg("-d")
            .arg(domain)
            .arg("-o")
            .path_arg(&amass_out),
        SuccessPolicy::Either,
        budget(ENUM_TIMEOUT),
    )
    .writes(&[amass_out.clone()]);

    let subfinder = Stage::external(
        "subfinder",
        CommandSpec::new("subfinder")
            .arg("-d")
            .arg(domain)
            .arg("-silent")
            .arg("-o")
            .path_arg(&subfinder_out),
        SuccessPolicy::Either,
        budget(ENUM_TIMEOUT),
    )
    .writes(&[subfinder_out.clone()]);

    let assetfinder = Stage::external(
        "assetfinder",
        CommandSpec::new("assetfinder").arg("--subs-only").arg(domain),
        SuccessPolicy::ExitCode,
        budget(ENUM_TIMEOUT),
    )
    .writes(&[assetfinder_out.clone()]);

    let subdomains = Stage::internal(
        "subdomains",
        InternalTask::MergeSubdomains {
            sources: vec![
                MergeSource { path: amass_out.clone(), require_dot: false },
                MergeSource { path: subfinder_out.clone(), require_dot: false },
                MergeSource { path: assetfinder_out.clone(), require_dot: true },
            ],
            destination: layout.all_subdomains(),
        },
    )
    .after(ENUMERATORS)
    .reads(&[amass_out, subfinder_out, assetfinder_out])
    .writes(&[layout.all_subdomains()]);

    let httpx = Stage::external(
        "httpx",
        CommandSpec::new("httpx")
            .arg("-l")
            .path_arg(&layout.all_subdomains())
            .arg("-o")
            .path_arg(&layout.httpx_results())
            .arg("-silent")
            .arg("-no-color")
            .arg("-status-code")
            .arg("-title")
            .arg("-tech-detect")
            .arg("-follow-redirects")
            .arg("-timeout")
            .arg("10")
            .arg("-retries")
            .arg("2")
            .arg("-threads")
            .arg("50"),
        SuccessPolicy::OutputExists,
        budget(HTTPX_TIMEOUT),
    )
    .requires(&["subdomains"])
    .reads(&[layout.all_subdomains()])
    .writes(&[layout.httpx_results()]);

    let live_hosts = Stage::internal(
        "live_hosts",
        InternalTask::ExtractLiveHosts {
            source: layout.httpx_results(),
            destination: layout.live_hosts(),
        },
    )
    .requires(&["httpx"])
    .reads(&[layout.httpx_results()])
    .writes(&[layout.live_hosts()]);

    let katana = Stage::external(
        "katana",
        CommandSpec::new("katana")
            .arg("-list")
            .path_arg(&layout.live_hosts())
            .arg("-output")
            .path_arg(&layout.katana())
            .arg("-depth")
            .arg("3")
            .arg("-js-crawl")
            .arg("-field-scope")
            .arg("rdn")
            .arg("-timeout")
            .arg("10")
            .arg("-retry")
            .arg("2")
            .arg("-silent"),
        SuccessPolicy::Either,
        budget(KATANA_TIMEOUT),
    )
    .requires(&["live_hosts"])
    .reads(&[layout.live_hosts()])
    .writes(&[layout.katana()]);

    let nuclei = Stage::external(
        "nuclei",
        CommandSpec::new("nuclei")
            .arg("-l")
            .path_arg(&layout.live_hosts())
            .arg("-o")
            .path_arg(&layout.nuclei_log())
            .arg("-jsonl-export")
            .path_arg(&layout.nuclei_json())
            .arg("-severity")
            .arg("critical,high,medium,low,info")
            .arg("-rate-limit")
            .arg("50")
            .arg("-concurrency")
            .arg("10")
            .arg("-bulk-size")
            .arg("25")
            .arg("-timeout")
            .arg("10")
            .arg("-retries")
            .arg("2")
            .arg("-silent"),
        SuccessPolicy::ExitCode,
        budget(NUCLEI_TIMEOUT),
    )
    .requires(&["live_hosts"])
    .reads(&[layout.live_hosts()])
    .writes(&[layout.nuclei_json(), layout.nuclei_log()]);

    let aquatone = Stage::external(
        "aquatone",
        CommandSpec::new("aquatone")
            .arg("-out")
            .path_arg(&layout.aquatone_dir())
            .stdin_from(layout.live_hosts()),
        SuccessPolicy::Either,
        budget(AQUATONE_TIMEOUT),
    )
    .requires(&["live_hosts"])
    .reads(&[layout.live_hosts()])
    .writes(&[layout.screenshots_dir()]);

    let dns = Stage::external(
        "dns",
        CommandSpec::new("dnsscan").arg(domain).path_arg(layout.root()),
        SuccessPolicy::ExitCode,
        budget(DNS_TIMEOUT),
    )
    .writes(&[layout.dns_records(), layout.dns_zone_attempt(), layout.dns_misconfig()]);

    let nmap = Stage::external(
        "nmap",
        CommandSpec::new("nmap")
            .arg("-sV")
            .arg("-T4")
            .arg("--top-ports")
            .arg("1000")
            .arg("-oN")
            .path_arg(&layout.nmap_text())
            .arg("-oX")
            .path_arg(&layout.nmap_xml())
            .arg("--")
            .arg(domain),
        SuccessPolicy::OutputExists,
        budget(NMAP_TIMEOUT),
    )
    .writes(&[layout.nmap_xml(), layout.nmap_text()]);

    let mut stages = vec![
        amass, subfinder, assetfinder, subdomains, httpx, live_hosts, katana, nuclei, aquatone, dns, nmap,
    ];

    let upstream: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
    let report = Stage::internal(REPORT_STAGE, InternalTask::BuildReport)
        .after(&upstream)
        .writes(&[
            layout.report(),
            layout.httpx_summary(),
            layout.katana_summary(),
            layout.port_summary(),
            layout.nuclei_summary(),
        ]);
    stages.push(report);

    stages
}
