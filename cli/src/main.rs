use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use colored::*;
use env_logger::Env;
use tokio_util::sync::CancellationToken;

use reconchain_core::{
    regenerate_report, ConsoleSink, Pipeline, ProgressReporter, RunConfig, RunSummary, StageStatus,
};

#[derive(Parser, Debug)]
#[command(
    name = "reconchain",
    version,
    about = "Recon pipeline orchestrator: runs external recon tools and merges their output into one report",
    override_usage = "reconchain <domain> [options]",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Full run:                       reconchain example.com
  Custom output directory:        reconchain example.com -o runs/example
  Tools in terminal windows:      reconchain example.com --interactive
  Skip slow stages:               reconchain example.com --skip nmap,aquatone
  Show the plan only:             reconchain example.com --dry-run
  Rebuild the report:             reconchain example.com -o runs/example --report-only
  From a config file:             reconchain --config recon.json"
)]
pub struct Args {
    #[arg(required_unless_present = "config", help = "Target domain (a URL is reduced to its host)")]
    pub target: Option<String>,

    #[arg(short = 'o', long, help = "Output directory [default: recon_<domain>]")]
    pub output: Option<PathBuf>,

    #[arg(short = 'i', long, help = "Run each tool in its own terminal window when one is available")]
    pub interactive: bool,

    #[arg(long, value_name = "MS", help = "Done-file poll interval in milliseconds [default: 1500]")]
    pub poll_interval: Option<u64>,

    #[arg(long, value_name = "SECS", help = "Replace every per-stage timeout")]
    pub timeout: Option<u64>,

    #[arg(long, value_delimiter = ',', value_name = "STAGE", help = "Stages to skip (comma separated)")]
    pub skip: Vec<String>,

    #[arg(long, help = "Print the stage plan without launching anything")]
    pub dry_run: bool,

    #[arg(short = 'v', long, help = "Debug logging")]
    pub verbose: bool,

    #[arg(long, value_name = "FILE", help = "JSON run configuration; flags override its values")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Rebuild report.html from an existing output directory")]
    pub report_only: bool,
}

impl Args {
    /// Layers explicit flags over the config file (or the defaults).
    fn into_config(self) -> anyhow::Result<(RunConfig, bool)> {
        let mut config = match self.config {
            Some(ref path) => RunConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(target) = self.target {
            config.target = target;
        }
        if self.output.is_some() {
            config.output_dir = self.output;
        }
        if let Some(ms) = self.poll_interval {
            config.poll_interval_ms = ms;
        }
        if self.timeout.is_some() {
            config.timeout = self.timeout;
        }
        if !self.skip.is_empty() {
            config.skip = self.skip;
        }
        config.interactive |= self.interactive;
        config.dry_run |= self.dry_run;
        config.verbose |= self.verbose;
        Ok((config, self.report_only))
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();
    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "[!]".red().bold(), e);
            2
        }
    };
    process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let (config, report_only) = args.into_config()?;
    init_logging(config.verbose);
    log::debug!("effective configuration: {:?}", config);

    if report_only {
        let model = regenerate_report(&config).context("report regeneration failed")?;
        let counts = model.counts();
        println!(
            "{} report rebuilt for {}: {} subdomains, {} live hosts, {} open ports, {} vulnerabilities",
            "[+]".green().bold(),
            model.target,
            counts.subdomains,
            counts.live_hosts,
            counts.open_ports,
            counts.vulnerabilities
        );
        return Ok(0);
    }

    let pipeline = Pipeline::prepare(&config)?;

    if config.dry_run {
        println!("[DRY RUN] Target: {}", pipeline.target);
        println!("[DRY RUN] Output: {}", pipeline.layout.root().display());
        for line in pipeline.plan() {
            println!("  {}", line);
        }
        return Ok(0);
    }

    print_run_config(&pipeline, &config);
    let missing = pipeline.missing_tools();
    if !missing.is_empty() {
        println!(
            "{}",
            format!("[!] Not found: {} (those stages will fail)", missing.join(", ")).yellow()
        );
    }

    let reporter = if config.interactive {
        ProgressReporter::hidden(pipeline.table())
    } else {
        ProgressReporter::new(pipeline.table())
    };
    let sink = ConsoleSink::with_progress(reporter.bar());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "[!] Interrupted, stopping running tools...".yellow().bold());
            interrupt.cancel();
        }
    });

    let report_path = pipeline.layout.report();
    let stop_progress = CancellationToken::new();
    let progress = reporter.spawn(stop_progress.clone());

    let summary = pipeline.run(sink, cancel).await?;

    stop_progress.cancel();
    progress.await.ok();

    print_summary(&summary);
    if summary.stages.iter().any(|r| r.name == "report" && r.status == StageStatus::Completed) {
        println!("{} Report: {}", "[+]".green().bold(), report_path.display());
    }
    Ok(summary.exit_code())
}

fn print_run_config(pipeline: &Pipeline, config: &RunConfig) {
    println!("{}", format!("[+] Target:     {}", pipeline.target).green().bold());
    println!("{}", format!("[+] Output:     {}", pipeline.layout.root().display()).blue());
    println!("{}", format!("[+] Stages:     {}", pipeline.stages.len()).blue());
    let mode = if config.interactive { "Interactive (terminal windows)" } else { "Background" };
    println!("{}", format!("[+] Mode:       {}", mode).magenta());
    if let Some(secs) = config.timeout {
        println!("{}", format!("[+] Timeout:    {}s per stage", secs).yellow());
    }
    if !config.skip.is_empty() {
        println!("{}", format!("[+] Skipping:   {}", config.skip.join(", ")).yellow());
    }
    println!("{}", "──────────────────────────────────────────────────".dimmed());
}

fn print_summary(summary: &RunSummary) {
    println!("\n{}", "━━━ Stage Summary ━━━".bright_white().bold());
    for run in &summary.stages {
        let status = match run.status {
            StageStatus::Completed => run.status.to_string().green(),
            StageStatus::Failed if run.skipped => "Skipped".yellow(),
            StageStatus::Failed | StageStatus::TimedOut => run.status.to_string().red(),
            _ => run.status.to_string().normal(),
        };
        let detail = run.reason.as_deref().unwrap_or("");
        println!("  {:<12} {:<10} {}", run.name, status, detail.dimmed());
    }
    println!(
        "{}",
        format!(
            "[*] {} completed, {} failed, {} timed out",
            summary.count(StageStatus::Completed),
            summary.count(StageStatus::Failed),
            summary.count(StageStatus::TimedOut)
        )
        .bright_cyan()
    );
    if summary.cancelled {
        println!("{}", "[!] Run cancelled; partial results are left on disk.".yellow());
    }
}
