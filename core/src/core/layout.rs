use std::path::{Path, PathBuf};

/// Fixed artifact locations relative to a run's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn all_subdomains(&self) -> PathBuf {
        self.root.join("all_subdomains.txt")
    }

    /// Raw per-enumerator output before the merge.
    pub fn raw_subdomains(&self, tool: &str) -> PathBuf {
        self.root.join("temp_subdomains").join(format!("{}.txt", tool))
    }

    pub fn httpx_results(&self) -> PathBuf {
        self.root.join("httpx_results.txt")
    }

    pub fn httpx_summary(&self) -> PathBuf {
        self.root.join("httpx_summary.txt")
    }

    pub fn live_hosts(&self) -> PathBuf {
        self.root.join("live_hosts.txt")
    }

    pub fn katana(&self) -> PathBuf {
        self.root.join("katana.txt")
    }

    pub fn katana_summary(&self) -> PathBuf {
        self.root.join("katana_summary.txt")
    }

    pub fn dns_dir(&self) -> PathBuf {
        self.root.join("dns")
    }

    pub fn dns_records(&self) -> PathBuf {
        self.dns_dir().join("records.txt")
    }

    pub fn dns_zone_attempt(&self) -> PathBuf {
        self.dns_dir().join("zone_attempt.txt")
    }

    pub fn dns_misconfig(&self) -> PathBuf {
        self.dns_dir().join("misconfig.txt")
    }

    pub fn nmap_text(&self) -> PathBuf {
        self.root.join("ports").join("nmap.txt")
    }

    pub fn nmap_xml(&self) -> PathBuf {
        self.root.join("ports").join("nmap.xml")
    }

    pub fn port_summary(&self) -> PathBuf {
        self.root.join("ports").join("port_summary.txt")
    }

    pub fn nuclei_log(&self) -> PathBuf {
        self.root.join("nuclei").join("nuclei.log")
    }

    pub fn nuclei_json(&self) -> PathBuf {
        self.root.join("nuclei").join("nuclei.json")
    }

    pub fn nuclei_summary(&self) -> PathBuf {
        self.root.join("nuclei").join("summary.txt")
    }

    pub fn aquatone_dir(&self) -> PathBuf {
        self.root.join("aquatone")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.aquatone_dir().join("screenshots")
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.aquatone_dir().join("thumbs")
    }

    pub fn report(&self) -> PathBuf {
        self.root.join("report.html")
    }

    pub fn run_state(&self) -> PathBuf {
        self.root.join("run_state.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn stage_log(&self, stage: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.log", stage))
    }

    pub fn stage_done(&self, stage: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.done", stage))
    }

    /// Pid of the wrapper shell, written before the tool starts.
    pub fn stage_pid(&self, stage: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.pid", stage))
    }

    /// Path relative to the output directory, with forward slashes, for use in report links.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_file_sits_next_to_log() {
        let layout = OutputLayout::new("/tmp/run");
        assert_eq!(layout.stage_log("httpx").parent(), layout.stage_done("httpx").parent());
        assert!(layout.stage_done("httpx").ends_with("httpx.done"));
    }

    #[test]
    fn test_relative_paths_for_report_links() {
        let layout = OutputLayout::new("/tmp/run");
        let shot = layout.screenshots_dir().join("a.png");
        assert_eq!(layout.relative(&shot), "aquatone/screenshots/a.png");
    }
}
