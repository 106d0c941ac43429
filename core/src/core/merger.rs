use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::core::stage::MergeSource;
use crate::error::{ReconError, Result};

/// What a merge read and wrote.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub entries: usize,
    /// Producer files that existed and were read.
    pub producers_read: usize,
    /// Producers that existed but could not be read.
    pub skipped: Vec<ReconError>,
}

/// Normalizes one producer line. Returns `None` for blanks and `#` comments.
fn normalize(line: &str, require_dot: bool) -> Option<String> {
    let entry = line.trim();
    if entry.is_empty() || entry.starts_with('#') {
        return None;
    }
    if require_dot && !entry.contains('.') {
        return None;
    }
    Some(entry.to_lowercase())
}

/// Unions every existing producer into one lower-cased, sorted set.
/// Missing producers are ignored; unreadable ones are reported and skipped.
pub fn collect(sources: &[MergeSource]) -> (BTreeSet<String>, MergeReport) {
    let mut entries = BTreeSet::new();
    let mut report = MergeReport::default();

    for source in sources {
        if !source.path.exists() {
            debug!("producer {} missing, skipping", source.path.display());
            continue;
        }
        match fs::read(&source.path) {
            Ok(bytes) => {
                report.producers_read += 1;
                let text = String::from_utf8_lossy(&bytes);
                entries.extend(text.lines().filter_map(|l| normalize(l, source.require_dot)));
            }
            Err(e) => {
                warn!("skipping unreadable producer {}: {}", source.path.display(), e);
                report.skipped.push(ReconError::MergeIo {
                    path: source.path.clone(),
                    source: e,
                });
            }
        }
    }

    report.entries = entries.len();
    (entries, report)
}

/// `Merge(paths) -> sortedUniqueLines` without declared filters.
pub fn merge_lines(paths: &[PathBuf]) -> Vec<String> {
    let sources: Vec<MergeSource> = paths
        .iter()
        .map(|p| MergeSource { path: p.clone(), require_dot: false })
        .collect();
    collect(&sources).0.into_iter().collect()
}

/// Merges producers into `destination`. Output is byte-identical for identical inputs.
pub fn merge_into(sources: &[MergeSource], destination: &Path) -> Result<MergeReport> {
    let (entries, report) = collect(sources);

    let mut body = entries.into_iter().collect::<Vec<_>>().join("\n");
    if !body.is_empty() {
        body.push('\n');
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = destination.with_extension("tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, destination)?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_merge_example() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.txt", "Sub1.EX.com\nsub2.ex.com\n");
        let b = write(dir.path(), "b.txt", "sub2.ex.com\n# comment\n\n");

        assert_eq!(merge_lines(&[a, b]), vec!["sub1.ex.com", "sub2.ex.com"]);
    }

    #[test]
    fn test_merge_is_sorted_and_case_insensitive() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.txt", "zeta.ex.com\n  API.ex.com  \nalpha.ex.com\n");
        let b = write(dir.path(), "b.txt", "api.EX.com\nAlpha.ex.com\n");

        let merged = merge_lines(&[a, b]);
        assert_eq!(merged, vec!["alpha.ex.com", "api.ex.com", "zeta.ex.com"]);
    }

    #[test]
    fn test_missing_producers_are_ignored() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.txt", "one.ex.com\n");
        let missing = dir.path().join("nope.txt");

        let sources = vec![
            MergeSource { path: missing, require_dot: false },
            MergeSource { path: a, require_dot: false },
        ];
        let (entries, report) = collect(&sources);
        assert_eq!(entries.len(), 1);
        assert_eq!(report.producers_read, 1);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_dot_filter_only_when_declared() {
        let dir = tempdir().unwrap();
        let log = write(dir.path(), "assetfinder.log", "starting up\nwww.ex.com\nerror\n");

        let filtered = collect(&[MergeSource { path: log.clone(), require_dot: true }]).0;
        assert_eq!(filtered.into_iter().collect::<Vec<_>>(), vec!["www.ex.com"]);

        let unfiltered = collect(&[MergeSource { path: log, require_dot: false }]).0;
        assert_eq!(unfiltered.len(), 3);
    }

    #[test]
    fn test_merge_is_idempotent_and_deterministic() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a.txt", "B.ex.com\na.ex.com\n");
        let b = write(dir.path(), "b.txt", "c.ex.com\nb.ex.com\n");
        let sources = vec![
            MergeSource { path: a, require_dot: false },
            MergeSource { path: b, require_dot: false },
        ];

        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        merge_into(&sources, &first).unwrap();
        merge_into(&sources, &second).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());

        let again = dir.path().join("again.txt");
        merge_into(&[MergeSource { path: first.clone(), require_dot: false }], &again).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&again).unwrap());
        assert_eq!(fs::read_to_string(&again).unwrap(), "a.ex.com\nb.ex.com\nc.ex.com\n");
    }
}
