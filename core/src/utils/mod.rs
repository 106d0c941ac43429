use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use which::which;

/// Resolves the full path to a tool binary.
/// Search order: ./tools/{name} → ./{name} → System PATH
///
/// Local hits are canonicalized since stages run with the output directory as
/// their working directory.
pub fn get_binary_path(tool_name: &str) -> Option<String> {
    let binary_name = if cfg!(target_os = "windows") {
        format!("{}.exe", tool_name)
    } else {
        tool_name.to_string()
    };

    let tools_path = PathBuf::from("./tools").join(&binary_name);
    if tools_path.is_file() {
        return Some(fs::canonicalize(&tools_path).unwrap_or(tools_path).to_string_lossy().to_string());
    }

    let local_path = PathBuf::from("./").join(&binary_name);
    if local_path.is_file() {
        return Some(fs::canonicalize(&local_path).unwrap_or(local_path).to_string_lossy().to_string());
    }

    if let Ok(path) = which(&binary_name) {
        return Some(path.to_string_lossy().to_string());
    }

    None
}

/// Names from `tools` that cannot be resolved.
pub fn missing_tools<'a>(tools: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    tools.into_iter().filter(|t| get_binary_path(t).is_none()).collect()
}

/// Reads an artifact as trimmed, non-empty, non-comment lines.
///
/// A missing file yields no lines. A final line without a trailing newline is
/// treated as still being written and dropped.
pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let text = String::from_utf8_lossy(&bytes);
    let complete = match text.rfind('\n') {
        Some(end) => &text[..end],
        None => "",
    };

    Ok(complete
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect())
}

/// True when `path` is a non-empty file or a directory with at least one entry.
pub fn has_content(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}
