use std::fs;
use std::path::Path;

use log::debug;
use serde::Serialize;

use crate::core::layout::OutputLayout;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// A captured page. Paths are relative to the output directory so the report
/// can link them directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Screenshot {
    pub path: String,
    pub thumbnail: String,
    pub filename: String,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Lists the screenshot directory, sorted by filename. Each image is paired
/// with `thumbs/thumb_<filename>`; without one the full image is used.
pub fn list_screenshots(layout: &OutputLayout) -> Vec<Screenshot> {
    let dir = layout.screenshots_dir();
    let Ok(entries) = fs::read_dir(&dir) else {
        debug!("no screenshot directory at {}", dir.display());
        return Vec::new();
    };

    let mut files: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let thumbs = layout.thumbs_dir();
    files
        .iter()
        .filter_map(|path| {
            let filename = path.file_name()?.to_string_lossy().into_owned();
            let thumb = thumbs.join(format!("thumb_{}", filename));
            let thumbnail = if thumb.is_file() { &thumb } else { path };
            Some(Screenshot {
                path: layout.relative(path),
                thumbnail: layout.relative(thumbnail),
                filename,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_thumbnail_pairing_and_fallback() {
        let dir = tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        fs::create_dir_all(layout.screenshots_dir()).unwrap();
        fs::create_dir_all(layout.thumbs_dir()).unwrap();

        fs::write(layout.screenshots_dir().join("https__b.ex.com.png"), b"png").unwrap();
        fs::write(layout.screenshots_dir().join("https__a.ex.com.png"), b"png").unwrap();
        fs::write(layout.screenshots_dir().join("notes.txt"), b"x").unwrap();
        fs::write(layout.thumbs_dir().join("thumb_https__a.ex.com.png"), b"png").unwrap();

        let shots = list_screenshots(&layout);
        assert_eq!(shots.len(), 2);
        assert_eq!(shots[0].filename, "https__a.ex.com.png");
        assert_eq!(shots[0].path, "aquatone/screenshots/https__a.ex.com.png");
        assert_eq!(shots[0].thumbnail, "aquatone/thumbs/thumb_https__a.ex.com.png");
        assert_eq!(shots[1].thumbnail, "aquatone/screenshots/https__b.ex.com.png");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        assert!(list_screenshots(&OutputLayout::new(dir.path())).is_empty());
    }
}
