//! Screenshot Artifacts
//!
//! Screenshots are written as `<branch-hash>_<ordinal>_<before|after>.<ext>`
//! so they can be matched back to a branch step without any index file.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

/// Default artifact directory, relative to the working directory.
pub const SCREENSHOT_DIR: &str = "report/screenshots";

/// Encoded image returned by a browser adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub data: Vec<u8>,
    pub extension: String,
}

impl Screenshot {
    pub fn new(data: Vec<u8>, extension: &str) -> Self {
        Self {
            data,
            extension: extension.trim_start_matches('.').to_string(),
        }
    }
}

/// When a screenshot was taken relative to the step's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    pub fn from_is_after(is_after_action: bool) -> Self {
        if is_after_action {
            Phase::After
        } else {
            Phase::Before
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Before => write!(f, "before"),
            Phase::After => write!(f, "after"),
        }
    }
}

pub fn screenshot_file_name(hash: &str, ordinal: usize, phase: Phase, extension: &str) -> String {
    format!("{}_{}_{}.{}", hash, ordinal, phase, extension)
}

/// Writes a screenshot into `dir`, creating it if needed.
pub fn save_screenshot(
    dir: &Path,
    hash: &str,
    ordinal: usize,
    phase: Phase,
    shot: &Screenshot,
) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let path = dir.join(screenshot_file_name(hash, ordinal, phase, &shot.extension));
    fs::write(&path, &shot.data)?;

    debug!("Saved screenshot {}", path.display());
    Ok(path)
}

/// Deletes every artifact of one branch. Returns how many files were removed.
pub fn prune_branch_screenshots(dir: &Path, hash: &str) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let prefix = format!("{}_", hash);
    let mut removed = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(&prefix) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    if removed > 0 {
        debug!("Pruned {} screenshot(s) of branch {}", removed, hash);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_screenshot_file_name() {
        assert_eq!(
            screenshot_file_name("abc123", 4, Phase::After, "jpg"),
            "abc123_4_after.jpg"
        );
        assert_eq!(
            screenshot_file_name("abc123", 0, Phase::Before, "png"),
            "abc123_0_before.png"
        );
    }

    #[test]
    fn test_screenshot_strips_dot() {
        assert_eq!(Screenshot::new(vec![], ".png").extension, "png");
    }

    #[test]
    fn test_save_creates_directory() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("nested/shots");

        let path = save_screenshot(&dir, "h1", 2, Phase::Before, &Screenshot::new(vec![1, 2], "jpg"))
            .unwrap();

        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "h1_2_before.jpg");
        assert_eq!(fs::read(path).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_prune_only_matching_branch() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path();
        let shot = Screenshot::new(vec![0], "jpg");

        save_screenshot(dir, "aaa", 0, Phase::Before, &shot).unwrap();
        save_screenshot(dir, "aaa", 0, Phase::After, &shot).unwrap();
        save_screenshot(dir, "bbb", 0, Phase::Before, &shot).unwrap();

        assert_eq!(prune_branch_screenshots(dir, "aaa").unwrap(), 2);
        assert!(dir.join("bbb_0_before.jpg").exists());
        assert!(!dir.join("aaa_0_after.jpg").exists());
    }

    #[test]
    fn test_prune_missing_directory() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("none");
        assert_eq!(prune_branch_screenshots(&missing, "aaa").unwrap(), 0);
    }
}
