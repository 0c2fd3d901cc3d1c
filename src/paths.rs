// =============================================================================
// Filesystem layout — data directories resolved relative to the executable
// =============================================================================
//
// All durable state lives in flat files next to the binary:
//
//   downloads/     raw daily workbooks (scrape stage is the sole writer)
//   reports/       derived CSV/JSON outputs (processing stage is the sole writer)
//   logs/          rotated text logs
//   license.dat    encrypted local license cache
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolved locations of every durable file the service touches.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    pub downloads: PathBuf,
    pub reports: PathBuf,
    pub logs: PathBuf,
    pub license_file: PathBuf,
}

impl DataPaths {
    /// Resolve the data layout under `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            downloads: root.join("downloads"),
            reports: root.join("reports"),
            logs: root.join("logs"),
            license_file: root.join("license.dat"),
            root,
        }
    }

    /// Resolve the data layout next to the running executable, falling back to
    /// the current working directory when the executable path is unavailable.
    pub fn beside_executable() -> Self {
        let root = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(root)
    }

    /// Create every directory the service writes into. Called once at startup;
    /// failure here is fatal.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.downloads, &self.reports, &self.logs] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create data directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Path of the canonical dense dataset.
    pub fn combined_csv(&self) -> PathBuf {
        self.reports.join("isx_combined_data.csv")
    }

    /// Path of the index series CSV.
    pub fn indexes_csv(&self) -> PathBuf {
        self.reports.join("indexes.csv")
    }

    /// Path of the ticker summary CSV.
    pub fn ticker_summary_csv(&self) -> PathBuf {
        self.reports.join("ticker_summary.csv")
    }

    /// Path of the ticker summary JSON.
    pub fn ticker_summary_json(&self) -> PathBuf {
        self.reports.join("ticker_summary.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted() {
        let paths = DataPaths::new("/tmp/isx");
        assert_eq!(paths.downloads, PathBuf::from("/tmp/isx/downloads"));
        assert_eq!(paths.reports, PathBuf::from("/tmp/isx/reports"));
        assert_eq!(paths.license_file, PathBuf::from("/tmp/isx/license.dat"));
        assert_eq!(
            paths.combined_csv(),
            PathBuf::from("/tmp/isx/reports/isx_combined_data.csv")
        );
    }

    #[test]
    fn ensure_directories_creates_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(tmp.path());
        paths.ensure_directories().unwrap();
        assert!(paths.downloads.is_dir());
        assert!(paths.reports.is_dir());
        assert!(paths.logs.is_dir());
    }
}
