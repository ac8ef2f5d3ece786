use crate::errors::DiscoveryError;
use crate::report::TopologyReport;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk snapshot store for the diff engine: one `<scanId>.json` per run,
/// pruned to the newest N
pub struct HistoryStore {
    dir: PathBuf,
    retention: usize,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a report under its scan id and prune old snapshots
    pub fn save(&self, report: &TopologyReport) -> Result<PathBuf, DiscoveryError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", report.scan_id));
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&path, json)?;
        tracing::info!(path = %path.display(), "snapshot saved");

        self.prune()?;
        Ok(path)
    }

    /// Scan ids present on disk, newest first. The `scan-YYYYMMDD-HHMMSS`
    /// format makes lexicographic order chronological.
    pub fn list(&self) -> Result<Vec<String>, DiscoveryError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json")
                    .filter(|stem| stem.starts_with("scan-"))
                    .map(|stem| stem.to_string())
            })
            .collect();
        ids.sort();
        ids.reverse();
        Ok(ids)
    }

    /// Load the most recent snapshot, if any
    pub fn load_latest(&self) -> Result<Option<TopologyReport>, DiscoveryError> {
        match self.list()?.first() {
            Some(scan_id) => self.load(scan_id).map(Some),
            None => Ok(None),
        }
    }

    pub fn load(&self, scan_id: &str) -> Result<TopologyReport, DiscoveryError> {
        let path = self.dir.join(format!("{}.json", scan_id));
        let raw = fs::read_to_string(&path).map_err(|e| {
            DiscoveryError::HistoryError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn prune(&self) -> Result<(), DiscoveryError> {
        let ids = self.list()?;
        for stale in ids.iter().skip(self.retention) {
            let path = self.dir.join(format!("{}.json", stale));
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to prune snapshot");
            }
        }
        Ok(())
    }
}
