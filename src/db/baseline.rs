//! JSON state file holding the last-known-stake baseline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::StakeBaseline;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    stakes: StakeBaseline,
}

/// Loads and atomically rewrites the baseline state file.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the baseline. A missing or unreadable file yields an empty one.
    pub fn load(&self) -> StakeBaseline {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file, starting cold");
                return StakeBaseline::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read state file, starting cold");
                return StakeBaseline::new();
            }
        };

        match serde_json::from_str::<StateFile>(&content) {
            Ok(state) => state.stakes,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt state file, starting cold");
                StakeBaseline::new()
            }
        }
    }

    /// Write the baseline via a temporary file and rename.
    pub fn save(&self, baseline: &StakeBaseline) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let state = StateFile {
            stakes: baseline.clone(),
        };
        let content = serde_json::to_string_pretty(&state).context("Failed to serialize baseline")?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("absent.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(BaselineStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("state.json"));

        let mut baseline = StakeBaseline::new();
        baseline.set(1, "5Fhot", dec!(100.25));
        baseline.set(12, "5Gother", dec!(3));
        store.save(&baseline).unwrap();

        assert_eq!(store.load(), baseline);
        assert!(!dir.path().join("state.json.tmp").exists());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["stakes"]["1"]["5Fhot"], "100.25");
    }
}
