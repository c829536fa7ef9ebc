//! Discovery of finalized shards and active workers.
//!
//! The registry is a read-only view over the report directory. A shard is
//! visible once its `.json` rename has completed; `.json.tmp` files in
//! flight never match. Listing is sorted, so callers see the same order no
//! matter how the filesystem iterates directories.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{SHARD_DIR, WORKER_DIR};
use crate::report::types::{ResultShard, SHARD_FORMAT_VERSION};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug)]
pub enum RegistryError {
    /// I/O error scanning or reading the report directory
    Io(std::io::Error),

    /// A finalized shard file exists but cannot be used
    Corrupt {
        /// Shard id the file claimed
        id: String,
        /// What went wrong parsing it
        detail: String,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Io(err) => write!(f, "I/O error: {}", err),
            RegistryError::Corrupt { id, detail } => {
                write!(f, "shard {} is unreadable: {}", id, detail)
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Io(err) => Some(err),
            RegistryError::Corrupt { .. } => None,
        }
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err)
    }
}

/// Filesystem-visible directory of all shards produced during a run
#[derive(Debug, Clone)]
pub struct ShardRegistry {
    shards_dir: PathBuf,
    workers_dir: PathBuf,
}

impl ShardRegistry {
    /// Create a registry view over a report directory
    pub fn new(report_dir: impl AsRef<Path>) -> Self {
        let report_dir = report_dir.as_ref();
        Self {
            shards_dir: report_dir.join(SHARD_DIR),
            workers_dir: report_dir.join(WORKER_DIR),
        }
    }

    /// Ids of all finalized shards, sorted.
    ///
    /// A missing shards directory means no worker has finalized yet and is
    /// not an error.
    pub fn list_finalized_shards(&self) -> RegistryResult<Vec<String>> {
        Self::list_dir(&self.shards_dir, |path| {
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                path.file_stem().map(|s| s.to_string_lossy().to_string())
            } else {
                None
            }
        })
    }

    /// Ids of workers that have started but not yet finalized, sorted.
    ///
    /// This is the "run complete" signal when the expected shard count is
    /// unknown: no markers left means every worker finalized or died.
    pub fn active_workers(&self) -> RegistryResult<Vec<String>> {
        Self::list_dir(&self.workers_dir, |path| {
            path.file_name().map(|s| s.to_string_lossy().to_string())
        })
    }

    /// Read and validate one finalized shard
    pub fn read(&self, id: &str) -> RegistryResult<ResultShard> {
        let path = self.shards_dir.join(format!("{}.json", id));
        let data = fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RegistryError::Io(err)
            } else {
                RegistryError::Corrupt { id: id.to_string(), detail: err.to_string() }
            }
        })?;

        let shard: ResultShard =
            serde_json::from_str(&data).map_err(|err| RegistryError::Corrupt {
                id: id.to_string(),
                detail: err.to_string(),
            })?;

        if shard.format_version != SHARD_FORMAT_VERSION {
            return Err(RegistryError::Corrupt {
                id: id.to_string(),
                detail: format!(
                    "format version {} (expected {})",
                    shard.format_version, SHARD_FORMAT_VERSION
                ),
            });
        }
        Ok(shard)
    }

    /// Read every finalized shard, partitioning out the unreadable ones.
    ///
    /// A corrupt shard never aborts the scan; its id is returned so the
    /// merge can bookkeep it.
    pub fn read_all(&self) -> RegistryResult<(Vec<ResultShard>, Vec<String>)> {
        let mut shards = Vec::new();
        let mut unreadable = Vec::new();
        for id in self.list_finalized_shards()? {
            match self.read(&id) {
                Ok(shard) => shards.push(shard),
                Err(RegistryError::Corrupt { id, .. }) => unreadable.push(id),
                Err(err @ RegistryError::Io(_)) => return Err(err),
            }
        }
        Ok((shards, unreadable))
    }

    fn list_dir(
        dir: &Path,
        extract: impl Fn(&Path) -> Option<String>,
    ) -> RegistryResult<Vec<String>> {
        let mut ids = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if let Some(id) = extract(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::recorder::ShardRecorder;
    use tempfile::tempdir;

    #[test]
    fn test_empty_report_dir_lists_nothing() {
        let dir = tempdir().unwrap();
        let registry = ShardRegistry::new(dir.path());
        assert!(registry.list_finalized_shards().unwrap().is_empty());
        assert!(registry.active_workers().unwrap().is_empty());
    }

    #[test]
    fn test_listing_is_sorted_and_ignores_temp_files() {
        let dir = tempdir().unwrap();
        let shards = dir.path().join(SHARD_DIR);
        fs::create_dir_all(&shards).unwrap();
        fs::write(shards.join("w2.json"), "{}").unwrap();
        fs::write(shards.join("w1.json"), "{}").unwrap();
        fs::write(shards.join("w3.json.tmp"), "{}").unwrap();

        let registry = ShardRegistry::new(dir.path());
        assert_eq!(registry.list_finalized_shards().unwrap(), vec!["w1", "w2"]);
    }

    #[test]
    fn test_read_roundtrips_a_finalized_shard() {
        let dir = tempdir().unwrap();
        let config = RecorderConfig::new(dir.path());
        let mut recorder = ShardRecorder::with_id(&config, "w1").unwrap();
        let handle = recorder.begin_test("test_login");
        recorder
            .end_test(handle, crate::report::types::TestStatus::Passed, None)
            .unwrap();
        recorder.finalize().unwrap();

        let registry = ShardRegistry::new(dir.path());
        let shard = registry.read("w1").unwrap();
        assert_eq!(shard.shard_id, "w1");
        assert_eq!(shard.results.len(), 1);
    }

    #[test]
    fn test_garbage_shard_is_corrupt() {
        let dir = tempdir().unwrap();
        let shards = dir.path().join(SHARD_DIR);
        fs::create_dir_all(&shards).unwrap();
        fs::write(shards.join("zz.json"), "not json at all").unwrap();

        let registry = ShardRegistry::new(dir.path());
        assert!(matches!(registry.read("zz"), Err(RegistryError::Corrupt { .. })));
    }

    #[test]
    fn test_version_mismatch_is_corrupt() {
        let dir = tempdir().unwrap();
        let shards = dir.path().join(SHARD_DIR);
        fs::create_dir_all(&shards).unwrap();
        fs::write(
            shards.join("w9.json"),
            r#"{"format_version": 99, "shard_id": "w9", "started_at": "2026-01-01T00:00:00Z",
                "finalized_at": "2026-01-01T00:01:00Z", "results": []}"#,
        )
        .unwrap();

        let registry = ShardRegistry::new(dir.path());
        assert!(matches!(registry.read("w9"), Err(RegistryError::Corrupt { .. })));
    }

    #[test]
    fn test_read_all_partitions_corrupt_shards() {
        let dir = tempdir().unwrap();
        let config = RecorderConfig::new(dir.path());
        ShardRecorder::with_id(&config, "w1").unwrap().finalize().unwrap();
        fs::write(config.shards_dir().join("zz.json"), "garbage").unwrap();

        let registry = ShardRegistry::new(dir.path());
        let (shards, unreadable) = registry.read_all().unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].shard_id, "w1");
        assert_eq!(unreadable, vec!["zz"]);
    }
}
