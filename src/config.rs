//! Configuration for recording and aggregation.
//!
//! A [`RecorderConfig`] value is threaded explicitly through every component
//! entry point (recorder, registry, coordinator, CLI); there is no
//! process-wide configuration singleton. `from_env` exists as a convenience
//! for constructing one from the environment at the edges.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `WEB_RECORDER_REPORT_DIR` | Report directory | `./webdriver-report` |
//! | `WEB_RECORDER_TITLE` | Report title | `Acceptance tests` |
//! | `WEB_RECORDER_EXPECTED_SHARDS` | Worker count to wait for | unset (unknown) |
//! | `WEB_RECORDER_WAIT_BUDGET_SECS` | Aggregation wait budget (s) | `60` |
//! | `WEB_RECORDER_POLL_INTERVAL_MS` | Shard poll interval (ms) | `250` |

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default report directory, relative to the invoking process
pub const DEFAULT_REPORT_DIR: &str = "./webdriver-report";

/// Default report title
pub const DEFAULT_TITLE: &str = "Acceptance tests";

/// Default aggregation wait budget (seconds)
pub const DEFAULT_WAIT_BUDGET_SECS: u64 = 60;

/// Default shard poll interval (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the report directory
pub const ENV_REPORT_DIR: &str = "WEB_RECORDER_REPORT_DIR";

/// Environment variable for the report title
pub const ENV_TITLE: &str = "WEB_RECORDER_TITLE";

/// Environment variable for the expected shard count
pub const ENV_EXPECTED_SHARDS: &str = "WEB_RECORDER_EXPECTED_SHARDS";

/// Environment variable for the wait budget (seconds)
pub const ENV_WAIT_BUDGET_SECS: &str = "WEB_RECORDER_WAIT_BUDGET_SECS";

/// Environment variable for the poll interval (milliseconds)
pub const ENV_POLL_INTERVAL_MS: &str = "WEB_RECORDER_POLL_INTERVAL_MS";

// ============================================================================
// Report Directory Layout
// ============================================================================

/// Subdirectory holding content-addressed image files
pub const IMAGE_DIR: &str = "images";

/// Subdirectory holding finalized shard files
pub const SHARD_DIR: &str = "shards";

/// Subdirectory holding active-worker markers
pub const WORKER_DIR: &str = "workers";

/// Election lock resource; never holds application data
pub const LOCK_FILE: &str = ".aggregation.lock";

/// The persisted aggregate report
pub const REPORT_FILE: &str = "report.json";

/// Settings consumed by the recording and aggregation core
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Root directory all report artifacts live under
    pub report_dir: PathBuf,

    /// Title stamped into the aggregate report
    pub title: String,

    /// Number of worker shards to wait for; `None` means unknown, in which
    /// case completion is detected from active-worker markers
    pub expected_shards: Option<usize>,

    /// How long the elected coordinator waits for shards before producing a
    /// partial report
    pub wait_budget: Duration,

    /// Fixed interval between shard registry polls
    pub poll_interval: Duration,
}

impl RecorderConfig {
    /// Create a configuration with defaults for everything but the directory
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self {
            report_dir: report_dir.into(),
            title: DEFAULT_TITLE.to_string(),
            expected_shards: None,
            wait_budget: Duration::from_secs(DEFAULT_WAIT_BUDGET_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Create a configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let report_dir = env::var(ENV_REPORT_DIR).unwrap_or_else(|_| DEFAULT_REPORT_DIR.to_string());
        Self {
            report_dir: PathBuf::from(report_dir),
            title: env::var(ENV_TITLE).unwrap_or_else(|_| DEFAULT_TITLE.to_string()),
            expected_shards: env::var(ENV_EXPECTED_SHARDS).ok().and_then(|s| s.parse().ok()),
            wait_budget: Duration::from_secs(
                env::var(ENV_WAIT_BUDGET_SECS)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_WAIT_BUDGET_SECS),
            ),
            poll_interval: Duration::from_millis(
                env::var(ENV_POLL_INTERVAL_MS)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
        }
    }

    /// Set the report title
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the number of shards the coordinator should wait for
    pub fn expected_shards(mut self, count: usize) -> Self {
        self.expected_shards = Some(count);
        self
    }

    /// Set the aggregation wait budget
    pub fn wait_budget(mut self, budget: Duration) -> Self {
        self.wait_budget = budget;
        self
    }

    /// Set the shard poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Directory holding content-addressed images
    pub fn images_dir(&self) -> PathBuf {
        self.report_dir.join(IMAGE_DIR)
    }

    /// Directory holding finalized shard files
    pub fn shards_dir(&self) -> PathBuf {
        self.report_dir.join(SHARD_DIR)
    }

    /// Directory holding active-worker markers
    pub fn workers_dir(&self) -> PathBuf {
        self.report_dir.join(WORKER_DIR)
    }

    /// Path of the election lock resource
    pub fn lock_path(&self) -> PathBuf {
        self.report_dir.join(LOCK_FILE)
    }

    /// Path of the persisted aggregate report
    pub fn report_path(&self) -> PathBuf {
        self.report_dir.join(REPORT_FILE)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::new(Path::new(DEFAULT_REPORT_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.report_dir, PathBuf::from(DEFAULT_REPORT_DIR));
        assert_eq!(config.title, DEFAULT_TITLE);
        assert_eq!(config.expected_shards, None);
        assert_eq!(config.wait_budget, Duration::from_secs(DEFAULT_WAIT_BUDGET_SECS));
    }

    #[test]
    fn test_config_builders() {
        let config = RecorderConfig::new("/tmp/report")
            .title("nightly")
            .expected_shards(4)
            .wait_budget(Duration::from_secs(5))
            .poll_interval(Duration::from_millis(10));
        assert_eq!(config.title, "nightly");
        assert_eq!(config.expected_shards, Some(4));
        assert_eq!(config.wait_budget, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_layout_paths() {
        let config = RecorderConfig::new("/tmp/report");
        assert_eq!(config.images_dir(), PathBuf::from("/tmp/report/images"));
        assert_eq!(config.shards_dir(), PathBuf::from("/tmp/report/shards"));
        assert_eq!(config.workers_dir(), PathBuf::from("/tmp/report/workers"));
        assert_eq!(config.lock_path(), PathBuf::from("/tmp/report/.aggregation.lock"));
        assert_eq!(config.report_path(), PathBuf::from("/tmp/report/report.json"));
    }
}
