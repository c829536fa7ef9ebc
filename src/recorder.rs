//! Per-worker recording of test outcomes and screenshots.
//!
//! Each worker process owns exactly one [`ShardRecorder`]. Results accumulate
//! in memory while tests run; screenshots go straight to the content-addressed
//! [`ImageStore`](crate::store::ImageStore). `finalize` serializes the whole
//! shard to a temporary file and renames it into place, so a crash mid-run
//! never leaves a half-written shard visible to the registry: the worker
//! simply never reported.
//!
//! A marker file under `workers/` signals that this worker is active; it is
//! removed as the last step of `finalize`. Stale markers are how the
//! coordinator names workers that died without reporting.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::config::{RecorderConfig, IMAGE_DIR};
use crate::report::types::{
    FailureDetail, ImageRef, ResultShard, TestResult, TestStatus, SHARD_FORMAT_VERSION,
};
use crate::store::{ImageStore, StoreError};

/// Handle to a test opened with [`ShardRecorder::begin_test`].
///
/// Consumed by `end_test`/`abandon`, so a sealed test cannot be appended to.
#[derive(Debug)]
pub struct TestHandle(usize);

impl TestHandle {
    fn index(&self) -> usize {
        self.0
    }
}

/// Result type for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Error types for recorder operations
#[derive(Debug)]
pub enum RecorderError {
    /// Image store failure
    Store(StoreError),

    /// I/O error writing shard or marker files
    Io(std::io::Error),

    /// Shard serialization error
    Serialization(serde_json::Error),

    /// The handle does not refer to an open test
    StaleHandle,
}

impl std::fmt::Display for RecorderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderError::Store(err) => write!(f, "Store error: {}", err),
            RecorderError::Io(err) => write!(f, "I/O error: {}", err),
            RecorderError::Serialization(err) => write!(f, "Serialization error: {}", err),
            RecorderError::StaleHandle => write!(f, "handle does not refer to an open test"),
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecorderError::Store(err) => Some(err),
            RecorderError::Io(err) => Some(err),
            RecorderError::Serialization(err) => Some(err),
            RecorderError::StaleHandle => None,
        }
    }
}

impl From<StoreError> for RecorderError {
    fn from(err: StoreError) -> Self {
        RecorderError::Store(err)
    }
}

impl From<std::io::Error> for RecorderError {
    fn from(err: std::io::Error) -> Self {
        RecorderError::Io(err)
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(err: serde_json::Error) -> Self {
        RecorderError::Serialization(err)
    }
}

/// Append-only recorder for one worker's shard
#[derive(Debug)]
pub struct ShardRecorder {
    shard_id: String,
    started_at: DateTime<Utc>,
    store: ImageStore,
    shards_dir: PathBuf,
    marker_path: PathBuf,
    open: Vec<Option<TestResult>>,
    sealed: Vec<TestResult>,
}

impl ShardRecorder {
    /// Create a recorder with an auto-generated shard id.
    ///
    /// The id is zero-padded start-time millis, hostname, and pid, so
    /// lexicographic order over shard ids is worker start order. That is the
    /// total order the merge sorts by.
    pub fn new(config: &RecorderConfig) -> RecorderResult<Self> {
        Self::with_id(config, &generate_shard_id())
    }

    /// Create a recorder with an explicit shard id
    pub fn with_id(config: &RecorderConfig, shard_id: &str) -> RecorderResult<Self> {
        let store = ImageStore::open(config.images_dir())?;
        let shards_dir = config.shards_dir();
        let workers_dir = config.workers_dir();
        fs::create_dir_all(&shards_dir)?;
        fs::create_dir_all(&workers_dir)?;

        let marker_path = workers_dir.join(shard_id);
        fs::write(&marker_path, shard_id)?;

        Ok(Self {
            shard_id: shard_id.to_string(),
            started_at: Utc::now(),
            store,
            shards_dir,
            marker_path,
            open: Vec::new(),
            sealed: Vec::new(),
        })
    }

    /// This worker's shard identifier
    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// The image store backing this recorder
    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Open a new test result and return its handle
    pub fn begin_test(&mut self, name: &str) -> TestHandle {
        self.open.push(Some(TestResult::begin(name)));
        TestHandle(self.open.len() - 1)
    }

    /// Attach a human description (the runner's docstring) to an open test
    pub fn describe_test(&mut self, handle: &TestHandle, description: &str) -> RecorderResult<()> {
        let test = self.open_mut(handle)?;
        test.description = Some(description.to_string());
        Ok(())
    }

    /// Store a screenshot and append its reference to an open test.
    ///
    /// When no caption is given, one is derived from the test name and the
    /// image's capture ordinal.
    pub fn record_image(
        &mut self,
        handle: &TestHandle,
        bytes: &[u8],
        caption: Option<&str>,
        is_error: bool,
    ) -> RecorderResult<ImageRef> {
        let stored = self.store.store(bytes)?;
        self.push_image(handle, stored, caption, is_error)
    }

    /// Like [`record_image`](Self::record_image), for base64 payloads as
    /// delivered by webdriver screenshot APIs
    pub fn record_image_base64(
        &mut self,
        handle: &TestHandle,
        data: &str,
        caption: Option<&str>,
        is_error: bool,
    ) -> RecorderResult<ImageRef> {
        let stored = self.store.store_base64(data)?;
        self.push_image(handle, stored, caption, is_error)
    }

    fn push_image(
        &mut self,
        handle: &TestHandle,
        stored: crate::store::StoredImage,
        caption: Option<&str>,
        is_error: bool,
    ) -> RecorderResult<ImageRef> {
        let test = self.open_mut(handle)?;
        let caption = caption
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} step {}", test.name, test.images.len() + 1));
        let image = ImageRef {
            fingerprint: stored.fingerprint,
            file: format!("{}/{}", IMAGE_DIR, stored.file_name),
            caption: Some(caption),
            is_error,
            captured_at: Utc::now(),
        };
        test.images.push(image.clone());
        Ok(image)
    }

    /// Seal an open test with its final status and append it to the shard
    pub fn end_test(
        &mut self,
        handle: TestHandle,
        status: TestStatus,
        failure: Option<FailureDetail>,
    ) -> RecorderResult<()> {
        let mut test = self
            .open
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(RecorderError::StaleHandle)?;
        test.seal(status, failure);
        self.sealed.push(test);
        Ok(())
    }

    /// Seal a test whose browser session never came up.
    ///
    /// Setup failures are recorded as `never_started`, not dropped from the
    /// report.
    pub fn abandon(&mut self, handle: TestHandle, failure: Option<FailureDetail>) -> RecorderResult<()> {
        self.end_test(handle, TestStatus::NeverStarted, failure)
    }

    /// Tests sealed so far
    pub fn sealed_count(&self) -> usize {
        self.sealed.len()
    }

    /// Serialize the shard and rename it into the registry's view.
    ///
    /// Tests still open at this point (abnormal teardown) are sealed as
    /// `never_started` first. The worker marker is removed last, after the
    /// shard is durable.
    pub fn finalize(mut self) -> RecorderResult<PathBuf> {
        for slot in std::mem::take(&mut self.open) {
            if let Some(mut test) = slot {
                test.seal(TestStatus::NeverStarted, None);
                self.sealed.push(test);
            }
        }

        let shard = ResultShard {
            format_version: SHARD_FORMAT_VERSION,
            shard_id: self.shard_id.clone(),
            started_at: self.started_at,
            finalized_at: Utc::now(),
            results: std::mem::take(&mut self.sealed),
        };

        let tmp_path = self.shards_dir.join(format!("{}.json.tmp", self.shard_id));
        let final_path = self.shards_dir.join(format!("{}.json", self.shard_id));
        fs::write(&tmp_path, serde_json::to_string_pretty(&shard)?)?;
        fs::rename(&tmp_path, &final_path)?;
        fs::remove_file(&self.marker_path)?;

        Ok(final_path)
    }

    fn open_mut(&mut self, handle: &TestHandle) -> RecorderResult<&mut TestResult> {
        self.open
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or(RecorderError::StaleHandle)
    }
}

/// Shard id: start millis, hostname, pid; lexicographically sortable by start time
fn generate_shard_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0);
    let host = hostname::get()
        .map(|h| sanitize(&h.to_string_lossy()))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{:013}-{}-{}", millis, host, std::process::id())
}

/// Restrict a name to filename-safe characters
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
