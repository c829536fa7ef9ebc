// Core data model for shard and report files

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version stamp written into every shard file; readers reject other versions
pub const SHARD_FORMAT_VERSION: u32 = 1;

/// Version stamp written into report.json
pub const REPORT_FORMAT_VERSION: u32 = 1;

/// Reference to a screenshot held by the image store.
///
/// The payload bytes live in `images/<fingerprint>.<ext>`, stored once and
/// referenced from here by fingerprint. Shards never embed image data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// SHA-256 hex digest of the raw image bytes
    pub fingerprint: String,

    /// Path of the stored file, relative to the report root (e.g. "images/ab12....png")
    pub file: String,

    /// Caption shown next to the image; auto-derived from the test name when
    /// the caller does not supply one
    pub caption: Option<String>,

    /// Marks the image as evidence of a failure
    pub is_error: bool,

    /// When the screenshot was captured
    pub captured_at: DateTime<Utc>,
}

/// Outcome of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Test ran to completion successfully
    Passed,

    /// Test ran and failed an assertion or browser step
    Failed,

    /// Test never produced a browser session (setup failure, worker death)
    NeverStarted,
}

/// Structured failure summary handed to the renderer.
///
/// Deliberately flat: a message and the originating error kind rather than a
/// captured exception chain, so the boundary stays language-neutral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Human-readable description of what went wrong
    pub message: String,

    /// Short classification of the originating error (e.g. "BrowserError", "Timeout")
    pub kind: String,

    /// URL the browser was on when the failure occurred, if known
    pub url: Option<String>,

    /// Browser console lines captured around the failure
    #[serde(default)]
    pub log_lines: Vec<String>,
}

impl FailureDetail {
    /// Create a failure detail with just a message and kind
    pub fn new(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
            url: None,
            log_lines: Vec::new(),
        }
    }

    /// Attach the URL the browser was on
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Attach captured console lines
    pub fn log_lines(mut self, lines: Vec<String>) -> Self {
        self.log_lines = lines;
        self
    }
}

/// One test case's recorded outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test name as reported by the runner; unique within a worker, may
    /// collide across workers for parametrized or retried cases
    pub name: String,

    /// Slug derived from the name, safe for anchors and filenames
    pub test_id: String,

    /// Human description of the test (the runner's docstring), if any
    pub description: Option<String>,

    /// Final status; stays `never_started` until the test is sealed
    pub status: TestStatus,

    /// Screenshot references in capture order
    pub images: Vec<ImageRef>,

    /// Failure summary, present when status is not `passed`
    pub failure: Option<FailureDetail>,

    /// When the test began
    pub started_at: DateTime<Utc>,

    /// When the test was sealed; absent only while still running
    pub ended_at: Option<DateTime<Utc>>,

    /// Human-readable duration slug (e.g. "2m 10s"), stamped at seal time
    pub duration: Option<String>,
}

impl TestResult {
    /// Open a new result for a test that is about to run
    pub fn begin(name: impl Into<String>) -> Self {
        let name = name.into();
        let test_id = slugify(&name);
        Self {
            name,
            test_id,
            description: None,
            status: TestStatus::NeverStarted,
            images: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            ended_at: None,
            duration: None,
        }
    }

    /// Seal the result with a final status, stamping end time and duration
    pub fn seal(&mut self, status: TestStatus, failure: Option<FailureDetail>) {
        let ended = Utc::now();
        self.status = status;
        self.failure = failure;
        self.duration = Some(duration_slug(self.started_at, ended));
        self.ended_at = Some(ended);
    }
}

/// One worker's complete, ordered record of its own tests.
///
/// Written exactly once by the owning worker via an atomic rename; the
/// presence of the finalized file is the completion marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultShard {
    /// Schema version, checked against [`SHARD_FORMAT_VERSION`] on read
    pub format_version: u32,

    /// Identifier of the worker that produced this shard; lexicographic
    /// order over shard ids is worker start order
    pub shard_id: String,

    /// When the worker started recording
    pub started_at: DateTime<Utc>,

    /// When the shard was finalized
    pub finalized_at: DateTime<Utc>,

    /// Test results in the order they were sealed
    pub results: Vec<TestResult>,
}

/// One test's entry in the aggregate, keyed by a run-unique identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Run-unique identifier: the test slug, suffixed with an occurrence
    /// counter when the same name appears more than once in the run
    pub id: String,

    /// Shard this result came from
    pub shard_id: String,

    /// The recorded result
    pub result: TestResult,
}

/// Aggregate bookkeeping: counts plus shard-level gaps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub never_started: usize,

    /// Shard count the coordinator was told to wait for, when known
    pub expected_shards: Option<usize>,

    /// Shards that parsed and merged
    pub merged_shards: usize,

    /// Workers that started but never finalized a shard
    pub missing_shards: Vec<String>,

    /// Finalized shard files that failed to parse and were excluded
    pub unreadable_shards: Vec<String>,

    /// True when the wait budget elapsed before the run was complete
    pub partial: bool,
}

/// The merged, run-wide report handed to the external renderer.
///
/// Plain data only. Persisted to report.json before any rendering happens,
/// so raw results survive a renderer failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Schema version, checked against [`REPORT_FORMAT_VERSION`] on read
    pub format_version: u32,

    /// Run title shown by the renderer
    pub title: String,

    /// Stamped from the newest shard finalization, so identical shard sets
    /// serialize identically
    pub generated_at: DateTime<Utc>,

    /// Overall outcome: `failed` if any test failed or never started,
    /// `never_started` for an empty run, `passed` otherwise
    pub outcome: TestStatus,

    /// All results, ordered by shard id then in-shard sequence
    pub entries: Vec<ReportEntry>,

    pub summary: RunSummary,

    /// Sorted, deduplicated fingerprints of every referenced image
    pub manifest: Vec<String>,
}

impl AggregateReport {
    /// Entries whose tests did not pass
    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|e| e.result.status != TestStatus::Passed)
    }

    /// Number of tests that did not pass
    pub fn num_failures(&self) -> usize {
        self.failures().count()
    }
}

/// Derive an anchor-safe slug from a test name.
///
/// Non-word characters collapse to single dashes; trailing dashes are
/// trimmed. "test_checkout[case 2]" becomes "test_checkout-case-2".
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    if slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Render an elapsed span as a minutes/seconds slug, e.g. "2m 10s"
pub fn duration_slug(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let total = (end - start).num_seconds().max(0);
    let minutes = total / 60;
    let seconds = total % 60;
    if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
