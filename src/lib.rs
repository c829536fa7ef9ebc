//! Web Recorder - browser acceptance-test recording with multi-worker
//! report aggregation.
//!
//! This crate provides:
//! - Content-addressed screenshot storage with cross-worker dedup
//! - Per-worker, crash-safe shard recording (atomic rename finalization)
//! - Shard discovery and run-completion detection over a shared directory
//! - Single-aggregator election via a non-blocking advisory lock
//! - Deterministic merge of all shards into one `report.json`
//!
//! # Example
//!
//! ```rust,no_run
//! use web_recorder::config::RecorderConfig;
//! use web_recorder::coordinator::ReportCoordinator;
//! use web_recorder::recorder::ShardRecorder;
//! use web_recorder::report::TestStatus;
//!
//! let config = RecorderConfig::new("./webdriver-report").expected_shards(1);
//! let mut recorder = ShardRecorder::new(&config).unwrap();
//!
//! let handle = recorder.begin_test("test_login");
//! recorder.record_image(&handle, b"<png bytes>", Some("login page"), false).unwrap();
//! recorder.end_test(handle, TestStatus::Passed, None).unwrap();
//! recorder.finalize().unwrap();
//!
//! // After its own tests, every worker offers to aggregate; one wins.
//! if let Some(report) = ReportCoordinator::new(&config).run().unwrap() {
//!     println!("{} tests merged", report.entries.len());
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod recorder;
pub mod registry;
pub mod report;
pub mod store;

// Re-export configuration
pub use config::RecorderConfig;

// Re-export the data model and merge
pub use report::{
    merge_shards, AggregateReport, FailureDetail, ImageRef, MergeGaps, ReportEntry, ResultShard,
    RunSummary, TestResult, TestStatus,
};

// Re-export recording types
pub use recorder::{RecorderError, RecorderResult, ShardRecorder, TestHandle};

// Re-export storage types
pub use store::{ImageStore, StoreError, StoreResult, StoredImage};

// Re-export registry types
pub use registry::{RegistryError, RegistryResult, ShardRegistry};

// Re-export the coordinator
pub use coordinator::{
    Clock, CoordinatorError, CoordinatorResult, CoordinatorState, Election, FileElection,
    ReportCoordinator, SystemClock,
};
