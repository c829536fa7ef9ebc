pub mod merge;
pub mod types;

pub use merge::{merge_shards, MergeGaps};
pub use types::{
    duration_slug, slugify, AggregateReport, FailureDetail, ImageRef, ReportEntry, ResultShard,
    RunSummary, TestResult, TestStatus, REPORT_FORMAT_VERSION, SHARD_FORMAT_VERSION,
};
