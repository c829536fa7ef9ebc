//! Deterministic merge of finalized shards into one aggregate report.
//!
//! The merge is a pure function of its inputs: given the same shard set and
//! the same bookkeeping, repeated merges produce byte-identical output.
//! Callers (the coordinator, tests) supply shards in any order; ordering is
//! normalized here.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::report::types::{
    AggregateReport, ReportEntry, ResultShard, RunSummary, TestStatus, REPORT_FORMAT_VERSION,
};

/// Bookkeeping about shards that could not contribute results
#[derive(Debug, Clone, Default)]
pub struct MergeGaps {
    /// Shard count the coordinator expected, when known
    pub expected_shards: Option<usize>,

    /// Workers that started but never finalized
    pub missing: Vec<String>,

    /// Finalized shard files that failed to parse
    pub unreadable: Vec<String>,

    /// True when the wait budget elapsed before the run completed
    pub partial: bool,
}

/// Merge finalized shards into a single aggregate report.
///
/// Results are ordered by shard id, then by in-shard sequence. When the same
/// test name occurs more than once in the run (parametrized or re-run cases,
/// within or across shards), later occurrences get a `-2`, `-3`, ... suffix
/// on their identifier; nothing is ever overwritten.
pub fn merge_shards(title: &str, shards: &[ResultShard], gaps: MergeGaps) -> AggregateReport {
    let mut ordered: Vec<&ResultShard> = shards.iter().collect();
    ordered.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));

    let mut entries = Vec::new();
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let mut manifest = BTreeSet::new();
    let mut summary = RunSummary {
        expected_shards: gaps.expected_shards,
        merged_shards: ordered.len(),
        missing_shards: sorted(gaps.missing),
        unreadable_shards: sorted(gaps.unreadable),
        partial: gaps.partial,
        ..RunSummary::default()
    };

    for shard in &ordered {
        for result in &shard.results {
            match result.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::NeverStarted => summary.never_started += 1,
            }
            for image in &result.images {
                manifest.insert(image.fingerprint.clone());
            }

            let seen = occurrences.entry(result.test_id.clone()).or_insert(0);
            *seen += 1;
            let id = if *seen == 1 {
                result.test_id.clone()
            } else {
                format!("{}-{}", result.test_id, seen)
            };

            entries.push(ReportEntry {
                id,
                shard_id: shard.shard_id.clone(),
                result: result.clone(),
            });
        }
    }

    let outcome = if entries.is_empty() {
        TestStatus::NeverStarted
    } else if summary.failed + summary.never_started > 0 {
        TestStatus::Failed
    } else {
        TestStatus::Passed
    };

    AggregateReport {
        format_version: REPORT_FORMAT_VERSION,
        title: title.to_string(),
        generated_at: newest_finalization(&ordered),
        outcome,
        entries,
        summary,
        manifest: manifest.into_iter().collect(),
    }
}

/// Latest shard finalization time, or the epoch for an empty merge
fn newest_finalization(shards: &[&ResultShard]) -> DateTime<Utc> {
    shards
        .iter()
        .map(|s| s.finalized_at)
        .max()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::{ImageRef, TestResult, SHARD_FORMAT_VERSION};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn shard(id: &str, results: Vec<TestResult>) -> ResultShard {
        ResultShard {
            format_version: SHARD_FORMAT_VERSION,
            shard_id: id.to_string(),
            started_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            finalized_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 5, 0).unwrap(),
            results,
        }
    }

    fn passed(name: &str) -> TestResult {
        let mut result = TestResult::begin(name);
        result.seal(TestStatus::Passed, None);
        result
    }

    fn failed(name: &str) -> TestResult {
        let mut result = TestResult::begin(name);
        result.seal(TestStatus::Failed, None);
        result
    }

    fn image(fingerprint: &str) -> ImageRef {
        ImageRef {
            fingerprint: fingerprint.to_string(),
            file: format!("images/{}.png", fingerprint),
            caption: None,
            is_error: false,
            captured_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap(),
        }
    }

    #[test]
    fn test_merge_orders_by_shard_id_then_sequence() {
        // Deliberately passed out of order
        let shards = vec![
            shard("w2", vec![passed("beta"), passed("gamma")]),
            shard("w1", vec![passed("alpha")]),
        ];

        let report = merge_shards("run", &shards, MergeGaps::default());
        let ids: Vec<&str> = report.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta", "gamma"]);
        let from: Vec<&str> = report.entries.iter().map(|e| e.shard_id.as_str()).collect();
        assert_eq!(from, vec!["w1", "w2", "w2"]);
    }

    #[test]
    fn test_merge_counts_statuses() {
        let mut never = TestResult::begin("broken");
        never.seal(TestStatus::NeverStarted, None);
        let shards = vec![
            shard("w1", vec![passed("a"), failed("b")]),
            shard("w2", vec![never]),
        ];

        let report = merge_shards("run", &shards, MergeGaps::default());
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.never_started, 1);
        assert_eq!(report.outcome, TestStatus::Failed);
    }

    #[test]
    fn test_merge_disambiguates_repeated_names() {
        let shards = vec![
            shard("w1", vec![passed("checkout")]),
            shard("w2", vec![passed("checkout"), passed("checkout")]),
        ];

        let report = merge_shards("run", &shards, MergeGaps::default());
        let ids: Vec<&str> = report.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["checkout", "checkout-2", "checkout-3"]);
    }

    #[test]
    fn test_merge_manifest_is_sorted_union() {
        let mut a = passed("a");
        a.images = vec![image("ff"), image("aa")];
        let mut b = passed("b");
        b.images = vec![image("aa"), image("bb")];

        let shards = vec![shard("w1", vec![a]), shard("w2", vec![b])];
        let report = merge_shards("run", &shards, MergeGaps::default());
        assert_eq!(report.manifest, vec!["aa", "bb", "ff"]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let shards = vec![
            shard("w2", vec![passed("beta")]),
            shard("w1", vec![failed("alpha"), passed("alpha")]),
        ];
        let gaps = MergeGaps {
            expected_shards: Some(3),
            missing: vec!["w3".to_string()],
            unreadable: vec![],
            partial: true,
        };

        let first = serde_json::to_string(&merge_shards("run", &shards, gaps.clone())).unwrap();
        let second = serde_json::to_string(&merge_shards("run", &shards, gaps)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_merge_empty_run_is_never_started() {
        let report = merge_shards("run", &[], MergeGaps::default());
        assert_eq!(report.outcome, TestStatus::NeverStarted);
        assert_eq!(report.entries.len(), 0);
        assert_eq!(report.generated_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_merge_records_gaps() {
        let shards = vec![shard("w1", vec![passed("a")])];
        let gaps = MergeGaps {
            expected_shards: Some(2),
            missing: vec!["w2".to_string()],
            unreadable: vec!["zz".to_string()],
            partial: true,
        };

        let report = merge_shards("run", &shards, gaps);
        assert_eq!(report.summary.expected_shards, Some(2));
        assert_eq!(report.summary.merged_shards, 1);
        assert_eq!(report.summary.missing_shards, vec!["w2"]);
        assert_eq!(report.summary.unreadable_shards, vec!["zz"]);
        assert!(report.summary.partial);
    }
}
