//! Two simulated workers record into one report directory; one aggregates.
//!
//! Run with: cargo run --example record_and_merge

use std::time::Duration;

use web_recorder::config::RecorderConfig;
use web_recorder::coordinator::ReportCoordinator;
use web_recorder::recorder::ShardRecorder;
use web_recorder::report::types::{FailureDetail, TestStatus};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RecorderConfig::new("./webdriver-report")
        .title("demo run")
        .expected_shards(2)
        .wait_budget(Duration::from_secs(5));

    // First worker: one passing test with a captioned screenshot
    let mut w1 = ShardRecorder::new(&config)?;
    let login = w1.begin_test("login");
    w1.record_image(&login, b"fake png bytes: login page", Some("login page"), false)?;
    w1.end_test(login, TestStatus::Passed, None)?;
    w1.finalize()?;

    // Second worker: a failing test with error evidence
    let mut w2 = ShardRecorder::new(&config)?;
    let logout = w2.begin_test("logout");
    w2.record_image(&logout, b"fake png bytes: error banner", None, true)?;
    let failure = FailureDetail::new("logout button never appeared", "BrowserError")
        .url("https://example.com/logout");
    w2.end_test(logout, TestStatus::Failed, Some(failure))?;
    w2.finalize()?;

    // Both workers are done; whoever gets here first aggregates
    match ReportCoordinator::new(&config).run()? {
        Some(report) => {
            println!(
                "merged {} tests: {} passed, {} failed",
                report.entries.len(),
                report.summary.passed,
                report.summary.failed
            );
            println!("report at {}", config.report_path().display());
        }
        None => println!("another worker is aggregating"),
    }
    Ok(())
}
