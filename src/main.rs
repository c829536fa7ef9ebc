use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use web_recorder::config::RecorderConfig;
use web_recorder::coordinator::ReportCoordinator;
use web_recorder::report::types::{AggregateReport, TestStatus, REPORT_FORMAT_VERSION};
use web_recorder::store::ImageStore;

/// Web Recorder - browser acceptance-test report aggregation
#[derive(Parser, Debug)]
#[command(
    name = "web-recorder",
    about = "Aggregate multi-worker browser test shards into a single report",
    after_help = "ENVIRONMENT VARIABLES:\n\
        WEB_RECORDER_REPORT_DIR        Report directory\n\
        WEB_RECORDER_TITLE             Report title\n\
        WEB_RECORDER_EXPECTED_SHARDS   Worker count to wait for\n\
        WEB_RECORDER_WAIT_BUDGET_SECS  Aggregation wait budget (s)\n\
        WEB_RECORDER_POLL_INTERVAL_MS  Shard poll interval (ms)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Elect an aggregator and merge all finalized shards into report.json
    Aggregate {
        /// Report directory containing shards/ and images/
        #[arg(short, long, env = "WEB_RECORDER_REPORT_DIR", default_value = "./webdriver-report")]
        report_dir: PathBuf,

        /// Title stamped into the report
        #[arg(short, long, env = "WEB_RECORDER_TITLE", default_value = "Acceptance tests")]
        title: String,

        /// Number of worker shards to wait for (omit if unknown)
        #[arg(short, long, env = "WEB_RECORDER_EXPECTED_SHARDS")]
        expected: Option<usize>,

        /// Wait budget in seconds before producing a partial report
        #[arg(short, long, env = "WEB_RECORDER_WAIT_BUDGET_SECS", default_value = "60")]
        wait_budget: u64,

        /// Poll interval in milliseconds
        #[arg(short, long, env = "WEB_RECORDER_POLL_INTERVAL_MS", default_value = "250")]
        poll_interval: u64,

        /// Print the merged report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Print a summary of an existing report.json
    Inspect {
        /// Report directory (report.json is read from here)
        #[arg(short, long, env = "WEB_RECORDER_REPORT_DIR", default_value = "./webdriver-report")]
        report_dir: PathBuf,
    },

    /// Verify that every image the report references exists in the store
    Check {
        /// Report directory
        #[arg(short, long, env = "WEB_RECORDER_REPORT_DIR", default_value = "./webdriver-report")]
        report_dir: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Aggregate {
            report_dir,
            title,
            expected,
            wait_budget,
            poll_interval,
            json,
        }) => {
            let mut config = RecorderConfig::new(&report_dir)
                .title(title)
                .wait_budget(Duration::from_secs(wait_budget))
                .poll_interval(Duration::from_millis(poll_interval));
            if let Some(expected) = expected {
                config = config.expected_shards(expected);
            }

            let mut coordinator = ReportCoordinator::new(&config);
            match coordinator.run()? {
                Some(report) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        print_summary(&report);
                        println!("\nReport: {}", config.report_path().display());
                    }
                }
                None => {
                    println!("Another worker holds the aggregation lock; nothing to do.");
                }
            }
        }

        Some(Commands::Inspect { report_dir }) => {
            let config = RecorderConfig::new(&report_dir);
            let report = read_report(&config)?;
            print_summary(&report);
            for entry in &report.entries {
                let status = match entry.result.status {
                    TestStatus::Passed => "passed",
                    TestStatus::Failed => "FAILED",
                    TestStatus::NeverStarted => "NEVER STARTED",
                };
                let duration = entry.result.duration.as_deref().unwrap_or("-");
                println!("  {:<40} {:<14} {:>8}  [{}]", entry.id, status, duration, entry.shard_id);
            }
        }

        Some(Commands::Check { report_dir }) => {
            let config = RecorderConfig::new(&report_dir);
            let report = read_report(&config)?;
            let store = ImageStore::open(config.images_dir())?;

            let missing: Vec<&String> = report
                .manifest
                .iter()
                .filter(|fingerprint| !store.contains(fingerprint))
                .collect();
            if missing.is_empty() {
                println!(
                    "All {} referenced images present in {}",
                    report.manifest.len(),
                    store.dir().display()
                );
            } else {
                for fingerprint in &missing {
                    eprintln!("missing image: {}", fingerprint);
                }
                return Err(format!("{} referenced images missing from the store", missing.len()).into());
            }
        }

        None => {
            println!("Web Recorder - browser acceptance-test report aggregation");
            println!();
            println!("Usage: web-recorder <COMMAND>");
            println!();
            println!("Commands:");
            println!("  aggregate  Elect an aggregator and merge shards into report.json");
            println!("  inspect    Print a summary of an existing report.json");
            println!("  check      Verify report image references against the store");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

fn read_report(config: &RecorderConfig) -> Result<AggregateReport, Box<dyn Error>> {
    let path = config.report_path();
    let data = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let report: AggregateReport = serde_json::from_str(&data)?;
    if report.format_version != REPORT_FORMAT_VERSION {
        return Err(format!(
            "report format version {} not supported (expected {})",
            report.format_version, REPORT_FORMAT_VERSION
        )
        .into());
    }
    Ok(report)
}

fn print_summary(report: &AggregateReport) {
    let outcome = match report.outcome {
        TestStatus::Passed => "passed",
        TestStatus::Failed => "failed",
        TestStatus::NeverStarted => "never started",
    };
    println!("{} ({})", report.title, outcome);
    println!(
        "  {} passed, {} failed, {} never started ({} tests, {} unique images)",
        report.summary.passed,
        report.summary.failed,
        report.summary.never_started,
        report.entries.len(),
        report.manifest.len()
    );
    println!(
        "  shards: {} merged{}",
        report.summary.merged_shards,
        report
            .summary
            .expected_shards
            .map(|n| format!(" of {} expected", n))
            .unwrap_or_default()
    );
    if !report.summary.missing_shards.is_empty() {
        println!("  missing: {}", report.summary.missing_shards.join(", "));
    }
    if !report.summary.unreadable_shards.is_empty() {
        println!("  unreadable: {}", report.summary.unreadable_shards.join(", "));
    }
    if report.summary.partial {
        println!("  PARTIAL: wait budget elapsed before all workers reported");
    }
}
