//! Aggregator election and the merge protocol.
//!
//! Every worker runs a [`ReportCoordinator`] after finishing its own tests.
//! Exactly one wins the non-blocking advisory lock on `.aggregation.lock`
//! and becomes the aggregator; the rest are done the moment they lose.
//!
//! The winner polls the registry at a short fixed interval until the run is
//! complete or its wait budget elapses, then merges whatever finalized
//! shards exist and persists `report.json` atomically. A timeout produces a
//! partial report with missing-shard bookkeeping, never an error; only a
//! lock resource nobody can acquire is fatal.
//!
//! The state machine is explicit and the lock and clock are injectable, so
//! election and timeout logic are testable without real filesystem timing.

use std::fs;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::RecorderConfig;
use crate::registry::{RegistryError, ShardRegistry};
use crate::report::merge::{merge_shards, MergeGaps};
use crate::report::types::AggregateReport;

/// Coordinator protocol states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Not yet attempted election
    Waiting,

    /// Won the election; waiting for shards
    Elected,

    /// Run complete within budget; merging all shards
    Merging,

    /// Wait budget elapsed; merging the incomplete shard set
    Partial,

    /// Finished: merged and persisted, or lost the election
    Done,
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Error types for coordinator operations
#[derive(Debug)]
pub enum CoordinatorError {
    /// The election resource itself cannot be acquired by anyone; fatal
    LockUnavailable(std::io::Error),

    /// Registry scan failure
    Registry(RegistryError),

    /// I/O error persisting the report
    Io(std::io::Error),

    /// Report serialization error
    Serialization(serde_json::Error),

    /// A step was invoked from the wrong state
    InvalidState(CoordinatorState),
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorError::LockUnavailable(err) => {
                write!(f, "election lock unavailable: {}", err)
            }
            CoordinatorError::Registry(err) => write!(f, "Registry error: {}", err),
            CoordinatorError::Io(err) => write!(f, "I/O error: {}", err),
            CoordinatorError::Serialization(err) => write!(f, "Serialization error: {}", err),
            CoordinatorError::InvalidState(state) => {
                write!(f, "coordinator step invoked in state {:?}", state)
            }
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoordinatorError::LockUnavailable(err) => Some(err),
            CoordinatorError::Registry(err) => Some(err),
            CoordinatorError::Io(err) => Some(err),
            CoordinatorError::Serialization(err) => Some(err),
            CoordinatorError::InvalidState(_) => None,
        }
    }
}

impl From<RegistryError> for CoordinatorError {
    fn from(err: RegistryError) -> Self {
        CoordinatorError::Registry(err)
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Serialization(err)
    }
}

/// Source of time for the poll loop; injectable for tests
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time and real sleeping
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The election resource; injectable for tests.
///
/// `try_acquire` must be non-blocking: `Ok(false)` is the normal losing
/// path, an `Err` means the resource itself is inaccessible.
pub trait Election {
    fn try_acquire(&mut self) -> std::io::Result<bool>;
}

/// Election via an exclusive advisory lock on a file in the report
/// directory. The lock is held for the life of this value (the open file
/// descriptor), which is the rest of the coordinating process.
#[derive(Debug)]
pub struct FileElection {
    path: PathBuf,
    guard: Option<fs::File>,
}

impl FileElection {
    /// Election over the config's `.aggregation.lock`
    pub fn new(config: &RecorderConfig) -> Self {
        Self { path: config.lock_path(), guard: None }
    }
}

#[cfg(unix)]
impl Election for FileElection {
    fn try_acquire(&mut self) -> std::io::Result<bool> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            self.guard = Some(file);
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

#[cfg(not(unix))]
impl Election for FileElection {
    // No flock off unix; exclusive creation of the lock file decides the
    // election instead. The winner keeps the file for the life of the run.
    fn try_acquire(&mut self) -> std::io::Result<bool> {
        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(file) => {
                self.guard = Some(file);
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Elects an aggregator, waits (bounded) for shards, merges, persists
#[derive(Debug)]
pub struct ReportCoordinator<E: Election, C: Clock> {
    config: RecorderConfig,
    registry: ShardRegistry,
    election: E,
    clock: C,
    state: CoordinatorState,
}

impl ReportCoordinator<FileElection, SystemClock> {
    /// Coordinator over the real filesystem lock and wall clock
    pub fn new(config: &RecorderConfig) -> Self {
        let election = FileElection::new(config);
        Self::with_parts(config, election, SystemClock)
    }
}

impl<E: Election, C: Clock> ReportCoordinator<E, C> {
    /// Coordinator with an injected lock and clock
    pub fn with_parts(config: &RecorderConfig, election: E, clock: C) -> Self {
        Self {
            config: config.clone(),
            registry: ShardRegistry::new(&config.report_dir),
            election,
            clock,
            state: CoordinatorState::Waiting,
        }
    }

    /// Current protocol state
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Attempt to become the aggregator.
    ///
    /// Losing is normal control flow: the worker's own shard is already
    /// durable, and aggregation is someone else's job.
    pub fn try_elect(&mut self) -> CoordinatorResult<bool> {
        if self.state != CoordinatorState::Waiting {
            return Err(CoordinatorError::InvalidState(self.state));
        }
        match self.election.try_acquire() {
            Ok(true) => {
                self.state = CoordinatorState::Elected;
                Ok(true)
            }
            Ok(false) => {
                self.state = CoordinatorState::Done;
                Ok(false)
            }
            Err(err) => Err(CoordinatorError::LockUnavailable(err)),
        }
    }

    /// Poll the registry until the run is complete or the wait budget
    /// elapses. Returns true when the full shard set arrived in time.
    ///
    /// Completion means the finalized count reached `expected_shards` when
    /// that is known, or no active-worker markers remain when it is not.
    pub fn await_shards(&mut self) -> CoordinatorResult<bool> {
        if self.state != CoordinatorState::Elected {
            return Err(CoordinatorError::InvalidState(self.state));
        }

        let deadline = self.clock.now() + self.config.wait_budget;
        loop {
            let finalized = self.registry.list_finalized_shards()?;
            let complete = match self.config.expected_shards {
                Some(expected) => finalized.len() >= expected,
                None => self.registry.active_workers()?.is_empty(),
            };
            if complete {
                self.state = CoordinatorState::Merging;
                return Ok(true);
            }
            if self.clock.now() >= deadline {
                self.state = CoordinatorState::Partial;
                return Ok(false);
            }
            self.clock.sleep(self.config.poll_interval);
        }
    }

    /// Merge every readable finalized shard and persist `report.json`.
    ///
    /// Corrupt shards are excluded and bookkept, never fatal. Workers whose
    /// markers are still present are recorded as missing.
    pub fn merge_and_write(&mut self) -> CoordinatorResult<AggregateReport> {
        let partial = match self.state {
            CoordinatorState::Merging => false,
            CoordinatorState::Partial => true,
            state => return Err(CoordinatorError::InvalidState(state)),
        };

        let (shards, unreadable) = self.registry.read_all()?;
        let missing = self.registry.active_workers()?;
        let gaps = MergeGaps {
            expected_shards: self.config.expected_shards,
            missing,
            unreadable,
            partial,
        };
        let report = merge_shards(&self.config.title, &shards, gaps);

        let path = self.config.report_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&report)?).map_err(CoordinatorError::Io)?;
        fs::rename(&tmp, &path).map_err(CoordinatorError::Io)?;

        self.state = CoordinatorState::Done;
        Ok(report)
    }

    /// Run the whole protocol: elect, wait, merge, persist.
    ///
    /// Returns `None` when this worker lost the election.
    pub fn run(&mut self) -> CoordinatorResult<Option<AggregateReport>> {
        if !self.try_elect()? {
            return Ok(None);
        }
        self.await_shards()?;
        Ok(Some(self.merge_and_write()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::ShardRecorder;
    use crate::report::types::TestStatus;
    use std::cell::RefCell;
    use tempfile::tempdir;

    /// Clock that only advances when the coordinator sleeps
    struct FakeClock {
        now: RefCell<Instant>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self { now: RefCell::new(Instant::now()) }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            *self.now.borrow()
        }

        fn sleep(&self, duration: Duration) {
            let mut now = self.now.borrow_mut();
            *now += duration;
        }
    }

    /// Election with a scripted outcome
    struct FakeElection {
        outcome: std::io::Result<bool>,
    }

    impl Election for FakeElection {
        fn try_acquire(&mut self) -> std::io::Result<bool> {
            match &self.outcome {
                Ok(won) => Ok(*won),
                Err(err) => Err(std::io::Error::new(err.kind(), err.to_string())),
            }
        }
    }

    fn coordinator(
        config: &RecorderConfig,
        won: bool,
    ) -> ReportCoordinator<FakeElection, FakeClock> {
        ReportCoordinator::with_parts(
            config,
            FakeElection { outcome: Ok(won) },
            FakeClock::new(),
        )
    }

    fn fast_config(dir: &std::path::Path) -> RecorderConfig {
        RecorderConfig::new(dir)
            .wait_budget(Duration::from_millis(100))
            .poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_losing_election_is_done_without_report() {
        let dir = tempdir().unwrap();
        let config = fast_config(dir.path());
        let mut coord = coordinator(&config, false);

        let report = coord.run().unwrap();
        assert!(report.is_none());
        assert_eq!(coord.state(), CoordinatorState::Done);
        assert!(!config.report_path().exists());
    }

    #[test]
    fn test_inaccessible_lock_is_fatal() {
        let dir = tempdir().unwrap();
        let config = fast_config(dir.path());
        let mut coord = ReportCoordinator::with_parts(
            &config,
            FakeElection {
                outcome: Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "lock dir not writable",
                )),
            },
            FakeClock::new(),
        );

        assert!(matches!(coord.run(), Err(CoordinatorError::LockUnavailable(_))));
        assert!(!config.report_path().exists());
    }

    #[test]
    fn test_complete_run_reaches_merging_then_done() {
        let dir = tempdir().unwrap();
        let config = fast_config(dir.path()).expected_shards(1);
        let mut recorder = ShardRecorder::with_id(&config, "w1").unwrap();
        let handle = recorder.begin_test("test_a");
        recorder.end_test(handle, TestStatus::Passed, None).unwrap();
        recorder.finalize().unwrap();

        let mut coord = coordinator(&config, true);
        assert!(coord.try_elect().unwrap());
        assert_eq!(coord.state(), CoordinatorState::Elected);

        assert!(coord.await_shards().unwrap());
        assert_eq!(coord.state(), CoordinatorState::Merging);

        let report = coord.merge_and_write().unwrap();
        assert_eq!(coord.state(), CoordinatorState::Done);
        assert!(!report.summary.partial);
        assert_eq!(report.summary.passed, 1);
        assert!(config.report_path().exists());
    }

    #[test]
    fn test_wait_budget_expiry_goes_partial() {
        let dir = tempdir().unwrap();
        let config = fast_config(dir.path()).expected_shards(2);
        ShardRecorder::with_id(&config, "w1").unwrap().finalize().unwrap();

        let mut coord = coordinator(&config, true);
        coord.try_elect().unwrap();
        assert!(!coord.await_shards().unwrap());
        assert_eq!(coord.state(), CoordinatorState::Partial);

        let report = coord.merge_and_write().unwrap();
        assert!(report.summary.partial);
        assert_eq!(report.summary.merged_shards, 1);
    }

    #[test]
    fn test_unknown_count_completes_when_no_markers_remain() {
        let dir = tempdir().unwrap();
        let config = fast_config(dir.path());
        ShardRecorder::with_id(&config, "w1").unwrap().finalize().unwrap();

        let mut coord = coordinator(&config, true);
        coord.try_elect().unwrap();
        assert!(coord.await_shards().unwrap());
        assert_eq!(coord.state(), CoordinatorState::Merging);
    }

    #[test]
    fn test_unknown_count_stale_marker_times_out_and_names_missing() {
        let dir = tempdir().unwrap();
        let config = fast_config(dir.path());
        ShardRecorder::with_id(&config, "w1").unwrap().finalize().unwrap();
        // w2 starts but never finalizes
        let crashed = ShardRecorder::with_id(&config, "w2").unwrap();
        drop(crashed);

        let mut coord = coordinator(&config, true);
        let report = coord.run().unwrap().unwrap();
        assert!(report.summary.partial);
        assert_eq!(report.summary.missing_shards, vec!["w2"]);
        assert_eq!(report.entries.len(), 1);
    }

    #[test]
    fn test_steps_reject_wrong_state() {
        let dir = tempdir().unwrap();
        let config = fast_config(dir.path());
        let mut coord = coordinator(&config, true);

        assert!(matches!(coord.await_shards(), Err(CoordinatorError::InvalidState(_))));
        assert!(matches!(coord.merge_and_write(), Err(CoordinatorError::InvalidState(_))));
    }
}
