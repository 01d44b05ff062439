use crate::suite::SuiteLog;
use crate::FatalError;
use std::time::{Duration, Instant};
use tracing::warn;
use tsuite_core::TestResult;

pub const LONG_RUNNING_THRESHOLD: Duration = Duration::from_secs(60);

/// Folds per-version outcomes left to right. A timeout wins outright, the
/// first failure beats any success, otherwise the first outcome stands.
pub fn fold_outcomes<I>(outcomes: I) -> Option<TestResult>
where
    I: IntoIterator<Item = TestResult>,
{
    let mut outcomes = outcomes.into_iter();
    let mut verdict = outcomes.next()?;
    for outcome in outcomes {
        if outcome.is_timeout() || (outcome.is_failure() && !verdict.is_failure()) {
            verdict = outcome;
        }
    }
    Some(verdict)
}

/// Keeps a test in the active set for as long as it lives.
pub struct ActiveTestGuard<'a> {
    log: &'a SuiteLog,
    path: String,
}

impl<'a> ActiveTestGuard<'a> {
    pub fn new(log: &'a SuiteLog, path: &str) -> Self {
        log.register_active(path);
        Self {
            log,
            path: path.to_string(),
        }
    }
}

impl Drop for ActiveTestGuard<'_> {
    fn drop(&mut self) {
        self.log.deregister_active(&self.path);
    }
}

pub struct TestTask<'a> {
    path: &'a str,
    log: &'a SuiteLog,
    min_version: u32,
    verbose: bool,
}

impl<'a> TestTask<'a> {
    pub fn new(path: &'a str, log: &'a SuiteLog, min_version: u32, verbose: bool) -> Self {
        Self {
            path,
            log,
            min_version,
            verbose,
        }
    }

    /// Runs `per_version` once for every version at or above the floor, in
    /// order. `Ok(None)` means nothing was applicable and the test counts as
    /// skipped.
    pub fn run<F>(&self, versions: &[u32], mut per_version: F) -> Result<Option<TestResult>, FatalError>
    where
        F: FnMut(u32) -> Result<TestResult, FatalError>,
    {
        let applicable: Vec<u32> = versions
            .iter()
            .copied()
            .filter(|v| *v >= self.min_version)
            .collect();
        if applicable.is_empty() {
            return Ok(None);
        }

        let _active = ActiveTestGuard::new(self.log, self.path);
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(applicable.len());
        for version in applicable {
            outcomes.push(per_version(version)?);
        }
        let elapsed = started.elapsed();

        if self.verbose {
            self.log
                .line(&format!("{} finished in {} ms", self.path, elapsed.as_millis()));
        }
        if elapsed > LONG_RUNNING_THRESHOLD {
            warn!(
                path = self.path,
                seconds = elapsed.as_secs(),
                "test ran longer than {} seconds",
                LONG_RUNNING_THRESHOLD.as_secs()
            );
        }
        Ok(fold_outcomes(outcomes))
    }
}
