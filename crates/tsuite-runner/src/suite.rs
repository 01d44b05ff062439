use crate::console::{ask_yes_no, ProgressSink, Prompt};
use crate::report::{self, Tally};
use crate::resume;
use crate::task::TestTask;
use crate::{FatalError, SuiteError, TeardownPoison};
use crossbeam_channel::RecvTimeoutError;
use regex::Regex;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tsuite_core::{
    compare_paths, ConfigStore, Condition, ExpectedStatusDatabase, HostInfo, ResultSlots,
    RunConfiguration, Status, StoreError, TestDescriptor, TestResult, EXIT_GATE_FAILED,
    EXIT_NO_TESTS, EXIT_OK,
};
use walkdir::WalkDir;

/// What a concrete suite plugs into the orchestrator.
pub trait SuiteDefinition: Send + Sync {
    /// Regex matched against file names during discovery.
    fn test_file_pattern(&self) -> &str {
        r"\.js$"
    }

    fn is_test_executable(&self, _path: &Path) -> bool {
        true
    }

    /// Last adjustment of a reconciled descriptor before it is classified.
    fn setup_descriptor(&self, _descriptor: &mut TestDescriptor) {}

    /// Runs every applicable version of one test. `Ok(None)` means the test
    /// decided not to run at all.
    fn run_test(
        &self,
        ctx: &TestContext<'_>,
        descriptor: &TestDescriptor,
    ) -> Result<Option<TestResult>, FatalError>;
}

pub struct TestContext<'a> {
    pub config: &'a RunConfiguration,
    pub host: &'a HostInfo,
    pub log: &'a SuiteLog,
}

impl<'a> TestContext<'a> {
    pub fn task(&self, path: &'a str) -> TestTask<'a> {
        TestTask::new(
            path,
            self.log,
            self.config.min_version(),
            self.config.is_verbose(),
        )
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.config.resolve_test_path(path)
    }
}

struct LogState {
    text: Vec<String>,
    active: BTreeSet<String>,
    expected_failures: HashSet<String>,
}

/// One lock for status lines, the text report and the active-test registry.
pub struct SuiteLog {
    sink: Arc<dyn ProgressSink>,
    keep_text: bool,
    show_all_failures: bool,
    gate: bool,
    state: Mutex<LogState>,
}

impl SuiteLog {
    pub fn new(sink: Arc<dyn ProgressSink>, keep_text: bool) -> Self {
        Self {
            sink,
            keep_text,
            show_all_failures: false,
            gate: false,
            state: Mutex::new(LogState {
                text: Vec::new(),
                active: BTreeSet::new(),
                expected_failures: HashSet::new(),
            }),
        }
    }

    /// In gate mode only unexpected failures reach the sink unless
    /// `show_all_failures` is set.
    pub fn with_failure_policy(mut self, show_all_failures: bool, gate: bool) -> Self {
        self.show_all_failures = show_all_failures;
        self.gate = gate;
        self
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn line(&self, text: &str) {
        let mut state = self.state();
        self.sink.line(text);
        if self.keep_text {
            state.text.push(text.to_string());
        }
    }

    /// Writes consecutive lines without interleaving from other threads.
    pub fn block(&self, lines: &[String]) {
        let mut state = self.state();
        for text in lines {
            self.sink.line(text);
            if self.keep_text {
                state.text.push(text.clone());
            }
        }
    }

    pub fn fail(&self, path: &str, label: &str, reason: &str) {
        let reason = reason.replace('\n', " ").replace('\r', "");
        let message = format!("{} {} {}", label, path, reason).trim_end().to_string();
        let mut state = self.state();
        if !self.gate || self.show_all_failures || !state.expected_failures.contains(path) {
            self.sink.line(&message);
        }
        if self.keep_text {
            state.text.push(message);
        }
    }

    pub fn progress(&self, done: usize, total: usize, current: &str) {
        let _state = self.state();
        self.sink.progress(done, total, current);
    }

    pub fn expect_failures<I>(&self, paths: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.state().expected_failures.extend(paths);
    }

    pub fn register_active(&self, path: &str) {
        self.state().active.insert(path.to_string());
    }

    pub fn deregister_active(&self, path: &str) {
        self.state().active.remove(path);
    }

    pub fn active_tests(&self) -> Vec<String> {
        self.state().active.iter().cloned().collect()
    }

    pub fn text_lines(&self) -> Vec<String> {
        self.state().text.clone()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    pub passed: bool,
    pub unexpectedly_passed: Vec<String>,
    pub unexpectedly_failed: Vec<String>,
    pub database_updated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub suite: String,
    pub exit_code: i32,
    pub discovered: usize,
    pub elapsed_ms: u64,
    pub tally: Tally,
    pub gate: Option<GateOutcome>,
    /// Paths in the order they were handed to the scheduler.
    pub execution_order: Vec<String>,
}

struct Shared {
    definition: Arc<dyn SuiteDefinition>,
    config: Arc<RunConfiguration>,
    host: Arc<HostInfo>,
    log: Arc<SuiteLog>,
    descriptors: Vec<TestDescriptor>,
    slots: ResultSlots,
}

impl Shared {
    /// Runs one test and writes its slot. Panics become fatal errors.
    fn execute(&self, index: usize) -> Result<(), FatalError> {
        let descriptor = &self.descriptors[index];
        let ctx = TestContext {
            config: &self.config,
            host: &self.host,
            log: &self.log,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.definition.run_test(&ctx, descriptor)
        }))
        .unwrap_or_else(|payload| Err(panic_error(&descriptor.path, payload.as_ref())));
        match outcome? {
            Some(result) => {
                if self.slots.record(index, result).is_err() {
                    warn!(path = %descriptor.path, "result already recorded; keeping the first");
                }
            }
            None => debug!(path = %descriptor.path, "no applicable version; counted as skipped"),
        }
        Ok(())
    }
}

fn panic_error(path: &str, payload: &(dyn Any + Send)) -> FatalError {
    if let Some(TeardownPoison(message)) = payload.downcast_ref::<TeardownPoison>() {
        return FatalError::Poisoned {
            path: path.to_string(),
            message: message.clone(),
        };
    }
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    FatalError::WorkerPanic {
        path: path.to_string(),
        message,
    }
}

/// Drives one suite invocation from discovery to the gate decision.
pub struct SuiteRunner {
    definition: Arc<dyn SuiteDefinition>,
    config: Arc<RunConfiguration>,
    host: Arc<HostInfo>,
    store: Box<dyn ConfigStore>,
    prompt: Arc<dyn Prompt>,
    log: Arc<SuiteLog>,
    database: OnceLock<ExpectedStatusDatabase>,
}

impl SuiteRunner {
    pub fn new(
        definition: Arc<dyn SuiteDefinition>,
        config: RunConfiguration,
        host: HostInfo,
        store: Box<dyn ConfigStore>,
        sink: Arc<dyn ProgressSink>,
        prompt: Arc<dyn Prompt>,
    ) -> Self {
        let gate = config.run_on_gate() && !config.is_filter_set();
        let log = SuiteLog::new(sink, config.text_output())
            .with_failure_policy(config.is_verbose() || config.is_verbose_fail(), gate);
        Self {
            definition,
            config: Arc::new(config),
            host: Arc::new(host),
            store,
            prompt,
            log: Arc::new(log),
            database: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn log(&self) -> &SuiteLog {
        &self.log
    }

    fn gate_active(&self) -> bool {
        self.config.run_on_gate() && !self.config.is_filter_set()
    }

    pub fn run(&self) -> Result<RunSummary, SuiteError> {
        let started = Instant::now();
        let config = Arc::clone(&self.config);
        report::delete_previous(&[&config.text_report_path(), &config.html_report_path()])
            .map_err(|e| SuiteError::io(config.text_report_path(), e))?;
        if config.run_on_gate() && config.is_filter_set() {
            self.log
                .line("Warning: gate and filter mutually exclude each other!");
        }

        let paths = self.discover()?;
        if paths.is_empty() {
            self.log.line("Error: no test files found, exiting");
            return Ok(RunSummary {
                suite: config.suite_name().to_string(),
                exit_code: EXIT_NO_TESTS,
                discovered: 0,
                elapsed_ms: elapsed_ms(started),
                tally: Tally::default(),
                gate: None,
                execution_order: Vec::new(),
            });
        }

        let database = self.database()?;
        let descriptors = self.reconcile(&paths, database);
        let statuses: Vec<Status> = descriptors
            .iter()
            .map(|d| d.real_status(&config, &self.host))
            .collect();
        if self.gate_active() {
            self.log.expect_failures(
                descriptors
                    .iter()
                    .zip(&statuses)
                    .filter(|(_, status)| **status == Status::Fail)
                    .map(|(d, _)| d.path.clone()),
            );
        }

        let order = self.execution_order(&descriptors)?;
        let runnable: Vec<usize> = order
            .iter()
            .copied()
            .filter(|index| statuses[*index] != Status::Skip)
            .collect();
        let execution_order = runnable
            .iter()
            .map(|index| descriptors[*index].path.clone())
            .collect();

        let shared = Arc::new(Shared {
            definition: Arc::clone(&self.definition),
            config: Arc::clone(&config),
            host: Arc::clone(&self.host),
            log: Arc::clone(&self.log),
            slots: ResultSlots::new(descriptors.len()),
            descriptors,
        });
        let deadline = started + Duration::from_secs(config.timeout_overall());
        self.schedule(&shared, &runnable, deadline)?;

        let tally = self.tabulate(&shared, &statuses);
        let summary = report::summary_lines(&tally, started.elapsed());
        for line in &summary {
            self.log.line(line);
        }
        self.write_reports(&tally, &summary)?;

        let mut exit_code = EXIT_OK;
        let gate = if self.gate_active() {
            let outcome = self.gate(&shared, &statuses, database)?;
            if !outcome.passed {
                exit_code = EXIT_GATE_FAILED;
            }
            Some(outcome)
        } else {
            None
        };

        Ok(RunSummary {
            suite: config.suite_name().to_string(),
            exit_code,
            discovered: shared.descriptors.len(),
            elapsed_ms: elapsed_ms(started),
            tally,
            gate,
            execution_order,
        })
    }

    /// Walks the selected directories; paths are relative to the tests
    /// location, slash-separated and sorted.
    pub fn discover(&self) -> Result<Vec<String>, SuiteError> {
        let config = &self.config;
        let pattern = Regex::new(self.definition.test_file_pattern()).map_err(|e| {
            SuiteError::ConfigRejected(format!("invalid test file pattern: {}", e))
        })?;
        let regex_filter = config
            .regex_filter()
            .map(Regex::new)
            .transpose()
            .map_err(|e| SuiteError::ConfigRejected(format!("invalid regex filter: {}", e)))?;

        let root = config.tests_location();
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for dir in config.test_dirs() {
            let base = if dir.is_empty() {
                root.to_path_buf()
            } else {
                root.join(dir)
            };
            if !base.is_dir() {
                warn!(dir = %base.display(), "test directory does not exist");
                continue;
            }
            for entry in WalkDir::new(&base).follow_links(true).sort_by_file_name() {
                let entry = entry.map_err(|e| SuiteError::io(&base, e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if !pattern.is_match(&entry.file_name().to_string_lossy()) {
                    continue;
                }
                if !self.definition.is_test_executable(entry.path()) {
                    continue;
                }
                let relative = relative_path(root, entry.path());
                if !self.accepts(&relative, regex_filter.as_ref()) {
                    continue;
                }
                if seen.insert(relative.clone()) {
                    found.push(relative);
                }
            }
        }

        if found.is_empty() {
            let candidates = [config.ends_with_filter(), config.contains_filter()];
            if let Some(literal) = candidates.into_iter().flatten().find_map(|f| {
                if root.join(f).is_file() {
                    Some(relative_path(root, &root.join(f)))
                } else if Path::new(f).is_file() {
                    Some(relative_path(root, Path::new(f)))
                } else {
                    None
                }
            }) {
                debug!(path = %literal, "no match for filter; running it as a literal file");
                found.push(literal);
            }
        }

        found.sort_by(|a, b| compare_paths(a, b));
        Ok(found)
    }

    fn accepts(&self, relative: &str, regex_filter: Option<&Regex>) -> bool {
        self.config
            .contains_filter()
            .map_or(true, |f| relative.contains(f))
            && regex_filter.map_or(true, |r| r.is_match(relative))
            && self
                .config
                .ends_with_filter()
                .map_or(true, |f| relative.ends_with(f))
    }

    /// Loads, checks and memoizes the expected-status database.
    pub fn database(&self) -> Result<&ExpectedStatusDatabase, SuiteError> {
        if let Some(database) = self.database.get() {
            return Ok(database);
        }
        let loaded = self.load_database()?;
        Ok(self.database.get_or_init(|| loaded))
    }

    fn load_database(&self) -> Result<ExpectedStatusDatabase, SuiteError> {
        let location = self.store.location().display().to_string();
        let mut database = match self.store.load() {
            Ok(database) => database,
            Err(StoreError::FormatMismatch { database }) => {
                let question = format!(
                    "Configuration file {} not properly formatted. Regenerate it? [y/N]",
                    location
                );
                if !ask_yes_no(self.prompt.as_ref(), &question) {
                    return Err(StoreError::FormatMismatch { database }.into());
                }
                self.store.save(&database)?;
                *database
            }
            Err(e) => return Err(e.into()),
        };

        let verification = database.verify_against_disk(self.config.tests_location());
        debug!(
            valid = verification.valid.len(),
            invalid = verification.invalid.len(),
            "verified expected-status entries against disk"
        );
        if !verification.invalid.is_empty() {
            for entry in &verification.invalid {
                self.log
                    .line(&format!("Non-existing file in configuration: {}", entry.path));
            }
            if ask_yes_no(
                self.prompt.as_ref(),
                "Non-existing files found in configuration. Regenerate config? [y/N]",
            ) {
                database.remove(verification.invalid.iter());
                self.store.save(&database)?;
            }
        }
        Ok(database)
    }

    fn reconcile(&self, paths: &[String], database: &ExpectedStatusDatabase) -> Vec<TestDescriptor> {
        paths
            .iter()
            .map(|path| {
                let discovered = TestDescriptor::discovered(path.as_str());
                let mut descriptor = match database.get(path) {
                    Some(entry) => TestDescriptor::merge(&discovered, entry),
                    None => discovered,
                };
                self.definition.setup_descriptor(&mut descriptor);
                descriptor
            })
            .collect()
    }

    fn execution_order(&self, descriptors: &[TestDescriptor]) -> Result<Vec<usize>, SuiteError> {
        let mut sorted: Vec<usize> = (0..descriptors.len()).collect();
        sorted.sort_by(|a, b| compare_paths(&descriptors[*a].path, &descriptors[*b].path));
        if !(self.gate_active() && self.config.gate_resume()) {
            return Ok(sorted);
        }
        let resume_path = self.config.resume_path();
        let prefixes =
            resume::read_prefixes(&resume_path).map_err(|e| SuiteError::io(&resume_path, e))?;
        if !prefixes.is_empty() {
            self.log.line(&format!(
                "Resuming {} previously failed director{} first",
                prefixes.len(),
                if prefixes.len() == 1 { "y" } else { "ies" }
            ));
        }
        let paths: Vec<&str> = descriptors.iter().map(|d| d.path.as_str()).collect();
        Ok(resume::resume_order(&paths, &sorted, &prefixes))
    }

    fn schedule(&self, shared: &Arc<Shared>, runnable: &[usize], deadline: Instant) -> Result<(), SuiteError> {
        let total = runnable.len();
        let mut done = 0;
        let mut transient = None;
        let sequential: Vec<usize> = if self.config.use_threads() {
            let (parallel, isolated): (Vec<usize>, Vec<usize>) = runnable
                .iter()
                .partition(|index| !shared.descriptors[**index].runs_in_isolation());
            let threads = self.config.worker_threads(self.host.available_parallelism);
            transient = self.run_pool(shared, &parallel, threads, deadline, &mut done, total)?;
            isolated
        } else {
            runnable.to_vec()
        };

        for index in sequential {
            if Instant::now() >= deadline {
                return Err(self.deadline_exceeded());
            }
            let result = shared.execute(index);
            done += 1;
            self.log
                .progress(done, total, &shared.descriptors[index].path);
            absorb(result, &mut transient, &self.log)?;
        }

        match transient {
            Some(e) => Err(SuiteError::Fatal(e)),
            None => Ok(()),
        }
    }

    fn run_pool(
        &self,
        shared: &Arc<Shared>,
        indices: &[usize],
        threads: usize,
        deadline: Instant,
        done: &mut usize,
        total: usize,
    ) -> Result<Option<FatalError>, SuiteError> {
        if indices.is_empty() {
            return Ok(None);
        }
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
        let (out_tx, out_rx) = crossbeam_channel::unbounded::<(usize, Result<(), FatalError>)>();
        let stop = Arc::new(AtomicBool::new(false));
        for index in indices {
            let _ = job_tx.send(*index);
        }
        drop(job_tx);

        let mut workers = Vec::with_capacity(threads);
        for n in 0..threads.max(1) {
            let job_rx = job_rx.clone();
            let out_tx = out_tx.clone();
            let shared = Arc::clone(shared);
            let stop = Arc::clone(&stop);
            let handle = thread::Builder::new()
                .name(format!("tsuite-worker-{}", n))
                .spawn(move || {
                    for index in job_rx.iter() {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        let result = shared.execute(index);
                        if out_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(FatalError::Io)?;
            workers.push(handle);
        }
        drop(out_tx);

        let mut transient = None;
        for _ in 0..indices.len() {
            let (index, result) = match out_rx.recv_deadline(deadline) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    stop.store(true, Ordering::SeqCst);
                    return Err(self.deadline_exceeded());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(FatalError::WorkerPanic {
                        path: String::new(),
                        message: "worker threads exited before finishing the batch".to_string(),
                    }
                    .into())
                }
            };
            *done += 1;
            self.log
                .progress(*done, total, &shared.descriptors[index].path);
            if let Err(e) = absorb(result, &mut transient, &self.log) {
                stop.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }
        for worker in workers {
            let _ = worker.join();
        }
        Ok(transient)
    }

    fn deadline_exceeded(&self) -> SuiteError {
        let active = self.log.active_tests();
        self.log.line(&format!(
            "Overall timeout of {} seconds exceeded; still running: {}",
            self.config.timeout_overall(),
            if active.is_empty() {
                "-".to_string()
            } else {
                active.join(", ")
            }
        ));
        SuiteError::OverallDeadlineExceeded(self.config.timeout_overall())
    }

    fn tabulate(&self, shared: &Shared, statuses: &[Status]) -> Tally {
        let mut tally = Tally::default();
        let mut indices: Vec<usize> = (0..shared.descriptors.len()).collect();
        indices.sort_by(|a, b| {
            compare_paths(&shared.descriptors[*a].path, &shared.descriptors[*b].path)
        });
        for index in indices {
            let path = &shared.descriptors[index].path;
            if statuses[index] == Status::Skip {
                tally.skipped += 1;
                tally.skipped_paths.push(path.clone());
                continue;
            }
            match shared.slots.get(index) {
                None => {
                    tally.skipped += 1;
                    tally.skipped_paths.push(path.clone());
                }
                Some(TestResult::Passed) => tally.passed += 1,
                Some(TestResult::Ignored) => {
                    tally.ignored += 1;
                    tally.ignored_paths.push(path.clone());
                }
                Some(TestResult::Failed { details, timeout }) => {
                    tally.failed += 1;
                    if *timeout {
                        tally.timeouts += 1;
                    }
                    let reason = if self.config.print_full_output() {
                        details.replace('\n', " ")
                    } else {
                        details.lines().next().unwrap_or_default().to_string()
                    };
                    tally.failing.push((path.clone(), reason));
                }
            }
        }

        if self.config.is_verbose() && !tally.failing.is_empty() {
            self.log.line("");
            self.log.line("== FAILING TESTS ==");
            for (path, _) in &tally.failing {
                self.log.line(path);
            }
        }
        if self.config.is_verbose() && !tally.ignored_paths.is_empty() {
            self.log.line("");
            self.log.line("== IGNORED TESTS ==");
            for path in &tally.ignored_paths {
                self.log.line(path);
            }
        }
        tally
    }

    fn write_reports(&self, tally: &Tally, summary: &[String]) -> Result<(), SuiteError> {
        if self.config.text_output() {
            let path = self.config.text_report_path();
            report::write_lines(&path, &self.log.text_lines())
                .map_err(|e| SuiteError::io(&path, e))?;
        }
        if self.config.html_output() {
            let path = self.config.html_report_path();
            let html = report::render_html(
                self.config.suite_description(),
                self.config.tests_location(),
                tally,
                summary,
            );
            report::write_html(&path, &html).map_err(|e| SuiteError::io(&path, e))?;
        }
        Ok(())
    }

    fn gate(
        &self,
        shared: &Shared,
        statuses: &[Status],
        database: &ExpectedStatusDatabase,
    ) -> Result<GateOutcome, SuiteError> {
        let mut unexpectedly_passed = Vec::new();
        let mut unexpectedly_failed = Vec::new();
        for (index, descriptor) in shared.descriptors.iter().enumerate() {
            match (statuses[index], shared.slots.get(index)) {
                (Status::Fail, Some(TestResult::Passed)) => unexpectedly_passed.push(descriptor),
                (Status::Pass, Some(result)) if result.is_failure() => {
                    unexpectedly_failed.push(descriptor)
                }
                _ => {}
            }
        }
        unexpectedly_passed.sort();
        unexpectedly_failed.sort();

        for (title, list) in [
            ("== UNEXPECTEDLY PASSING TESTS ==", &unexpectedly_passed),
            ("== UNEXPECTEDLY FAILING TESTS ==", &unexpectedly_failed),
        ] {
            if list.is_empty() {
                continue;
            }
            self.log.line("");
            self.log.line(title);
            for descriptor in list.iter() {
                self.log.line(&descriptor.path);
            }
        }

        let passed = unexpectedly_failed.is_empty();
        if passed {
            self.log.line("GATE PASSED");
        } else {
            self.log.line(&format!(
                "GATE FAILED: {} unexpected failure(s)",
                unexpectedly_failed.len()
            ));
        }

        let resume_path = self.config.resume_path();
        resume::store_prefixes(
            &resume_path,
            unexpectedly_failed.iter().map(|d| d.path.as_str()),
        )
        .map_err(|e| SuiteError::io(&resume_path, e))?;

        let warning = if passed { "" } else { "WARNING: GATE FAILED. " };
        let database_updated = if !unexpectedly_passed.is_empty() || !unexpectedly_failed.is_empty() {
            if self.config.regenerate_config()
                || ask_yes_no(
                    self.prompt.as_ref(),
                    &format!("{}Update configuration file? [y/N]", warning),
                )
            {
                let comment = if unexpectedly_failed.is_empty() {
                    String::new()
                } else {
                    self.prompt.ask("Common comment, if any:").trim().to_string()
                };
                self.regenerate(database, &unexpectedly_passed, &unexpectedly_failed, &comment)?;
                true
            } else {
                false
            }
        } else if self.config.regenerate_config()
            && ask_yes_no(
                self.prompt.as_ref(),
                &format!("{}Regenerate configuration file? [y/N]", warning),
            )
        {
            self.store.save(database)?;
            true
        } else {
            false
        };

        Ok(GateOutcome {
            passed,
            unexpectedly_passed: unexpectedly_passed.iter().map(|d| d.path.clone()).collect(),
            unexpectedly_failed: unexpectedly_failed.iter().map(|d| d.path.clone()).collect(),
            database_updated,
        })
    }

    fn regenerate(
        &self,
        database: &ExpectedStatusDatabase,
        unexpectedly_passed: &[&TestDescriptor],
        unexpectedly_failed: &[&TestDescriptor],
        comment: &str,
    ) -> Result<(), SuiteError> {
        let condition = self.config.current_mode_condition(&self.host);
        let mut updated = Vec::new();
        for descriptor in unexpectedly_failed {
            let mut entry = database
                .get(&descriptor.path)
                .cloned()
                .unwrap_or_else(|| TestDescriptor::new(descriptor.path.as_str()));
            if entry.has_overrides() {
                entry.set_leading_override(condition, Status::Fail);
            } else {
                entry.status = Some(Status::Fail);
            }
            if !comment.is_empty() {
                entry.comment = Some(comment.to_string());
            }
            updated.push(entry);
        }

        let mut removed = Vec::new();
        for descriptor in unexpectedly_passed {
            let Some(entry) = database.get(&descriptor.path) else {
                continue;
            };
            let only_mode_override = entry
                .status_overrides
                .as_deref()
                .is_some_and(|o| o.len() == 1 && o[0].condition == Condition::CompileMode);
            if self.config.is_compile() && only_mode_override {
                let mut entry = entry.clone();
                entry.set_override(Condition::CompileMode, Status::Pass);
                updated.push(entry);
            } else {
                removed.push(entry.clone());
            }
        }

        let mut next = database.clone();
        next.remove(removed.iter());
        next.add_or_replace(database.merged_with(updated.iter()));
        self.store.save(&next)?;
        self.log.line(&format!(
            "Configuration file {} updated: {} added or changed, {} removed",
            self.store.location().display(),
            updated.len(),
            removed.len()
        ));
        Ok(())
    }
}

fn absorb(
    result: Result<(), FatalError>,
    transient: &mut Option<FatalError>,
    log: &SuiteLog,
) -> Result<(), SuiteError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_transient() => {
            if transient.is_none() {
                log.line(&format!("Uncaught exception, exiting after this batch: {}", e));
                *transient = Some(e);
            } else {
                debug!(error = %e, "duplicate transient error suppressed");
            }
            Ok(())
        }
        Err(e) => {
            log.line(&format!("Uncaught exception, exiting: {}", e));
            Err(e.into())
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    if relative.is_absolute() {
        return relative.to_string_lossy().replace('\\', "/");
    }
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
