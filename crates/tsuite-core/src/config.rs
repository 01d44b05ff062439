use crate::descriptor::{Condition, MIN_VERSION};
use crate::host::HostInfo;
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const OVERALL_TIMEOUT_SECONDS: u64 = 60 * 12;
pub const INDIVIDUAL_TIMEOUT_SECONDS: u64 = 30;
pub const MAX_WORKER_THREADS: usize = 4;
const MAX_COMPILE_WORKER_THREADS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unrecognized argument: {0}")]
    UnknownArgument(String),
    #[error("argument '{key}' expects an integer, got '{value}'")]
    InvalidInteger { key: String, value: String },
    #[error("argument '{0}' expects a value (use {0}=...)")]
    MissingValue(String),
    #[error("invalid regex filter '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgAction {
    Continue,
    Help,
}

/// Immutable settings for one suite invocation. Only
/// [`RunConfigurationBuilder::build`] creates one.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    suite_name: String,
    suite_description: String,
    tests_location: PathBuf,
    config_location: PathBuf,
    report_location: PathBuf,
    test_dirs: Vec<String>,
    use_threads: bool,
    thread_budget: Option<usize>,
    verbose: bool,
    verbose_fail: bool,
    print_full_output: bool,
    print_script: bool,
    run_on_gate: bool,
    gate_resume: bool,
    regenerate_config: bool,
    compile: bool,
    timeout_test: u64,
    timeout_overall: u64,
    contains_filter: Option<String>,
    regex_filter: Option<String>,
    ends_with_filter: Option<String>,
    text_output: bool,
    html_output: bool,
    shared_context: bool,
    external_launcher: Option<PathBuf>,
    launcher_options: Vec<String>,
    min_version: u32,
    runtime_version: Option<u32>,
}

impl RunConfiguration {
    pub fn suite_name(&self) -> &str {
        &self.suite_name
    }

    pub fn suite_description(&self) -> &str {
        &self.suite_description
    }

    pub fn tests_location(&self) -> &Path {
        &self.tests_location
    }

    pub fn config_location(&self) -> &Path {
        &self.config_location
    }

    pub fn test_dirs(&self) -> &[String] {
        &self.test_dirs
    }

    pub fn use_threads(&self) -> bool {
        self.use_threads
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_verbose_fail(&self) -> bool {
        self.verbose_fail
    }

    pub fn print_full_output(&self) -> bool {
        self.print_full_output
    }

    pub fn print_script(&self) -> bool {
        self.print_script
    }

    pub fn run_on_gate(&self) -> bool {
        self.run_on_gate
    }

    pub fn gate_resume(&self) -> bool {
        self.gate_resume
    }

    pub fn regenerate_config(&self) -> bool {
        self.regenerate_config
    }

    pub fn is_compile(&self) -> bool {
        self.compile
    }

    pub fn timeout_test(&self) -> u64 {
        self.timeout_test
    }

    pub fn timeout_overall(&self) -> u64 {
        self.timeout_overall
    }

    pub fn contains_filter(&self) -> Option<&str> {
        self.contains_filter.as_deref()
    }

    pub fn regex_filter(&self) -> Option<&str> {
        self.regex_filter.as_deref()
    }

    pub fn ends_with_filter(&self) -> Option<&str> {
        self.ends_with_filter.as_deref()
    }

    pub fn text_output(&self) -> bool {
        self.text_output
    }

    pub fn html_output(&self) -> bool {
        self.html_output
    }

    pub fn is_shared_context(&self) -> bool {
        self.shared_context
    }

    pub fn external_launcher(&self) -> Option<&Path> {
        self.external_launcher.as_deref()
    }

    pub fn uses_external_process(&self) -> bool {
        self.external_launcher.is_some()
    }

    pub fn launcher_options(&self) -> &[String] {
        &self.launcher_options
    }

    pub fn min_version(&self) -> u32 {
        self.min_version
    }

    pub fn runtime_version(&self) -> Option<u32> {
        self.runtime_version
    }

    /// Gate bookkeeping is disabled whenever a filename filter narrows the run.
    pub fn is_filter_set(&self) -> bool {
        self.contains_filter.is_some() || self.ends_with_filter.is_some()
    }

    pub fn worker_threads(&self, available: usize) -> usize {
        let budget = self.thread_budget.unwrap_or(available).max(1);
        let capped = budget.min(MAX_WORKER_THREADS);
        if self.compile {
            capped.min(MAX_COMPILE_WORKER_THREADS)
        } else {
            capped
        }
    }

    /// The override condition a newly recorded expectation is keyed on.
    pub fn current_mode_condition(&self, host: &HostInfo) -> Condition {
        if self.compile {
            Condition::CompileMode
        } else {
            Condition::byte_order(host)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.config_location.join(format!("{}.json", self.suite_name))
    }

    pub fn resume_path(&self) -> PathBuf {
        self.config_location
            .join(format!("{}.failed", self.suite_name))
    }

    pub fn text_report_path(&self) -> PathBuf {
        self.report_location.join(format!("{}.txt", self.suite_name))
    }

    pub fn html_report_path(&self) -> PathBuf {
        self.report_location.join(format!("{}.html", self.suite_name))
    }

    pub fn resolve_test_path(&self, relative: &str) -> PathBuf {
        self.tests_location.join(relative)
    }
}

#[derive(Debug, Clone)]
pub struct RunConfigurationBuilder {
    inner: RunConfiguration,
}

impl RunConfigurationBuilder {
    pub fn new(suite_name: &str) -> Self {
        let base = PathBuf::from("lib").join(suite_name);
        Self {
            inner: RunConfiguration {
                suite_name: suite_name.to_string(),
                suite_description: suite_name.to_string(),
                tests_location: base.clone(),
                config_location: base,
                report_location: PathBuf::from("."),
                test_dirs: vec![String::new()],
                use_threads: true,
                thread_budget: None,
                verbose: false,
                verbose_fail: false,
                print_full_output: false,
                print_script: false,
                run_on_gate: false,
                gate_resume: false,
                regenerate_config: false,
                compile: false,
                timeout_test: INDIVIDUAL_TIMEOUT_SECONDS,
                timeout_overall: OVERALL_TIMEOUT_SECONDS,
                contains_filter: None,
                regex_filter: None,
                ends_with_filter: None,
                text_output: false,
                html_output: false,
                shared_context: false,
                external_launcher: None,
                launcher_options: Vec::new(),
                min_version: MIN_VERSION,
                runtime_version: None,
            },
        }
    }

    pub fn build(&self) -> RunConfiguration {
        self.inner.clone()
    }

    pub fn suite_description(&mut self, value: &str) -> &mut Self {
        self.inner.suite_description = value.to_string();
        self
    }

    pub fn tests_location(&mut self, value: impl Into<PathBuf>) -> &mut Self {
        self.inner.tests_location = value.into();
        self
    }

    pub fn config_location(&mut self, value: impl Into<PathBuf>) -> &mut Self {
        self.inner.config_location = value.into();
        self
    }

    pub fn report_location(&mut self, value: impl Into<PathBuf>) -> &mut Self {
        self.inner.report_location = value.into();
        self
    }

    /// Replaces the default directory selection.
    pub fn test_dirs(&mut self, dirs: Vec<String>) -> &mut Self {
        self.inner.test_dirs = dirs;
        self
    }

    fn add_test_dir(&mut self, dir: &str) -> &mut Self {
        if self.inner.test_dirs.iter().all(|d| d.is_empty()) {
            self.inner.test_dirs.clear();
        }
        self.inner.test_dirs.push(dir.to_string());
        self
    }

    pub fn use_threads(&mut self, value: bool) -> &mut Self {
        self.inner.use_threads = value;
        self
    }

    pub fn thread_budget(&mut self, value: Option<usize>) -> &mut Self {
        self.inner.thread_budget = value;
        self
    }

    pub fn verbose(&mut self, value: bool) -> &mut Self {
        self.inner.verbose = value;
        self
    }

    pub fn verbose_fail(&mut self, value: bool) -> &mut Self {
        self.inner.verbose_fail = value;
        self
    }

    pub fn print_full_output(&mut self, value: bool) -> &mut Self {
        self.inner.print_full_output = value;
        self
    }

    pub fn print_script(&mut self, value: bool) -> &mut Self {
        self.inner.print_script = value;
        self
    }

    pub fn run_on_gate(&mut self, value: bool) -> &mut Self {
        self.inner.run_on_gate = value;
        self
    }

    pub fn gate_resume(&mut self, value: bool) -> &mut Self {
        self.inner.gate_resume = value;
        self
    }

    pub fn regenerate_config(&mut self, value: bool) -> &mut Self {
        self.inner.regenerate_config = value;
        self
    }

    pub fn compile(&mut self, value: bool) -> &mut Self {
        self.inner.compile = value;
        self
    }

    pub fn timeout_test(&mut self, seconds: u64) -> &mut Self {
        self.inner.timeout_test = seconds;
        self
    }

    pub fn timeout_overall(&mut self, seconds: u64) -> &mut Self {
        self.inner.timeout_overall = seconds;
        self
    }

    pub fn contains_filter(&mut self, value: Option<String>) -> &mut Self {
        self.inner.contains_filter = value;
        self
    }

    pub fn regex_filter(&mut self, value: Option<String>) -> Result<&mut Self, ConfigError> {
        if let Some(pattern) = value.as_deref() {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        }
        self.inner.regex_filter = value;
        Ok(self)
    }

    pub fn ends_with_filter(&mut self, value: Option<String>) -> &mut Self {
        self.inner.ends_with_filter = value;
        self
    }

    pub fn text_output(&mut self, value: bool) -> &mut Self {
        self.inner.text_output = value;
        self
    }

    pub fn html_output(&mut self, value: bool) -> &mut Self {
        self.inner.html_output = value;
        self
    }

    pub fn shared_context(&mut self, value: bool) -> &mut Self {
        self.inner.shared_context = value;
        self
    }

    pub fn external_launcher(&mut self, value: Option<PathBuf>) -> &mut Self {
        self.inner.external_launcher = value;
        self
    }

    pub fn add_launcher_option(&mut self, value: &str) -> &mut Self {
        self.inner.launcher_options.push(value.to_string());
        self
    }

    pub fn min_version(&mut self, value: u32) -> &mut Self {
        self.inner.min_version = value;
        self
    }

    pub fn runtime_version(&mut self, value: Option<u32>) -> &mut Self {
        self.inner.runtime_version = value;
        self
    }
}

/// Applies one `key` or `key=value` token. Keys are case-insensitive,
/// values are taken verbatim.
pub fn apply_arg(builder: &mut RunConfigurationBuilder, arg: &str) -> Result<ArgAction, ConfigError> {
    let (key, value) = match arg.split_once('=') {
        Some((k, v)) => (k.to_ascii_lowercase(), Some(v)),
        None => (arg.to_ascii_lowercase(), None),
    };
    let required = |v: Option<&str>| -> Result<String, ConfigError> {
        v.map(str::to_string)
            .ok_or_else(|| ConfigError::MissingValue(key.clone()))
    };
    match (key.as_str(), value) {
        ("help", None) => return Ok(ArgAction::Help),
        ("nothreads", None) => {
            builder.use_threads(false);
        }
        ("threads", v) => {
            let n = parse_integer(&key, &required(v)?)?;
            builder.thread_budget(Some(n as usize));
        }
        ("verbose", None) => {
            builder.verbose(true);
        }
        ("verbosefail", None) => {
            builder.verbose(false).verbose_fail(true);
        }
        ("printscript", None) => {
            builder.print_script(true);
        }
        ("printfull", None) => {
            builder.print_full_output(true);
        }
        ("compile", None) => {
            builder.compile(true);
        }
        ("shared", None) => {
            builder.shared_context(true);
        }
        ("regression", None) => {
            builder
                .verbose(false)
                .verbose_fail(false)
                .html_output(true)
                .text_output(true);
        }
        ("gate", None) => {
            builder
                .verbose(false)
                .verbose_fail(false)
                .html_output(true)
                .text_output(true)
                .run_on_gate(true);
        }
        ("regenerateconfig", None) => {
            builder.regenerate_config(true).run_on_gate(true);
        }
        ("resume", None) => {
            builder.gate_resume(true).run_on_gate(true);
        }
        ("timeouttest", v) => {
            let n = parse_integer(&key, &required(v)?)?;
            builder.timeout_test(n);
        }
        ("timeoutoverall", v) => {
            let n = parse_integer(&key, &required(v)?)?;
            builder.timeout_overall(n);
        }
        ("filter", v) => {
            builder.contains_filter(Some(required(v)?));
        }
        ("regex", v) => {
            builder.regex_filter(Some(required(v)?))?;
        }
        ("single", v) => {
            builder
                .ends_with_filter(Some(required(v)?))
                .print_full_output(true)
                .verbose_fail(true);
        }
        ("location", v) => {
            builder.tests_location(required(v)?);
        }
        ("config", v) => {
            builder.config_location(required(v)?);
        }
        ("reports", v) => {
            builder.report_location(required(v)?);
        }
        ("dir", v) => {
            builder.add_test_dir(&required(v)?);
        }
        ("launcher", v) => {
            builder.external_launcher(Some(PathBuf::from(required(v)?)));
        }
        ("launcheroption", v) => {
            builder.add_launcher_option(&required(v)?);
        }
        ("minversion", v) => {
            let n = parse_integer(&key, &required(v)?)?;
            builder.min_version(n as u32);
        }
        ("runtimeversion", v) => {
            let n = parse_integer(&key, &required(v)?)?;
            builder.runtime_version(Some(n as u32));
        }
        _ => return Err(ConfigError::UnknownArgument(arg.to_string())),
    }
    Ok(ArgAction::Continue)
}

fn parse_integer(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|n| *n <= u64::from(u32::MAX))
        .ok_or_else(|| ConfigError::InvalidInteger {
            key: key.to_string(),
            value: value.to_string(),
        })
}

pub fn usage(suite_name: &str) -> String {
    let mut out = format!(
        "usage: {} [gate [regenerateconfig] [resume]] [verbose|verbosefail] [printscript] [regression] [filter=] [single=] [nothreads]\n\n",
        suite_name
    );
    let rows = [
        ("gate", "run the gate tests (checking against expected conformance)".to_string()),
        ("regenerateconfig", "after running the gate, write new configuration file".to_string()),
        ("resume", "run previously failed tests first".to_string()),
        (
            "regression",
            format!("writes {0}.txt and {0}.html result files", suite_name),
        ),
        ("filter=X", "executes only tests that have X in their filename".to_string()),
        ("regex=X", "executes only tests that have their filename matching given regex".to_string()),
        ("single=X", "executes only tests that match filename X".to_string()),
        ("dir=X", "test directory below the suite location (repeatable)".to_string()),
        ("printscript", "print sourcecode of all executed scripts (use in combination with \"filter\")".to_string()),
        ("printfull", "print the full output of failing tests".to_string()),
        ("verbose", "print all tests".to_string()),
        ("verbosefail", "print failing tests".to_string()),
        ("nothreads", "run all tests in the main thread".to_string()),
        ("threads=N", "use at most N worker threads (never more than 4)".to_string()),
        ("compile", "execute the tests in compile mode - handle with care".to_string()),
        ("shared", "reuse one engine instance across tests".to_string()),
        ("timeoutoverall=X", "overall testrun aborted after X seconds".to_string()),
        ("timeouttest=X", "test aborted after X seconds. Not available in all modes".to_string()),
        ("location=X", "the base directory of the test suite".to_string()),
        ("config=X", "the base directory of the test suite config file".to_string()),
        ("reports=X", "directory receiving the text and html reports".to_string()),
        ("launcher=X", "run every test in a subprocess started with launcher X".to_string()),
        ("launcheroption=X", "extra launcher option passed to every subprocess (repeatable)".to_string()),
        ("minversion=N", "do not run language versions below N".to_string()),
        ("runtimeversion=N", "host runtime version checked against runtime bounds".to_string()),
    ];
    for (key, text) in rows {
        out.push_str(&format!(" {:<22} {}\n", key, text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(args: &[&str]) -> Result<RunConfiguration, ConfigError> {
        let mut builder = RunConfigurationBuilder::new("test262");
        for arg in args {
            apply_arg(&mut builder, arg)?;
        }
        Ok(builder.build())
    }

    #[test]
    fn defaults_are_seeded_by_suite() {
        let config = build(&[]).expect("defaults");
        assert_eq!(config.suite_name(), "test262");
        assert!(config.use_threads());
        assert!(!config.run_on_gate());
        assert_eq!(config.timeout_test(), INDIVIDUAL_TIMEOUT_SECONDS);
        assert_eq!(config.timeout_overall(), OVERALL_TIMEOUT_SECONDS);
        assert_eq!(config.database_path(), PathBuf::from("lib/test262/test262.json"));
        assert_eq!(config.resume_path(), PathBuf::from("lib/test262/test262.failed"));
        assert!(!config.uses_external_process());
    }

    #[test]
    fn gate_related_tokens_force_gate_mode() {
        let config = build(&["resume"]).expect("resume");
        assert!(config.run_on_gate());
        assert!(config.gate_resume());
        let config = build(&["REGENERATECONFIG"]).expect("regenerate");
        assert!(config.run_on_gate());
        assert!(config.regenerate_config());
        let config = build(&["verbose", "gate"]).expect("gate");
        assert!(!config.is_verbose());
        assert!(config.text_output() && config.html_output());
    }

    #[test]
    fn value_tokens_map_to_setters() {
        let config = build(&[
            "timeouttest=5",
            "timeoutoverall=90",
            "filter=Array",
            "regex=.*/Map/.*",
            "single=foo.js",
            "launcher=/usr/bin/js",
            "launcheroption=--experimental",
            "dir=test/built-ins",
            "dir=test/language",
            "minversion=6",
            "runtimeversion=21",
            "threads=2",
        ])
        .expect("config");
        assert_eq!(config.timeout_test(), 5);
        assert_eq!(config.timeout_overall(), 90);
        assert_eq!(config.contains_filter(), Some("Array"));
        assert_eq!(config.regex_filter(), Some(".*/Map/.*"));
        assert_eq!(config.ends_with_filter(), Some("foo.js"));
        assert!(config.print_full_output() && config.is_verbose_fail());
        assert_eq!(config.external_launcher(), Some(Path::new("/usr/bin/js")));
        assert_eq!(config.launcher_options(), ["--experimental".to_string()]);
        assert_eq!(config.test_dirs(), ["test/built-ins", "test/language"]);
        assert_eq!(config.min_version(), 6);
        assert_eq!(config.runtime_version(), Some(21));
        assert_eq!(config.worker_threads(16), 2);
        assert!(config.is_filter_set());
    }

    #[test]
    fn malformed_and_unknown_tokens_are_errors() {
        assert_eq!(
            build(&["timeouttest=abc"]).unwrap_err(),
            ConfigError::InvalidInteger {
                key: "timeouttest".to_string(),
                value: "abc".to_string()
            }
        );
        assert!(matches!(
            build(&["timeoutoverall=-3"]),
            Err(ConfigError::InvalidInteger { .. })
        ));
        assert_eq!(
            build(&["bogus"]).unwrap_err(),
            ConfigError::UnknownArgument("bogus".to_string())
        );
        assert_eq!(
            build(&["filter"]).unwrap_err(),
            ConfigError::MissingValue("filter".to_string())
        );
        assert!(matches!(build(&["regex=("]), Err(ConfigError::InvalidRegex { .. })));
    }

    #[test]
    fn help_is_reported_without_mutation() {
        let mut builder = RunConfigurationBuilder::new("test262");
        assert_eq!(apply_arg(&mut builder, "help").expect("help"), ArgAction::Help);
        assert!(usage("test262").contains("test262.txt and test262.html"));
    }

    #[test]
    fn worker_threads_are_capped() {
        let config = build(&[]).expect("config");
        assert_eq!(config.worker_threads(32), MAX_WORKER_THREADS);
        assert_eq!(config.worker_threads(3), 3);
        assert_eq!(config.worker_threads(0), 1);
        let compile = build(&["compile"]).expect("compile");
        assert_eq!(compile.worker_threads(32), 2);
    }

    #[test]
    fn built_configuration_is_a_snapshot() {
        let mut builder = RunConfigurationBuilder::new("test262");
        let before = builder.build();
        builder.verbose(true);
        assert!(!before.is_verbose());
        assert!(builder.build().is_verbose());
    }
}
