use crate::console::CaptureBuffer;
use crate::external::{ExternalLauncher, ProcessOutcome};
use crate::in_process::{InProcessStrategy, SourceCache, SourceUnit};
use crate::suite::{SuiteDefinition, TestContext};
use crate::FatalError;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;
use tsuite_core::{TestDescriptor, TestResult, MAX_VERSION};

pub const ASYNC_TEST_COMPLETE: &str = "Test262:AsyncTestComplete";
pub const VERSION_FLAG: &str = "--ecmascript-version=";
const PENDING_VERSION_LINE: &str = "esid: pending";
const STRICT_PREFIX: &str = "\"use strict\";";
const FIXTURE_MARKER: &str = "_FIXTURE";

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\W*es(\d+)id:").ok())
        .as_ref()
}

/// Options every test262 evaluation gets, in either backend.
pub fn common_options() -> Vec<(String, String)> {
    vec![("intl-402".to_string(), "true".to_string())]
}

pub enum Test262Backend {
    InProcess(InProcessStrategy),
    External(ExternalLauncher),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Negative {
    Typed {
        #[serde(default)]
        phase: Option<String>,
        #[serde(rename = "type")]
        kind: String,
    },
    Bare(String),
}

impl Negative {
    pub fn expected_type(&self) -> &str {
        match self {
            Negative::Typed { kind, .. } => kind,
            Negative::Bare(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrontMatter {
    pub negative: Option<Negative>,
    pub flags: Vec<String>,
    pub includes: Vec<String>,
    pub features: Vec<String>,
}

impl FrontMatter {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// A test file with its metadata block decoded.
#[derive(Debug, Clone)]
pub struct ParsedTest {
    pub source: String,
    pub front: FrontMatter,
    /// Versions named by `esNid:` keys, `MAX_VERSION` when none is named.
    pub versions: Vec<u32>,
    pub is_async: bool,
}

impl ParsedTest {
    pub fn parse(path: &str, source: String) -> Result<Self, FatalError> {
        let front = match front_matter_block(&source) {
            Some(block) => serde_yaml::from_str::<Option<FrontMatter>>(block)
                .map_err(|e| FatalError::Metadata {
                    path: path.to_string(),
                    message: e.to_string(),
                })?
                .unwrap_or_default(),
            None => FrontMatter::default(),
        };
        let versions = detect_versions(&source);
        let is_async = source.contains("$DONE");
        Ok(Self {
            source,
            front,
            versions,
            is_async,
        })
    }

    pub fn is_strict(&self) -> bool {
        self.front.has_flag("onlyStrict")
    }

    pub fn is_module(&self) -> bool {
        self.front.has_flag("module")
    }

    pub fn is_raw(&self) -> bool {
        self.front.has_flag("raw")
    }
}

fn front_matter_block(source: &str) -> Option<&str> {
    let start = source.find("/*---")? + "/*---".len();
    let end = source[start..].find("---*/")? + start;
    Some(&source[start..end])
}

/// Versions come from the metadata lines only; scanning stops at the end of
/// the front matter.
pub fn detect_versions(source: &str) -> Vec<u32> {
    let mut versions = Vec::new();
    for line in source.lines() {
        if line.trim_end().ends_with("---*/") {
            break;
        }
        let version = if line.trim_end() == PENDING_VERSION_LINE {
            Some(MAX_VERSION)
        } else {
            version_pattern()
                .and_then(|p| p.captures(line))
                .and_then(|c| c[1].parse::<u32>().ok())
        };
        if let Some(version) = version {
            if !versions.contains(&version) {
                versions.push(version);
            }
        }
    }
    if versions.is_empty() {
        versions.push(MAX_VERSION);
    }
    versions
}

enum Evaluation {
    Completed,
    Raised { message: String },
    TimedOut,
    HarnessUnavailable { message: String },
}

/// The ECMAScript conformance suite.
pub struct Test262Suite {
    backend: Test262Backend,
    harness_dir: PathBuf,
    sources: SourceCache,
    unsupported_features: HashSet<String>,
}

impl Test262Suite {
    pub fn new(backend: Test262Backend, harness_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            harness_dir: harness_dir.into(),
            sources: SourceCache::new(),
            unsupported_features: HashSet::new(),
        }
    }

    /// Failures of tests that use one of these features count as ignored.
    pub fn unsupported_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unsupported_features = features.into_iter().map(Into::into).collect();
        self
    }

    fn harness_names(&self, test: &ParsedTest) -> Vec<String> {
        if test.is_raw() {
            return Vec::new();
        }
        let mut names = vec!["assert.js".to_string(), "sta.js".to_string()];
        if test.is_async {
            names.push("doneprintHandle.js".to_string());
        }
        for include in &test.front.includes {
            if !names.contains(include) {
                names.push(include.clone());
            }
        }
        names
    }

    fn uses_unsupported_feature(&self, test: &ParsedTest) -> bool {
        test.front
            .features
            .iter()
            .any(|f| self.unsupported_features.contains(f))
    }

    fn evaluate(
        &self,
        file: &Path,
        test: &ParsedTest,
        harness: &[String],
        version: u32,
        capture: &CaptureBuffer,
    ) -> Result<Evaluation, FatalError> {
        let mut options = common_options();
        match &self.backend {
            Test262Backend::InProcess(strategy) => {
                let mut units = Vec::with_capacity(harness.len());
                for name in harness {
                    match self.sources.load(&self.harness_dir.join(name)) {
                        Ok(unit) => units.push(unit),
                        Err(e) => {
                            return Ok(Evaluation::HarnessUnavailable {
                                message: format!("cannot load harness file {}: {}", name, e),
                            })
                        }
                    }
                }
                let text = if test.is_strict() {
                    format!("{}{}", STRICT_PREFIX, test.source)
                } else {
                    test.source.clone()
                };
                let mut unit = SourceUnit::new(file.to_string_lossy(), text);
                if test.is_module() {
                    unit = unit.as_module();
                }
                Ok(
                    match strategy.evaluate(&units, &unit, version, &options, Some(capture)) {
                        Ok(_) => Evaluation::Completed,
                        Err(e) => Evaluation::Raised {
                            message: e.signature(),
                        },
                    },
                )
            }
            Test262Backend::External(launcher) => {
                if test.is_strict() {
                    options.push(("strict".to_string(), "true".to_string()));
                }
                if test.is_module() {
                    options.push(("module".to_string(), "true".to_string()));
                }
                let mut args = Vec::with_capacity(harness.len() + 1);
                for name in harness {
                    let path = self.harness_dir.join(name);
                    if !path.is_file() {
                        return Ok(Evaluation::HarnessUnavailable {
                            message: format!("harness file {} not found", name),
                        });
                    }
                    args.push(path.to_string_lossy().to_string());
                }
                args.push(file.to_string_lossy().to_string());
                Ok(match launcher.run(version, &options, &args, Some(capture))? {
                    ProcessOutcome::Success => Evaluation::Completed,
                    ProcessOutcome::Failure { code } => Evaluation::Raised {
                        message: format!(
                            "exit code {}: {}",
                            code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                            capture.contents().trim()
                        ),
                    },
                    ProcessOutcome::Timeout => Evaluation::TimedOut,
                })
            }
        }
    }

    fn run_version(
        &self,
        ctx: &TestContext<'_>,
        path: &str,
        file: &Path,
        test: &ParsedTest,
        harness: &[String],
        version: u32,
    ) -> Result<TestResult, FatalError> {
        let suffix = format!(" (ES{})", version);
        if ctx.config.is_verbose() {
            ctx.log.line(&format!("{}{}", path, suffix));
        }
        let capture = CaptureBuffer::new();
        let evaluation = self.evaluate(file, test, harness, version, &capture)?;
        if ctx.config.print_full_output() && !capture.is_empty() {
            let lines: Vec<String> = capture.contents().lines().map(str::to_string).collect();
            ctx.log.block(&lines);
        }

        let negative = test.front.negative.as_ref();
        let failed_label = format!("FAILED{}", suffix);
        let mut result = match &evaluation {
            Evaluation::Completed => TestResult::Passed,
            Evaluation::TimedOut => {
                ctx.log.fail(path, &format!("TIMEOUT{}", suffix), "");
                TestResult::timeout(suffix.trim())
            }
            Evaluation::Raised { message } => {
                if negative.is_none() {
                    ctx.log.fail(path, &failed_label, message);
                }
                TestResult::failed(format!("{}: {}", suffix.trim(), message))
            }
            Evaluation::HarnessUnavailable { message } => {
                ctx.log.fail(path, &failed_label, message);
                TestResult::failed(format!("{}: {}", suffix.trim(), message))
            }
        };

        if test.is_async && negative.is_none() && result == TestResult::Passed {
            let output = capture.contents();
            if !output.contains(ASYNC_TEST_COMPLETE) {
                ctx.log.fail(
                    path,
                    &failed_label,
                    &format!(
                        "async test; expected output: '{}' actual: '{}'",
                        ASYNC_TEST_COMPLETE, output
                    ),
                );
                result = TestResult::failed(format!("async test failed{}", suffix));
            }
        }

        if let Some(negative) = negative {
            let expected = negative.expected_type();
            result = match &evaluation {
                Evaluation::Completed => {
                    ctx.log.fail(
                        path,
                        &failed_label,
                        "negative test, was expected to fail but didn't",
                    );
                    TestResult::failed(format!("negative test expected to fail{}", suffix))
                }
                Evaluation::Raised { message } if expected == "." || message.contains(expected) => {
                    TestResult::Passed
                }
                Evaluation::Raised { message } => {
                    ctx.log.fail(
                        path,
                        &failed_label,
                        &format!(
                            "negative test, was expected to fail, what it did, but for wrong reasons: {} expected: {}",
                            message, expected
                        ),
                    );
                    TestResult::failed(format!(
                        "negative test expected to fail with different reasons{}",
                        suffix
                    ))
                }
                Evaluation::TimedOut | Evaluation::HarnessUnavailable { .. } => result,
            };
        }

        if result.is_failure() && self.uses_unsupported_feature(test) {
            debug!(path, "failure of a test using an unsupported feature ignored");
            return Ok(TestResult::Ignored);
        }
        Ok(result)
    }
}

impl SuiteDefinition for Test262Suite {
    fn is_test_executable(&self, path: &Path) -> bool {
        !path.starts_with(&self.harness_dir)
            && !path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().contains(FIXTURE_MARKER))
    }

    fn run_test(
        &self,
        ctx: &TestContext<'_>,
        descriptor: &TestDescriptor,
    ) -> Result<Option<TestResult>, FatalError> {
        let file = ctx.resolve(&descriptor.path);
        // an unreadable test is a failure of that test, not of the run
        let parsed = fs::read_to_string(&file)
            .map_err(|e| format!("cannot read test file: {}", e))
            .and_then(|source| ParsedTest::parse(&descriptor.path, source).map_err(|e| e.to_string()));
        let test = match parsed {
            Ok(test) => test,
            Err(reason) => {
                ctx.log.fail(&descriptor.path, "FAILED", &reason);
                return Ok(Some(TestResult::failed(reason)));
            }
        };

        if ctx.config.print_script() {
            let rule = "=".repeat(64);
            let mut lines = vec![
                rule.clone(),
                format!("====== Testcase: {}", descriptor.path),
                rule,
                String::new(),
            ];
            lines.extend(test.source.lines().map(str::to_string));
            ctx.log.block(&lines);
        }

        let versions = descriptor
            .versions()
            .unwrap_or_else(|| test.versions.clone());
        let harness = self.harness_names(&test);
        ctx.task(&descriptor.path).run(&versions, |version| {
            self.run_version(ctx, &descriptor.path, &file, &test, &harness, version)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::MemoryProgress;
    use crate::in_process::{ScriptError, ScriptExecutor, ScriptSession};
    use crate::console::ScriptedPrompt;
    use crate::suite::{SuiteLog, SuiteRunner};
    use chrono::Utc;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tsuite_core::{
        ConfigStore, ExpectedStatusDatabase, HostInfo, JsonConfigStore, RunConfigurationBuilder, VersionSpec,
    };

    /// Fails on `throw Kind`, prints on `print(...)`, records options.
    #[derive(Default)]
    struct FakeEngine {
        opened: Mutex<Vec<(u32, Vec<(String, String)>)>>,
        units: Mutex<Vec<String>>,
    }

    struct FakeSession<'a> {
        engine: &'a FakeEngine,
        out: Option<Box<dyn Write + Send>>,
    }

    impl ScriptSession for FakeSession<'_> {
        fn redirect_output(&mut self, sink: Option<Box<dyn Write + Send>>) {
            self.out = sink;
        }

        fn evaluate(&mut self, unit: &SourceUnit) -> Result<String, ScriptError> {
            self.engine
                .units
                .lock()
                .expect("units")
                .push(unit.name.clone());
            for line in unit.text.lines() {
                if let Some(kind) = line.strip_prefix("throw ") {
                    return Err(ScriptError::new(kind.trim(), "thrown by test"));
                }
                if let Some(text) = line.strip_prefix("print(") {
                    if let Some(out) = self.out.as_mut() {
                        let _ = writeln!(out, "{}", text.trim_end_matches(')'));
                    }
                }
            }
            Ok(String::new())
        }
    }

    impl ScriptExecutor for FakeEngine {
        fn open(
            &self,
            version: u32,
            options: &[(String, String)],
            _shared: bool,
        ) -> Result<Box<dyn ScriptSession + '_>, ScriptError> {
            self.opened
                .lock()
                .expect("opened")
                .push((version, options.to_vec()));
            Ok(Box::new(FakeSession {
                engine: self,
                out: None,
            }))
        }
    }

    struct Fixture {
        root: PathBuf,
    }

    impl Fixture {
        fn new(tag: &str) -> Self {
            let root = std::env::temp_dir().join(format!(
                "tsuite_test262_{}_{}_{}",
                tag,
                std::process::id(),
                Utc::now().timestamp_micros()
            ));
            fs::create_dir_all(root.join("harness")).expect("harness dir");
            fs::create_dir_all(root.join("test")).expect("test dir");
            for name in ["assert.js", "sta.js", "doneprintHandle.js", "compareArray.js"] {
                fs::write(root.join("harness").join(name), "// harness\n").expect("harness file");
            }
            Self { root }
        }

        fn write(&self, path: &str, body: &str) {
            fs::write(self.root.join("test").join(path), body).expect("write test");
        }

        fn run(&self, engine: Arc<FakeEngine>, descriptor: &TestDescriptor) -> (Option<TestResult>, Vec<String>) {
            let suite = Test262Suite::new(
                Test262Backend::InProcess(InProcessStrategy::new(engine, false)),
                self.root.join("harness"),
            )
            .unsupported_features(["Temporal"]);
            let mut builder = RunConfigurationBuilder::new("test262");
            builder.tests_location(self.root.join("test"));
            let config = builder.build();
            let host = HostInfo::current(None);
            let sink = Arc::new(MemoryProgress::default());
            let log = SuiteLog::new(sink.clone(), false);
            let ctx = TestContext {
                config: &config,
                host: &host,
                log: &log,
            };
            let result = suite.run_test(&ctx, descriptor).expect("run test");
            (result, sink.lines())
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    const HEADER: &str = "// Copyright\n/*---\nes6id: 19.1.2.1\nesid: sec-object.assign\ndescription: >\n  folded text\n";

    #[test]
    fn versions_are_read_from_metadata_keys() {
        let source = format!("{}es5id: 15.2\n---*/\n// es9id: after the block\n", HEADER);
        assert_eq!(detect_versions(&source), vec![6, 5]);
        assert_eq!(
            detect_versions("/*---\nesid: pending\n---*/\n"),
            vec![MAX_VERSION]
        );
        assert_eq!(detect_versions("no metadata at all"), vec![MAX_VERSION]);
    }

    #[test]
    fn front_matter_is_decoded() {
        let source = format!(
            "{}negative:\n  phase: parse\n  type: SyntaxError\nflags: [onlyStrict, module]\nincludes: [compareArray.js]\nfeatures: [Temporal]\n---*/\nthrow SyntaxError\n",
            HEADER
        );
        let test = ParsedTest::parse("a.js", source).expect("parse");
        assert!(test.is_strict());
        assert!(test.is_module());
        assert!(!test.is_async);
        assert_eq!(test.front.includes, vec!["compareArray.js"]);
        assert_eq!(
            test.front.negative.as_ref().map(Negative::expected_type),
            Some("SyntaxError")
        );

        let broken = ParsedTest::parse("b.js", "/*---\nflags: [unclosed\n---*/".to_string());
        assert!(matches!(broken, Err(FatalError::Metadata { .. })));
    }

    #[test]
    fn passing_test_runs_every_detected_version_with_harness() {
        let fixture = Fixture::new("pass");
        fixture.write("ok.js", &format!("{}es5id: 1\n---*/\nvar x = 1;\n", HEADER));
        let engine = Arc::new(FakeEngine::default());
        let (result, _) = fixture.run(engine.clone(), &TestDescriptor::discovered("ok.js"));
        assert_eq!(result, Some(TestResult::Passed));
        let opened = engine.opened.lock().expect("opened");
        assert_eq!(opened.iter().map(|(v, _)| *v).collect::<Vec<_>>(), vec![6, 5]);
        assert_eq!(opened[0].1, common_options());
        let units = engine.units.lock().expect("units");
        assert!(units[0].ends_with("assert.js"));
        assert!(units[1].ends_with("sta.js"));
        assert!(units[2].ends_with("ok.js"));
    }

    #[test]
    fn descriptor_versions_take_priority() {
        let fixture = Fixture::new("versions");
        fixture.write("v.js", &format!("{}---*/\n", HEADER));
        let engine = Arc::new(FakeEngine::default());
        let mut descriptor = TestDescriptor::discovered("v.js");
        descriptor.ecma_version = Some(VersionSpec::for_versions(&[9]));
        fixture.run(engine.clone(), &descriptor);
        let opened = engine.opened.lock().expect("opened");
        assert_eq!(opened.iter().map(|(v, _)| *v).collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn negative_test_needs_the_expected_error_type() {
        let fixture = Fixture::new("negative");
        let negative = format!("{}negative:\n  phase: runtime\n  type: TypeError\n---*/\n", HEADER);
        fixture.write("right.js", &format!("{}throw TypeError\n", negative));
        fixture.write("wrong.js", &format!("{}throw RangeError\n", negative));
        fixture.write("none.js", &format!("{}var ok;\n", negative));
        fixture.write("any.js", &format!("{}negative: .\n---*/\nthrow Whatever\n", "/*---\n"));

        let engine = Arc::new(FakeEngine::default());
        let (right, _) = fixture.run(engine.clone(), &TestDescriptor::discovered("right.js"));
        assert_eq!(right, Some(TestResult::Passed));
        let (wrong, lines) = fixture.run(engine.clone(), &TestDescriptor::discovered("wrong.js"));
        assert!(wrong.is_some_and(|r| r.is_failure()));
        assert!(lines.iter().any(|l| l.contains("wrong reasons")));
        let (none, _) = fixture.run(engine.clone(), &TestDescriptor::discovered("none.js"));
        assert!(none.is_some_and(|r| r.is_failure()));
        let (any, _) = fixture.run(engine, &TestDescriptor::discovered("any.js"));
        assert_eq!(any, Some(TestResult::Passed));
    }

    #[test]
    fn async_test_must_report_completion() {
        let fixture = Fixture::new("async");
        fixture.write(
            "done.js",
            "/*---\nflags: [async]\n---*/\n$DONE;\nprint(Test262:AsyncTestComplete)\n",
        );
        fixture.write("silent.js", "/*---\nflags: [async]\n---*/\n$DONE;\n");
        let engine = Arc::new(FakeEngine::default());
        let (done, _) = fixture.run(engine.clone(), &TestDescriptor::discovered("done.js"));
        assert_eq!(done, Some(TestResult::Passed));
        assert!(engine
            .units
            .lock()
            .expect("units")
            .iter()
            .any(|u| u.ends_with("doneprintHandle.js")));
        let (silent, lines) = fixture.run(engine, &TestDescriptor::discovered("silent.js"));
        assert!(silent.is_some_and(|r| r.is_failure()));
        assert!(lines[0].starts_with("FAILED (ES"));
    }

    #[test]
    fn unsupported_feature_failures_are_ignored() {
        let fixture = Fixture::new("feature");
        fixture.write("t.js", "/*---\nfeatures: [Temporal]\n---*/\nthrow TypeError\n");
        fixture.write("u.js", "/*---\nfeatures: [Proxy]\n---*/\nthrow TypeError\n");
        let engine = Arc::new(FakeEngine::default());
        let (t, _) = fixture.run(engine.clone(), &TestDescriptor::discovered("t.js"));
        assert_eq!(t, Some(TestResult::Ignored));
        let (u, _) = fixture.run(engine, &TestDescriptor::discovered("u.js"));
        assert!(u.is_some_and(|r| r.is_failure()));
    }

    #[test]
    fn strict_tests_get_the_directive_prefix() {
        let fixture = Fixture::new("strict");
        fixture.write("s.js", "/*---\nflags: [onlyStrict]\n---*/\nvar a;\n");
        let seen = Arc::new(Mutex::new(String::new()));

        struct Recorder(Arc<Mutex<String>>);
        struct RecorderSession(Arc<Mutex<String>>);
        impl ScriptSession for RecorderSession {
            fn redirect_output(&mut self, _sink: Option<Box<dyn Write + Send>>) {}
            fn evaluate(&mut self, unit: &SourceUnit) -> Result<String, ScriptError> {
                *self.0.lock().expect("seen") = unit.text.to_string();
                Ok(String::new())
            }
        }
        impl ScriptExecutor for Recorder {
            fn open(
                &self,
                _version: u32,
                _options: &[(String, String)],
                _shared: bool,
            ) -> Result<Box<dyn ScriptSession + '_>, ScriptError> {
                Ok(Box::new(RecorderSession(Arc::clone(&self.0))))
            }
        }

        let suite = Test262Suite::new(
            Test262Backend::InProcess(InProcessStrategy::new(Arc::new(Recorder(seen.clone())), false)),
            fixture.root.join("harness"),
        );
        let mut builder = RunConfigurationBuilder::new("test262");
        builder.tests_location(fixture.root.join("test"));
        let config = builder.build();
        let host = HostInfo::current(None);
        let log = SuiteLog::new(Arc::new(MemoryProgress::default()), false);
        let ctx = TestContext {
            config: &config,
            host: &host,
            log: &log,
        };
        suite
            .run_test(&ctx, &TestDescriptor::discovered("s.js"))
            .expect("run");
        assert!(seen.lock().expect("seen").starts_with(STRICT_PREFIX));
    }

    #[test]
    fn broken_test_files_fail_alone_and_the_run_completes() {
        let fixture = Fixture::new("broken");
        fixture.write("good.js", "/*---\nflags: [onlyStrict]\n---*/\nvar ok;\n");
        fixture.write("bad.js", "/*---\nflags: [unclosed\n---*/\nvar a;\n");
        fixture.write("include.js", "/*---\nincludes: [missing.js]\n---*/\nvar b;\n");
        fs::write(fixture.root.join("test/binary.js"), [0xff, 0xfe, 0x00]).expect("write binary");

        let suite = Test262Suite::new(
            Test262Backend::InProcess(InProcessStrategy::new(Arc::new(FakeEngine::default()), false)),
            fixture.root.join("harness"),
        );
        let mut builder = RunConfigurationBuilder::new("test262");
        builder
            .tests_location(fixture.root.join("test"))
            .config_location(fixture.root.join("config"))
            .report_location(fixture.root.join("reports"));
        let config = builder.build();
        let store = JsonConfigStore::new(config.database_path());
        store.save(&ExpectedStatusDatabase::new()).expect("seed database");
        let sink = Arc::new(MemoryProgress::default());
        let runner = SuiteRunner::new(
            Arc::new(suite),
            config,
            HostInfo::current(None),
            Box::new(store),
            sink.clone(),
            Arc::new(ScriptedPrompt::default()),
        );

        let summary = runner.run().expect("run completes");
        assert_eq!(summary.tally.passed, 1);
        assert_eq!(summary.tally.failed, 3);
        let lines = sink.lines();
        assert!(lines.iter().any(|l| l.starts_with("FAILED bad.js") && l.contains("metadata")));
        assert!(lines.iter().any(|l| l.starts_with("FAILED binary.js") && l.contains("cannot read")));
        assert!(lines.iter().any(|l| l.contains("include.js") && l.contains("missing.js")));
    }

    #[test]
    fn harness_and_fixture_files_are_not_tests() {
        let suite = Test262Suite::new(
            Test262Backend::InProcess(InProcessStrategy::new(Arc::new(FakeEngine::default()), false)),
            "/t262/harness",
        );
        assert!(!suite.is_test_executable(Path::new("/t262/harness/assert.js")));
        assert!(!suite.is_test_executable(Path::new("/t262/test/a_FIXTURE.js")));
        assert!(suite.is_test_executable(Path::new("/t262/test/a.js")));
    }
}
