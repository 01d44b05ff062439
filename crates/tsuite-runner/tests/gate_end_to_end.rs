#![cfg(unix)]

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tsuite_core::{
    apply_arg, ConfigStore, ExpectedStatusDatabase, HostInfo, JsonConfigStore, RunConfigurationBuilder, Status,
    TestDescriptor, TestResult, EXIT_GATE_FAILED, MAX_VERSION,
};
use tsuite_runner::{
    CaptureBuffer, DrainPool, ExternalLauncher, FatalError, MemoryProgress, ProcessOutcome, ScriptedPrompt,
    SuiteDefinition, SuiteRunner, TestContext,
};

/// Each test file is a shell script; its exit code is the verdict.
struct ShellSuite {
    launcher: ExternalLauncher,
}

impl SuiteDefinition for ShellSuite {
    fn test_file_pattern(&self) -> &str {
        r"\.sh$"
    }

    fn run_test(
        &self,
        ctx: &TestContext<'_>,
        descriptor: &TestDescriptor,
    ) -> Result<Option<TestResult>, FatalError> {
        let file = ctx.resolve(&descriptor.path).to_string_lossy().to_string();
        ctx.task(&descriptor.path).run(&[MAX_VERSION], |_| {
            let capture = CaptureBuffer::new();
            Ok(match self.launcher.run(MAX_VERSION, &[], &[file.clone()], Some(&capture))? {
                ProcessOutcome::Success => TestResult::Passed,
                ProcessOutcome::Failure { code } => {
                    let reason = format!("exit {:?}: {}", code, capture.contents().trim());
                    ctx.log.fail(&descriptor.path, "FAILED", &reason);
                    TestResult::failed(reason)
                }
                ProcessOutcome::Timeout => {
                    ctx.log.fail(&descriptor.path, "TIMEOUT", "");
                    TestResult::timeout("sh")
                }
            })
        })
    }
}

struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "tsuite_e2e_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(root.join("tests/suite")).expect("tests dir");
        fs::create_dir_all(root.join("config")).expect("config dir");
        Self { root }
    }

    fn script(&self, name: &str, body: &str) {
        fs::write(self.root.join("tests/suite").join(name), body).expect("write script");
    }

    fn store(&self) -> JsonConfigStore {
        JsonConfigStore::new(self.root.join("config/shell.json"))
    }

    fn runner(&self, args: &[&str], timeout: Duration, answers: &[&str]) -> (SuiteRunner, Arc<MemoryProgress>) {
        let mut builder = RunConfigurationBuilder::new("shell");
        builder
            .tests_location(self.root.join("tests"))
            .config_location(self.root.join("config"))
            .report_location(self.root.join("reports"));
        for arg in args {
            apply_arg(&mut builder, arg).expect("arg");
        }
        let launcher = ExternalLauncher::new("/bin/sh", timeout, Arc::new(DrainPool::new(2)));
        let sink = Arc::new(MemoryProgress::default());
        let runner = SuiteRunner::new(
            Arc::new(ShellSuite { launcher }),
            builder.build(),
            HostInfo::current(None),
            Box::new(self.store()),
            sink.clone(),
            Arc::new(ScriptedPrompt::new(answers.iter().copied())),
        );
        (runner, sink)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

#[test]
fn gate_fails_on_unexpected_failure_and_records_resume_prefix() {
    let ws = Workspace::new("gate");
    ws.script("a.sh", "exit 0\n");
    ws.script("b.sh", "echo known problem\nexit 1\n");
    ws.script("c.sh", "echo new problem\nexit 3\n");
    let mut database = ExpectedStatusDatabase::new();
    database.add_or_replace([TestDescriptor::new("suite/b.sh").with_status(Status::Fail)]);
    ws.store().save(&database).expect("seed database");

    let (runner, sink) = ws.runner(&["gate", "threads=2"], Duration::from_secs(10), &["n"]);
    let summary = runner.run().expect("run");

    assert_eq!(summary.exit_code, EXIT_GATE_FAILED);
    assert_eq!(summary.tally.passed, 1);
    assert_eq!(summary.tally.failed, 2);
    let gate = summary.gate.expect("gate outcome");
    assert_eq!(gate.unexpectedly_failed, vec!["suite/c.sh"]);
    assert!(gate.unexpectedly_passed.is_empty());
    assert!(!gate.database_updated);
    assert_eq!(
        fs::read_to_string(ws.root.join("config/shell.failed")).expect("resume file"),
        "suite/\n"
    );

    let lines = sink.lines();
    assert!(lines.iter().any(|l| l.starts_with("FAILED suite/c.sh") && l.contains("new problem")));
    assert!(!lines.iter().any(|l| l.starts_with("FAILED suite/b.sh")));
    assert!(lines.iter().any(|l| l == "== UNEXPECTEDLY FAILING TESTS =="));
    assert!(ws.root.join("reports/shell.txt").is_file());
    assert!(ws.root.join("reports/shell.html").is_file());

    // the stored expectations were left alone after the "n" answer
    assert_eq!(ws.store().load().expect("reload").len(), 1);
}

#[test]
fn hung_script_times_out_without_stalling_the_next_one() {
    let ws = Workspace::new("timeout");
    ws.script("slow.sh", "sleep 30\n");
    ws.script("z_quick.sh", "echo done\nexit 0\n");
    ws.store().save(&ExpectedStatusDatabase::new()).expect("seed database");

    let (runner, sink) = ws.runner(&["nothreads"], Duration::from_millis(300), &[]);
    let summary = runner.run().expect("run");
    assert_eq!(summary.tally.failed, 1);
    assert_eq!(summary.tally.timeouts, 1);
    assert_eq!(summary.tally.passed, 1);
    assert!(sink.lines().iter().any(|l| l == "TIMEOUT suite/slow.sh"));
    assert!(summary.gate.is_none());
}
