use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tsuite_core::{
    apply_arg, usage, ArgAction, HostInfo, JsonConfigStore, RunConfigurationBuilder, EXIT_NO_TESTS, EXIT_USAGE,
};
use tsuite_runner::test262::VERSION_FLAG;
use tsuite_runner::{
    ConsoleProgress, ConsolePrompt, DrainPool, ExternalLauncher, RunSummary, SuiteError, SuiteRunner,
    Test262Backend, Test262Suite,
};

#[derive(Parser)]
#[command(name = "tsuite", version = "0.3.0", about = "Conformance suite runner")]
struct Cli {
    /// Print a one-line JSON summary instead of only the console report
    #[arg(long)]
    json: bool,
    /// Suite name; also picks the default `lib/<suite>` location
    #[arg(long, default_value = "test262")]
    suite: String,
    /// Feature whose failing tests are reported as ignored (repeatable)
    #[arg(long = "unsupported-feature")]
    unsupported_features: Vec<String>,
    /// Run options as `key` or `key=value`; `help` lists them
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    tokens: Vec<String>,
}

enum Exit {
    Help(String),
    Usage(String),
    Finished(RunSummary),
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = cli.json;
    let suite = cli.suite.clone();
    match run_suite(cli) {
        Ok(Exit::Help(text)) => {
            println!("{}", text);
            std::process::exit(EXIT_USAGE);
        }
        Ok(Exit::Usage(message)) => {
            if json_mode {
                emit_json(&json_error("usage", message, json!({})));
            } else {
                eprintln!("error: {}", message);
                eprintln!("{}", usage(&suite));
            }
            std::process::exit(EXIT_USAGE);
        }
        Ok(Exit::Finished(summary)) => {
            if json_mode {
                emit_json(&json!({
                    "ok": true,
                    "command": "run",
                    "summary": summary
                }));
            }
            std::process::exit(summary.exit_code);
        }
        Err(err) => {
            if let Some(SuiteError::OverallDeadlineExceeded(seconds)) = err.downcast_ref::<SuiteError>() {
                // worker threads may still be inside a test; leave without joining them
                if json_mode {
                    emit_json(&json_error(
                        "overall_timeout",
                        err.to_string(),
                        json!({ "suite": suite, "seconds": seconds }),
                    ));
                }
                std::process::exit(EXIT_NO_TESTS);
            }
            if json_mode {
                emit_json(&json_error("run_failed", format!("{:#}", err), json!({ "suite": suite })));
            } else {
                eprintln!("error: {:#}", err);
            }
            std::process::exit(EXIT_NO_TESTS);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TSUITE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_suite(cli: Cli) -> Result<Exit> {
    let mut builder = RunConfigurationBuilder::new(&cli.suite);
    builder.suite_description(&format!("{} conformance suite", cli.suite));
    for token in &cli.tokens {
        match apply_arg(&mut builder, token) {
            Ok(ArgAction::Continue) => {}
            Ok(ArgAction::Help) => return Ok(Exit::Help(usage(&cli.suite))),
            Err(e) => return Ok(Exit::Usage(e.to_string())),
        }
    }
    let config = builder.build();
    let Some(launcher_path) = config.external_launcher().map(|p| p.to_path_buf()) else {
        return Ok(Exit::Usage(
            "no script engine available; pass launcher=<path to engine binary>".to_string(),
        ));
    };

    let host = HostInfo::current(config.runtime_version());
    debug!(host = %host.describe(), suite = %cli.suite, "starting run");
    let drain_pool = Arc::new(DrainPool::new(
        config.worker_threads(host.available_parallelism),
    ));
    let launcher = ExternalLauncher::new(
        launcher_path,
        Duration::from_secs(config.timeout_test()),
        drain_pool,
    )
    .common_options(config.launcher_options().to_vec())
    .version_flag(VERSION_FLAG);
    let suite = Test262Suite::new(
        Test262Backend::External(launcher),
        config.tests_location().join("harness"),
    )
    .unsupported_features(cli.unsupported_features.iter().cloned());

    let store = JsonConfigStore::new(config.database_path());
    let runner = SuiteRunner::new(
        Arc::new(suite),
        config,
        host,
        Box::new(store),
        Arc::new(ConsoleProgress::new()),
        Arc::new(ConsolePrompt),
    );
    let summary = runner
        .run()
        .with_context(|| format!("suite {} did not complete", cli.suite))?;
    Ok(Exit::Finished(summary))
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}
