//! Execution side of the conformance runner: strategies that run one test
//! file, the per-file version fold, and the suite orchestrator that drives
//! discovery, scheduling, reporting and the gate.

pub mod console;
pub mod external;
pub mod in_process;
pub mod report;
pub mod resume;
pub mod suite;
pub mod task;
pub mod test262;

use std::path::PathBuf;
use thiserror::Error;
use tsuite_core::StoreError;

pub use console::{
    ask_yes_no, CaptureBuffer, ConsoleProgress, ConsolePrompt, MemoryProgress, NullProgress,
    ProgressSink, Prompt, ScriptedPrompt,
};
pub use external::{DrainHandle, DrainPool, ExternalLauncher, ProcessOutcome};
pub use in_process::{
    InProcessStrategy, ScriptError, ScriptExecutor, ScriptSession, SourceCache, SourceUnit,
};
pub use suite::{GateOutcome, RunSummary, SuiteDefinition, SuiteLog, SuiteRunner, TestContext};
pub use task::{fold_outcomes, ActiveTestGuard, TestTask, LONG_RUNNING_THRESHOLD};
pub use test262::{FrontMatter, Negative, ParsedTest, Test262Backend, Test262Suite};

/// Panic payload for shared engine state that a concurrent teardown left
/// poisoned. Raise it with `std::panic::panic_any`; the run reports the first
/// one and fails after the batch instead of stopping at once.
#[derive(Debug, Clone)]
pub struct TeardownPoison(pub String);

/// Errors that escape a test task and abort the whole run.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("cannot spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker panicked while running {path}: {message}")]
    WorkerPanic { path: String, message: String },
    /// Shared state was left poisoned by a concurrent teardown. Reported once.
    #[error("shared state poisoned while running {path}: {message}")]
    Poisoned { path: String, message: String },
    #[error("cannot read test metadata of {path}: {message}")]
    Metadata { path: String, message: String },
}

impl FatalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FatalError::Poisoned { .. })
    }
}

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("overall timeout of {0} seconds exceeded")]
    OverallDeadlineExceeded(u64),
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    ConfigRejected(String),
}

impl SuiteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SuiteError::Io {
            path: path.into(),
            source,
        }
    }
}
