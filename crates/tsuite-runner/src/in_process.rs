use crate::console::CaptureBuffer;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

pub const REPORTED_STACK_FRAMES: usize = 10;

/// A named unit of script source. Text is shared so cached harness units
/// are never copied per test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub name: String,
    pub text: Arc<str>,
    pub module: bool,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            module: false,
        }
    }

    pub fn as_module(mut self) -> Self {
        self.module = true;
        self
    }
}

/// Error raised by a script, as reported by the executor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ScriptError {
    pub kind: String,
    pub message: String,
    pub stack: Vec<String>,
}

impl ScriptError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: Vec::new(),
        }
    }

    /// One line: the error plus its top stack frames.
    pub fn signature(&self) -> String {
        let mut out = self.to_string().replace('\n', " ").replace('\r', "");
        for frame in self.stack.iter().take(REPORTED_STACK_FRAMES) {
            out.push_str(" at ");
            out.push_str(frame);
        }
        out
    }
}

pub trait ScriptSession {
    /// Output of subsequent evaluations goes to `sink`; `None` discards it.
    fn redirect_output(&mut self, sink: Option<Box<dyn Write + Send>>);
    fn evaluate(&mut self, unit: &SourceUnit) -> Result<String, ScriptError>;
}

/// The engine under test.
pub trait ScriptExecutor: Send + Sync {
    /// Opens a session for one test. With `shared` set the executor may hand
    /// out a long-lived instance instead of a fresh one.
    fn open(
        &self,
        version: u32,
        options: &[(String, String)],
        shared: bool,
    ) -> Result<Box<dyn ScriptSession + '_>, ScriptError>;
}

#[derive(Clone)]
pub struct InProcessStrategy {
    executor: Arc<dyn ScriptExecutor>,
    shared: bool,
}

impl InProcessStrategy {
    pub fn new(executor: Arc<dyn ScriptExecutor>, shared: bool) -> Self {
        Self { executor, shared }
    }

    pub fn evaluate(
        &self,
        harness: &[SourceUnit],
        unit: &SourceUnit,
        version: u32,
        options: &[(String, String)],
        capture: Option<&CaptureBuffer>,
    ) -> Result<String, ScriptError> {
        let mut session = self.executor.open(version, options, self.shared)?;
        session.redirect_output(
            capture.map(|c| Box::new(c.clone()) as Box<dyn Write + Send>),
        );
        for prequel in harness {
            session.evaluate(prequel)?;
        }
        session.evaluate(unit)
    }
}

/// Harness sources read once per process, keyed by canonical path.
#[derive(Debug, Default)]
pub struct SourceCache {
    entries: RwLock<HashMap<PathBuf, Arc<str>>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, path: &Path) -> std::io::Result<SourceUnit> {
        let key = path.canonicalize()?;
        let name = path.to_string_lossy().to_string();
        if let Some(text) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(SourceUnit::new(name, Arc::clone(text)));
        }
        let text: Arc<str> = std::fs::read_to_string(&key)?.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let cached = entries.entry(key).or_insert(text);
        Ok(SourceUnit::new(name, Arc::clone(cached)))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
