use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Destination for every user-visible status line of a run.
pub trait ProgressSink: Send + Sync {
    fn line(&self, text: &str);
    fn progress(&self, done: usize, total: usize, current: &str);
}

/// Writes lines to stdout; draws an in-place progress line only on a terminal.
pub struct ConsoleProgress {
    interactive: bool,
    drawn: AtomicBool,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            interactive: io::stdout().is_terminal(),
            drawn: AtomicBool::new(false),
        }
    }

    fn clear(&self, out: &mut impl Write) {
        if self.drawn.swap(false, Ordering::SeqCst) {
            let _ = write!(out, "\r\x1b[2K");
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn line(&self, text: &str) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.clear(&mut out);
        let _ = writeln!(out, "{}", text);
    }

    fn progress(&self, done: usize, total: usize, current: &str) {
        if !self.interactive || total == 0 {
            return;
        }
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.clear(&mut out);
        let _ = write!(out, "[{:>3}%] {}", done * 100 / total, current);
        let _ = out.flush();
        self.drawn.store(true, Ordering::SeqCst);
    }
}

pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn line(&self, _text: &str) {}
    fn progress(&self, _done: usize, _total: usize, _current: &str) {}
}

/// Keeps every line in memory; progress updates are dropped.
#[derive(Default)]
pub struct MemoryProgress {
    lines: Mutex<Vec<String>>,
}

impl MemoryProgress {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressSink for MemoryProgress {
    fn line(&self, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }

    fn progress(&self, _done: usize, _total: usize, _current: &str) {}
}

pub trait Prompt: Send + Sync {
    /// Returns the operator's answer, or an empty string when nobody can answer.
    fn ask(&self, question: &str) -> String;
}

pub struct ConsolePrompt;

impl Prompt for ConsolePrompt {
    fn ask(&self, question: &str) -> String {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return String::new();
        }
        print!("{} ", question);
        let _ = io::stdout().flush();
        let mut answer = String::new();
        match stdin.lock().read_line(&mut answer) {
            Ok(_) => answer.trim_end_matches(['\r', '\n']).to_string(),
            Err(_) => String::new(),
        }
    }
}

/// Answers from a fixed queue, then empty strings. Records every question.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&self, question: &str) -> String {
        self.asked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(question.to_string());
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default()
    }
}

pub fn ask_yes_no(prompt: &dyn Prompt, question: &str) -> bool {
    prompt.ask(question).trim().to_lowercase().starts_with('y')
}

/// Shared, cloneable byte sink for captured script or process output.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap_or_else(PoisonError::into_inner))
            .into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
