use crate::console::CaptureBuffer;
use crate::FatalError;
use crossbeam_channel::{Receiver, Sender};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DRAIN_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    Failure { code: Option<i32> },
    Timeout,
}

struct DrainJob {
    source: Box<dyn Read + Send>,
    sink: Box<dyn Write + Send>,
    cancel: Arc<AtomicBool>,
    done: Sender<io::Result<()>>,
}

/// Threads that copy subprocess output into sinks. Separate from the test
/// scheduling pool. Every submitted job gets an idle thread; when none is
/// idle, for instance because a cancelled job is still blocked in a read,
/// the pool grows by one.
pub struct DrainPool {
    jobs: Sender<DrainJob>,
    queue: Receiver<DrainJob>,
    idle: Arc<AtomicUsize>,
    spawned: AtomicUsize,
}

pub struct DrainHandle {
    cancel: Arc<AtomicBool>,
    done: Receiver<io::Result<()>>,
}

impl DrainHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// `None` when the drain did not finish within `timeout`.
    pub fn wait(&self, timeout: Duration) -> Option<io::Result<()>> {
        self.done.recv_timeout(timeout).ok()
    }
}

impl DrainPool {
    pub fn new(threads: usize) -> Self {
        let (jobs, queue) = crossbeam_channel::unbounded::<DrainJob>();
        let pool = Self {
            jobs,
            queue,
            idle: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
        };
        for _ in 0..threads.max(1) {
            if let Err(e) = pool.spawn_worker(true) {
                warn!(error = %e, "cannot start drain thread");
            }
        }
        pool
    }

    pub fn threads(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// A worker started for a waiting job is not counted idle until that job
    /// is done.
    fn spawn_worker(&self, starts_idle: bool) -> io::Result<()> {
        let index = self.spawned.fetch_add(1, Ordering::SeqCst);
        let queue = self.queue.clone();
        let idle = Arc::clone(&self.idle);
        if starts_idle {
            idle.fetch_add(1, Ordering::SeqCst);
        }
        let spawned = thread::Builder::new()
            .name(format!("tsuite-drain-{}", index))
            .spawn(move || {
                for job in queue.iter() {
                    let result = drain(job.source, job.sink, &job.cancel);
                    let _ = job.done.send(result);
                    idle.fetch_add(1, Ordering::SeqCst);
                }
            });
        if let Err(e) = spawned {
            self.spawned.fetch_sub(1, Ordering::SeqCst);
            if starts_idle {
                self.idle.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Reserves an idle thread for the job, starting a new one when every
    /// existing thread is busy.
    pub fn submit(
        &self,
        source: Box<dyn Read + Send>,
        sink: Box<dyn Write + Send>,
    ) -> io::Result<DrainHandle> {
        let reserved = self
            .idle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !reserved {
            self.spawn_worker(false)?;
            debug!(threads = self.threads(), "drain pool grew");
        }
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let job = DrainJob {
            source,
            sink,
            cancel: Arc::clone(&cancel),
            done: done_tx,
        };
        self.jobs
            .send(job)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "drain pool closed"))?;
        Ok(DrainHandle {
            cancel,
            done: done_rx,
        })
    }
}

fn drain(
    mut source: Box<dyn Read + Send>,
    mut sink: Box<dyn Write + Send>,
    cancel: &AtomicBool,
) -> io::Result<()> {
    let mut buf = [0u8; DRAIN_CHUNK];
    loop {
        if cancel.load(Ordering::SeqCst) {
            return Ok(());
        }
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if cancel.load(Ordering::SeqCst) {
            return Ok(());
        }
        sink.write_all(&buf[..n])?;
    }
    sink.flush()
}

pub fn wait_for_child_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// The test runs in its own process group, so this also reaches whatever it
/// forked.
fn kill_process_group(child: &Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            unsafe {
                let _ = libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = child;
}

/// Runs each test version in a fresh subprocess.
pub struct ExternalLauncher {
    launcher: PathBuf,
    constant_flags: Vec<String>,
    common_options: Vec<String>,
    version_flag: Option<String>,
    timeout: Duration,
    drain_pool: Arc<DrainPool>,
}

impl ExternalLauncher {
    pub fn new(launcher: impl Into<PathBuf>, timeout: Duration, drain_pool: Arc<DrainPool>) -> Self {
        Self {
            launcher: launcher.into(),
            constant_flags: Vec::new(),
            common_options: Vec::new(),
            version_flag: None,
            timeout,
            drain_pool,
        }
    }

    pub fn constant_flags(mut self, flags: Vec<String>) -> Self {
        self.constant_flags = flags;
        self
    }

    pub fn common_options(mut self, options: Vec<String>) -> Self {
        self.common_options = options;
        self
    }

    /// Prefix of the version argument; the version number is appended as is.
    pub fn version_flag(mut self, flag: impl Into<String>) -> Self {
        self.version_flag = Some(flag.into());
        self
    }

    pub fn launcher(&self) -> &Path {
        &self.launcher
    }

    pub fn command_line(&self, version: u32, extra: &[(String, String)], args: &[String]) -> Vec<String> {
        let mut line = Vec::with_capacity(
            1 + self.constant_flags.len() + self.common_options.len() + 1 + extra.len() + args.len(),
        );
        line.push(self.launcher.to_string_lossy().to_string());
        line.extend(self.constant_flags.iter().cloned());
        line.extend(self.common_options.iter().cloned());
        if let Some(flag) = self.version_flag.as_deref() {
            line.push(format!("{}{}", flag, version));
        }
        line.extend(extra.iter().map(|(k, v)| format!("--{}={}", k, v)));
        line.extend(args.iter().cloned());
        line
    }

    /// Spawn failures propagate; everything the process does is an outcome.
    pub fn run(
        &self,
        version: u32,
        extra: &[(String, String)],
        args: &[String],
        capture: Option<&CaptureBuffer>,
    ) -> Result<ProcessOutcome, FatalError> {
        let line = self.command_line(version, extra, args);
        let program = line[0].clone();
        let mut cmd = Command::new(&program);
        cmd.args(&line[1..]);
        cmd.stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let reader = match capture {
            Some(_) => {
                let (reader, writer) = io::pipe()?;
                cmd.stdout(writer.try_clone()?);
                cmd.stderr(writer);
                Some(reader)
            }
            None => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
                None
            }
        };

        let spawned = cmd.spawn();
        // the command still owns our copies of the pipe's write end
        drop(cmd);
        let mut child = spawned.map_err(|source| FatalError::Spawn {
            program: program.clone(),
            source,
        })?;
        debug!(command = %line.join(" "), pid = child.id(), "spawned test process");

        let drain = match (reader, capture) {
            (Some(reader), Some(sink)) => {
                Some(self.drain_pool.submit(Box::new(reader), Box::new(sink.clone()))?)
            }
            _ => None,
        };

        let status = match wait_for_child_timeout(&mut child, self.timeout)? {
            Some(status) => status,
            None => {
                kill_process_group(&child);
                let _ = child.kill();
                let _ = child.wait();
                if let Some(drain) = drain.as_ref() {
                    drain.cancel();
                }
                return Ok(ProcessOutcome::Timeout);
            }
        };

        if let Some(drain) = drain.as_ref() {
            match drain.wait(self.timeout) {
                None => {
                    // something the test started still holds the pipe open
                    kill_process_group(&child);
                    drain.cancel();
                    warn!(
                        command = %line.join(" "),
                        "output drain did not finish in time; the process probably wrote too much output"
                    );
                    return Ok(ProcessOutcome::Timeout);
                }
                Some(Err(e)) => warn!(error = %e, "output drain failed"),
                Some(Ok(())) => {}
            }
        }

        Ok(if status.success() {
            ProcessOutcome::Success
        } else {
            ProcessOutcome::Failure {
                code: status.code(),
            }
        })
    }
}
