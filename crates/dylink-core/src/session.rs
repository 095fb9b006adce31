//! Persistent worker shells.
//!
//! A [`ShellSession`] owns one shell process. Commands are streamed to its
//! stdin, and after each one the shell appends `$?` (or `%errorlevel%`) to
//! the worker's status file. That file is the only way to learn which
//! command in the stream failed, so [`ShellSession::finish`] refuses to
//! report success unless it holds exactly one code per submitted command.

use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::artifacts;
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::platform::{Shell, ShellFlavor};
use crate::recipe::Recipe;

/// How often a session with a timeout checks whether its shell exited.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything needed to start a worker shell, shared by all workers of a
/// stage.
#[derive(Debug, Clone)]
pub struct SessionSpec<'a> {
    /// Working directory; status files live here too
    pub dir: &'a Path,

    /// Shell to spawn
    pub shell: &'a Shell,

    /// Run once before any submitted command
    pub init_command: &'a str,

    /// Status-capture syntax
    pub flavor: ShellFlavor,

    /// Kill the shell if it runs longer than this
    pub timeout: Option<Duration>,
}

impl<'a> SessionSpec<'a> {
    /// Sessions in `dir` using the recipe's shell and the config's
    /// flavor/timeout.
    pub fn for_recipe<R: Recipe + ?Sized>(recipe: &'a R, dir: &'a Path, config: &BuildConfig) -> Self {
        Self {
            dir,
            shell: recipe.shell(),
            init_command: recipe.init_command(),
            flavor: config.flavor,
            timeout: config.timeout,
        }
    }
}

/// What a finished session reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResult {
    /// Interleaved stdout and stderr
    pub output: String,

    /// One exit code per submitted command, in submission order
    pub exit_codes: Vec<i32>,
}

impl SessionResult {
    /// True when every command exited with status 0.
    pub fn succeeded(&self) -> bool {
        self.exit_codes.iter().all(|&code| code == 0)
    }

    /// Index and code of the first command that exited non-zero.
    pub fn first_failure(&self) -> Option<(usize, i32)> {
        self.exit_codes
            .iter()
            .copied()
            .enumerate()
            .find(|&(_, code)| code != 0)
    }
}

/// A running worker shell.
pub struct ShellSession {
    worker: usize,
    child: Child,
    /// Sender side of the input pump; dropping it closes the shell's stdin
    input: Option<Sender<String>>,
    pump: Option<JoinHandle<io::Result<()>>>,
    readers: Vec<JoinHandle<()>>,
    output: Arc<Mutex<Vec<u8>>>,
    status_path: PathBuf,
    flavor: ShellFlavor,
    timeout: Option<Duration>,
    /// Spawn time; the timeout counts from here
    started: Instant,
    submitted: usize,
    /// Set once the child has been reaped
    finished: bool,
}

impl ShellSession {
    /// Spawn the worker shell and queue its setup commands.
    ///
    /// Returns as soon as the process is running; the shell consumes its
    /// input in the background.
    pub fn start(worker: usize, spec: &SessionSpec<'_>) -> Result<Self> {
        let status_path = artifacts::status_file(spec.dir, worker);
        // A leftover file from an earlier run must not be mistaken for ours.
        artifacts::remove_if_exists(&status_path)?;

        let mut command = Command::new(&spec.shell.program);
        command
            .args(&spec.shell.args)
            .current_dir(spec.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout can kill the compilers too
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            worker,
            shell: spec.shell.to_string(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut session = Self {
            worker,
            child,
            input: None,
            pump: None,
            readers: Vec::with_capacity(2),
            output: Arc::new(Mutex::new(Vec::new())),
            status_path,
            flavor: spec.flavor,
            timeout: spec.timeout,
            started: Instant::now(),
            submitted: 0,
            finished: false,
        };

        // From here on, an early return drops `session`, which kills the shell.
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            return Err(Error::Io(io::Error::other(format!(
                "worker #{worker}: shell pipes unavailable"
            ))));
        };

        let (tx, rx) = mpsc::channel();
        session.pump = Some(spawn_pump(worker, stdin, rx)?);
        session.input = Some(tx);
        session
            .readers
            .push(spawn_reader(worker, "stdout", stdout, session.output.clone())?);
        session
            .readers
            .push(spawn_reader(worker, "stderr", stderr, session.output.clone())?);

        tracing::debug!(worker, shell = %spec.shell, dir = %spec.dir.display(), "worker shell started");

        if !spec.init_command.trim().is_empty() {
            session.send(format!("{}\n", spec.init_command.trim_end()));
        }
        let create = session.flavor.create_file_command(&session.status_path);
        session.send(format!("{create}\n"));

        Ok(session)
    }

    /// Worker id of this session.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Number of commands submitted so far.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Queue a command, followed by the bookkeeping that records its exit
    /// status.
    pub fn submit(&mut self, command: &str) {
        let record = self.flavor.record_status_command(&self.status_path);
        self.send(format!("{}\n{record}\n", command.trim_end()));
        self.submitted += 1;
        tracing::debug!(worker = self.worker, command, "command queued");
    }

    /// Close the shell's input, wait for it to exit and collect its output
    /// and exit codes.
    pub fn finish(mut self) -> Result<SessionResult> {
        self.input.take();

        let status = self.wait_for_exit()?;
        self.finished = true;
        tracing::debug!(worker = self.worker, %status, "worker shell exited");

        self.join_pump();
        let output = self.collect_output();
        let exit_codes = self.read_exit_codes(&output)?;

        Ok(SessionResult { output, exit_codes })
    }

    fn send(&mut self, text: String) {
        let Some(input) = &self.input else { return };
        if input.send(text).is_err() {
            // The pump quit because the shell closed its stdin. The short
            // status file will report it.
            tracing::debug!(worker = self.worker, "worker input already closed");
        }
    }

    fn wait_for_exit(&mut self) -> Result<ExitStatus> {
        let Some(timeout) = self.timeout else {
            return Ok(self.child.wait()?);
        };

        let deadline = self.started + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                tracing::warn!(worker = self.worker, ?timeout, "worker timed out, killing it");
                self.terminate();
                self.join_pump();
                let output = self.collect_output();
                return Err(Error::Timeout {
                    worker: self.worker,
                    after: timeout,
                    output,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kill the shell (and on Unix everything in its process group) and reap it.
    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            // A negative pid addresses the group created in `start`.
            unsafe {
                libc::kill(-(self.child.id() as libc::pid_t), libc::SIGKILL);
            }
        }

        match self.child.kill() {
            Ok(()) => {}
            // Already exited
            Err(e) if e.kind() == ErrorKind::InvalidInput => {}
            Err(e) => tracing::warn!(worker = self.worker, "failed to kill worker shell: {}", e),
        }
        let _ = self.child.wait();
        self.finished = true;
    }

    fn join_pump(&mut self) {
        let Some(pump) = self.pump.take() else { return };
        match pump.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {
                tracing::debug!(worker = self.worker, "shell exited before reading all input");
            }
            Ok(Err(e)) => {
                tracing::warn!(worker = self.worker, "failed to write worker input: {}", e);
            }
            Err(_) => tracing::warn!(worker = self.worker, "input pump panicked"),
        }
    }

    /// Wait for both output streams to close and decode what they carried.
    fn collect_output(&mut self) -> String {
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
        let bytes = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn read_exit_codes(&self, output: &str) -> Result<Vec<i32>> {
        let text = match fs::read_to_string(&self.status_path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(self.protocol_violation(0, output));
            }
            Err(e) => return Err(e.into()),
        };

        let mut codes = Vec::with_capacity(self.submitted);
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.parse::<i32>() {
                Ok(code) => codes.push(code),
                Err(_) => {
                    tracing::warn!(worker = self.worker, line, "unreadable exit status");
                    return Err(self.protocol_violation(codes.len(), output));
                }
            }
        }

        if codes.len() != self.submitted {
            return Err(self.protocol_violation(codes.len(), output));
        }
        Ok(codes)
    }

    fn protocol_violation(&self, recorded: usize, output: &str) -> Error {
        Error::ProtocolViolation {
            worker: self.worker,
            expected: self.submitted,
            recorded,
            output: output.to_string(),
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if !self.finished {
            self.input.take();
            self.terminate();
        }
    }
}

/// Forward queued text to the shell's stdin until the sender is dropped.
fn spawn_pump(
    worker: usize,
    stdin: ChildStdin,
    queue: Receiver<String>,
) -> Result<JoinHandle<io::Result<()>>> {
    let handle = thread::Builder::new()
        .name(format!("dylink-w{worker}-stdin"))
        .spawn(move || {
            let mut writer = BufWriter::new(stdin);
            for text in queue {
                writer.write_all(text.as_bytes())?;
                writer.flush()?;
            }
            writer.flush()
        })?;
    Ok(handle)
}

/// Copy a stream into the shared output buffer line by line, so stdout and
/// stderr interleave at line granularity.
fn spawn_reader(
    worker: usize,
    name: &str,
    stream: impl Read + Send + 'static,
    sink: Arc<Mutex<Vec<u8>>>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(format!("dylink-w{worker}-{name}"))
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&line),
                }
            }
        })?;
    Ok(handle)
}
