use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::ops::BitOr;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::error::{ProcessError, Result};
use crate::pipe::{self, Pipe};
use crate::signal::{SharedSignal, SignalId};

const RELAY_CHUNK_SIZE: usize = 4096;

/// How the child was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Started with [`Process::exec`]; the caller blocked until the output ended.
    Sync,
    /// Started with [`Process::start`]; the caller continued immediately.
    Async,
}

/// Lifecycle of a [`Process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Unset,
    Running,
    Done,
    Error,
}

/// Options for [`Process::exec`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecFlags(u32);

impl ExecFlags {
    pub const NONE: Self = Self(0);
    /// Keep the child's stdin open while waiting for it.
    pub const NO_CLOSE_STDIN: Self = Self(1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ExecFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Default)]
struct Output {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    pid: Option<u32>,
}

#[derive(Debug, Default)]
struct Shared {
    output: Mutex<Output>,
    child: Mutex<Option<Child>>,
    reaped: AtomicBool,
    stdout_ready: SharedSignal<ProcessHandle>,
    stderr_ready: SharedSignal<ProcessHandle>,
    finished: SharedSignal<ProcessHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared view of a running or finished child, handed to signal slots.
///
/// Cheap to clone and usable from any thread.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    shared: Arc<Shared>,
}

impl ProcessHandle {
    /// Exit status, or `None` until the child has been waited on.
    ///
    /// A Unix child killed by a signal reports `128 + signal`.
    pub fn return_code(&self) -> Option<i32> {
        lock(&self.shared.output).exit_code
    }

    /// Whether the child has been waited on and released.
    pub fn is_finished(&self) -> bool {
        self.shared.reaped.load(Ordering::Acquire)
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.shared.output).pid
    }

    /// Take everything captured from stdout so far.
    pub fn read_all_stdout(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.shared.output).stdout)
    }

    /// Take everything captured from stderr so far.
    pub fn read_all_stderr(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.shared.output).stderr)
    }

    /// Block until the child exits. Idempotent.
    pub fn wait_for_process_to_finish(&self) {
        wait_for_exit(&self.shared);
    }
}

/// A child process with piped standard streams.
///
/// Output is captured by two relay threads. Dropping a `Process` closes the
/// child's stdin, waits for the child to exit and joins both relays.
///
/// ```no_run
/// use msgrelay_process::{ExecFlags, Process};
///
/// let mut process = Process::new();
/// process.exec("git", &["--version"], None, ExecFlags::NONE)?;
/// println!("{}", String::from_utf8_lossy(&process.read_all_stdout()));
/// # Ok::<(), msgrelay_process::ProcessError>(())
/// ```
#[derive(Debug)]
pub struct Process {
    handle: ProcessHandle,
    mode: ExecMode,
    state: ExecState,
    stdin: Option<File>,
    stdout_relay: Option<JoinHandle<()>>,
    stderr_relay: Option<JoinHandle<()>>,
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl Process {
    pub fn new() -> Self {
        Self {
            handle: ProcessHandle {
                shared: Arc::new(Shared::default()),
            },
            mode: ExecMode::Sync,
            state: ExecState::Unset,
            stdin: None,
            stdout_relay: None,
            stderr_relay: None,
        }
    }

    /// Spawn `command` and block until its output streams have ended.
    ///
    /// The child's stdin is closed first unless `flags` contains
    /// [`ExecFlags::NO_CLOSE_STDIN`]. `timeout` is accepted but not
    /// enforced.
    pub fn exec(
        &mut self,
        command: &str,
        args: &[&str],
        timeout: Option<Duration>,
        flags: ExecFlags,
    ) -> Result<()> {
        if let Some(timeout) = timeout {
            debug!(?timeout, command, "exec timeout is not enforced");
        }

        self.start_internal(command, args, &[], ExecMode::Sync)?;
        if !flags.contains(ExecFlags::NO_CLOSE_STDIN) {
            self.close_stdin();
        }
        self.join_relays();
        self.state = ExecState::Done;
        Ok(())
    }

    /// Spawn `command` and return immediately.
    ///
    /// A non-empty `environ` (`KEY=VALUE` entries) replaces the child's
    /// environment.
    pub fn start(&mut self, command: &str, args: &[&str], environ: &[&str]) -> Result<()> {
        self.start_internal(command, args, environ, ExecMode::Async)
    }

    fn start_internal(
        &mut self,
        command: &str,
        args: &[&str],
        environ: &[&str],
        mode: ExecMode,
    ) -> Result<()> {
        if self.state != ExecState::Unset {
            return Err(ProcessError::AlreadyStarted);
        }
        self.mode = mode;

        match self.spawn(command, args, environ) {
            Ok(()) => {
                self.state = ExecState::Running;
                debug!(command, pid = ?self.pid(), ?mode, "process started");
                Ok(())
            }
            Err(err) => {
                error!(command, error = %err, "failed to start process");
                self.state = ExecState::Error;
                Err(err)
            }
        }
    }

    fn spawn(&mut self, program: &str, args: &[&str], environ: &[&str]) -> Result<()> {
        let guard = pipe::creation_guard();
        let stdin = Pipe::new().map_err(ProcessError::Pipe)?;
        let stdout = Pipe::new().map_err(ProcessError::Pipe)?;
        let stderr = Pipe::new().map_err(ProcessError::Pipe)?;
        for stream in [&stdin, &stdout, &stderr] {
            stream
                .restrict_inheritance()
                .map_err(ProcessError::Inheritance)?;
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::from(stdin.read))
            .stdout(Stdio::from(stdout.write))
            .stderr(Stdio::from(stderr.write));
        if !environ.is_empty() {
            command.env_clear();
            for &entry in environ {
                let (key, value) = entry.split_once('=').unwrap_or((entry, ""));
                command.env(key, value);
            }
        }

        let spawned = command.spawn();
        // The command owns the parent's copies of the child's ends; they must
        // be closed for the relays to see end-of-stream.
        drop(command);
        drop(guard);
        let child = spawned.map_err(|source| ProcessError::Spawn {
            command: program.to_string(),
            source,
        })?;

        let shared = &self.handle.shared;
        lock(&shared.output).pid = Some(child.id());
        *lock(&shared.child) = Some(child);
        self.stdin = Some(File::from(stdin.write));

        self.stdout_relay = Some(spawn_relay(
            self.handle.clone(),
            File::from(stdout.read),
            Stream::Stdout,
        )?);
        self.stderr_relay = Some(spawn_relay(
            self.handle.clone(),
            File::from(stderr.read),
            Stream::Stderr,
        )?);
        Ok(())
    }

    /// Write `bytes` to the child's stdin.
    pub fn write_stdin(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(ProcessError::StdinClosed)?;
        stdin.write_all(bytes)?;
        stdin.flush()?;
        Ok(())
    }

    /// Close the child's stdin so it sees end-of-stream.
    pub fn close_stdin(&mut self) {
        if self.stdin.take().is_some() {
            trace!(pid = ?self.pid(), "closed child stdin");
        }
    }

    /// Block until the child exits, then record its exit status and fire
    /// `finished`. Idempotent; concurrent callers serialize and the later
    /// ones return immediately.
    ///
    /// Must not be called from a `finished` slot.
    pub fn wait_for_process_to_finish(&self) {
        wait_for_exit(&self.handle.shared);
    }

    /// Exit status, or `None` until the child has been waited on.
    pub fn return_code(&self) -> Option<i32> {
        self.handle.return_code()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    pub fn state(&self) -> ExecState {
        match self.state {
            ExecState::Running if self.is_finished() => ExecState::Done,
            state => state,
        }
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// Take everything captured from stdout so far.
    pub fn read_all_stdout(&self) -> Vec<u8> {
        self.handle.read_all_stdout()
    }

    /// Take everything captured from stderr so far.
    pub fn read_all_stderr(&self) -> Vec<u8> {
        self.handle.read_all_stderr()
    }

    /// A handle that can outlive borrows of this process.
    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    /// Fired on a relay thread after new stdout bytes were captured.
    pub fn on_stdout_ready(
        &self,
        slot: impl Fn(&ProcessHandle) + Send + Sync + 'static,
    ) -> SignalId {
        self.handle.shared.stdout_ready.connect(slot)
    }

    /// Fired on a relay thread after new stderr bytes were captured.
    pub fn on_stderr_ready(
        &self,
        slot: impl Fn(&ProcessHandle) + Send + Sync + 'static,
    ) -> SignalId {
        self.handle.shared.stderr_ready.connect(slot)
    }

    /// Fired once, after the exit status was recorded.
    pub fn on_finished(&self, slot: impl Fn(&ProcessHandle) + Send + Sync + 'static) -> SignalId {
        self.handle.shared.finished.connect(slot)
    }

    pub fn stdout_ready(&self) -> &SharedSignal<ProcessHandle> {
        &self.handle.shared.stdout_ready
    }

    pub fn stderr_ready(&self) -> &SharedSignal<ProcessHandle> {
        &self.handle.shared.stderr_ready
    }

    pub fn finished(&self) -> &SharedSignal<ProcessHandle> {
        &self.handle.shared.finished
    }

    fn join_relays(&mut self) {
        for relay in [self.stdout_relay.take(), self.stderr_relay.take()]
            .into_iter()
            .flatten()
        {
            if relay.join().is_err() {
                error!("output relay thread panicked");
            }
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.close_stdin();
        wait_for_exit(&self.handle.shared);
        self.join_relays();
    }
}

fn spawn_relay(handle: ProcessHandle, pipe: File, stream: Stream) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("msgrelay-{}", stream.name()))
        .spawn(move || relay_output(handle, pipe, stream))
        .map_err(ProcessError::Thread)
}

fn relay_output(handle: ProcessHandle, mut pipe: File, stream: Stream) {
    let shared = &handle.shared;
    let signal = match stream {
        Stream::Stdout => &shared.stdout_ready,
        Stream::Stderr => &shared.stderr_ready,
    };

    let mut chunk = [0u8; RELAY_CHUNK_SIZE];
    loop {
        match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                {
                    let mut output = lock(&shared.output);
                    let buffer = match stream {
                        Stream::Stdout => &mut output.stdout,
                        Stream::Stderr => &mut output.stderr,
                    };
                    buffer.extend_from_slice(&chunk[..n]);
                }
                signal.emit(&handle);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::BrokenPipe => break,
            Err(err) => {
                error!(stream = stream.name(), error = %err, "failed to read child output");
                break;
            }
        }
    }
    drop(pipe);
    trace!(stream = stream.name(), "output relay finished");

    if stream == Stream::Stdout {
        wait_for_exit(shared);
    }
}

fn wait_for_exit(shared: &Arc<Shared>) {
    let mut child = lock(&shared.child);
    let Some(running) = child.as_mut() else {
        return;
    };

    let exit_code = match running.wait() {
        Ok(status) => exit_code(status),
        Err(err) => {
            error!(pid = running.id(), error = %err, "failed to wait for child");
            None
        }
    };
    debug!(pid = running.id(), ?exit_code, "process finished");
    lock(&shared.output).exit_code = exit_code;

    shared.finished.emit(&ProcessHandle {
        shared: Arc::clone(shared),
    });

    *child = None;
    shared.reaped.store(true, Ordering::Release);
}

fn exit_code(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(128 + signal);
        }
    }
    None
}
