//! Child process execution with timeouts, cancellation and group termination.

use super::{CommandSpec, Workspace};
use crate::error::ProcessError;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Combined output retained per process.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// How long to wait for pipe readers after the process is gone.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

const SPAWN_ATTEMPTS: u32 = 3;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(250);

const SWEEP_POLL_INTERVAL: Duration = Duration::from_millis(25);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub status: Option<ExitStatus>,
    pub output: String,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.status.is_some_and(|s| s.success())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }
}

/// Shared stdout+stderr capture that keeps the most recent bytes.
#[derive(Debug, Default)]
struct OutputBuffer {
    text: Mutex<String>,
}

impl OutputBuffer {
    fn push(&self, chunk: &str) {
        let Ok(mut text) = self.text.lock() else {
            return;
        };
        text.push_str(chunk);
        if text.len() > MAX_OUTPUT_BYTES * 2 {
            let mut cut = text.len() - MAX_OUTPUT_BYTES;
            while !text.is_char_boundary(cut) {
                cut += 1;
            }
            text.drain(..cut);
        }
    }

    fn snapshot(&self) -> String {
        self.text.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

struct Spawned {
    child: Child,
    output: Arc<OutputBuffer>,
    readers: Vec<JoinHandle<()>>,
}

impl Spawned {
    async fn collect_output(&mut self) -> String {
        for reader in self.readers.drain(..) {
            if tokio::time::timeout(IO_CAPTURE_TIMEOUT, reader).await.is_err() {
                debug!("output reader still open after process exit");
            }
        }
        self.output.snapshot()
    }
}

fn build_command(spec: &CommandSpec) -> Command {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    command
}

fn spawn_reader<R>(reader: R, buffer: Arc<OutputBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::with_capacity(256);
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => buffer.push(&String::from_utf8_lossy(&line)),
                Err(err) => {
                    debug!(error = %err, "output pipe closed with error");
                    break;
                }
            }
        }
    })
}

async fn spawn(spec: &CommandSpec) -> Result<Spawned, ProcessError> {
    let mut last_error = None;
    for attempt in 1..=SPAWN_ATTEMPTS {
        match build_command(spec).spawn() {
            Ok(mut child) => {
                let output = Arc::new(OutputBuffer::default());
                let mut readers = Vec::with_capacity(2);
                if let Some(stdout) = child.stdout.take() {
                    readers.push(spawn_reader(stdout, output.clone()));
                }
                if let Some(stderr) = child.stderr.take() {
                    readers.push(spawn_reader(stderr, output.clone()));
                }
                debug!(command = %spec.label(), pid = child.id(), attempt, "process spawned");
                return Ok(Spawned {
                    child,
                    output,
                    readers,
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProcessError::NotFound(spec.program.clone()));
            }
            Err(err) => {
                warn!(command = %spec.label(), attempt, error = %err, "spawn failed");
                last_error = Some(err);
                if attempt < SPAWN_ATTEMPTS {
                    tokio::time::sleep(SPAWN_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(ProcessError::Spawn {
        program: spec.program.clone(),
        attempts: SPAWN_ATTEMPTS,
        source: last_error.unwrap_or_else(|| std::io::Error::other("spawn failed")),
    })
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // Negative pid addresses the whole process group.
    if unsafe { libc::kill(-pid, signal) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, signal, error = %err, "failed to signal process group");
        }
    }
}

#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    i32::try_from(pid).is_ok_and(|pid| unsafe { libc::kill(-pid, 0) } == 0)
}

/// Stop whatever an exited leader left running in its group.
async fn sweep_group(pid: Option<u32>, grace: Duration) {
    #[cfg(unix)]
    {
        let Some(pid) = pid else {
            return;
        };
        if !group_alive(pid) {
            return;
        }
        debug!(pid, "stopping processes left behind by the leader");
        signal_group(pid, libc::SIGTERM);
        let deadline = Instant::now() + grace;
        while group_alive(pid) && Instant::now() < deadline {
            tokio::time::sleep(SWEEP_POLL_INTERVAL).await;
        }
        if group_alive(pid) {
            signal_group(pid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = (pid, grace);
}

/// SIGTERM the group, wait `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGTERM);
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                // Leader is gone; sweep any stragglers left in the group.
                signal_group(pid, libc::SIGKILL);
                return;
            }
            warn!(pid, grace_ms = grace.as_millis() as u64, "process ignored SIGTERM; killing");
            signal_group(pid, libc::SIGKILL);
            let _ = child.wait().await;
            return;
        }
    }
    #[cfg(not(unix))]
    let _ = grace;
    if let Err(err) = child.kill().await {
        debug!(error = %err, "kill after exit");
    }
}

/// Run to completion, bounded by the command's timeout and by `cancel`.
pub async fn run_command(
    spec: &CommandSpec,
    cancel: &CancellationToken,
) -> Result<CommandOutcome, ProcessError> {
    let started = Instant::now();
    let mut spawned = spawn(spec).await?;
    // `Child::id` is gone once the child has been reaped.
    let pid = spawned.child.id();

    let (status, timed_out, cancelled) = tokio::select! {
        status = spawned.child.wait() => {
            let status = status?;
            sweep_group(pid, spec.kill_grace).await;
            (Some(status), false, false)
        }
        () = tokio::time::sleep(spec.timeout) => {
            warn!(command = %spec.label(), timeout_secs = spec.timeout.as_secs(), "process timed out");
            terminate(&mut spawned.child, spec.kill_grace).await;
            (None, true, false)
        }
        () = cancel.cancelled() => {
            info!(command = %spec.label(), "cancellation requested; stopping process");
            terminate(&mut spawned.child, spec.kill_grace).await;
            (None, false, true)
        }
    };

    let output = spawned.collect_output().await;
    let outcome = CommandOutcome {
        status,
        output,
        timed_out,
        cancelled,
        duration: started.elapsed(),
    };
    debug!(
        command = %spec.label(),
        exit_code = outcome.exit_code(),
        timed_out,
        duration_ms = outcome.duration.as_millis() as u64,
        "process finished"
    );
    Ok(outcome)
}

/// A dev server that accepted a TCP connection. Stopped by `shutdown` or on drop.
#[derive(Debug)]
pub struct RunningServer {
    pub port: u16,
    pub url: String,
    pub pid: Option<u32>,
    child: Child,
    output: Arc<OutputBuffer>,
    grace: Duration,
    workspace: Option<Workspace>,
}

impl RunningServer {
    /// Output captured so far.
    pub fn output(&self) -> String {
        self.output.snapshot()
    }

    /// Hand over the directory the server runs from; removed on `shutdown`.
    pub fn attach_workspace(&mut self, workspace: Workspace) {
        self.workspace = Some(workspace);
    }

    pub fn workspace_path(&self) -> Option<&std::path::Path> {
        self.workspace.as_ref().map(Workspace::path)
    }

    pub async fn shutdown(mut self) {
        info!(port = self.port, "stopping server");
        terminate(&mut self.child, self.grace).await;
        if let Some(workspace) = self.workspace.take() {
            let outcome = tokio::task::spawn_blocking(move || workspace.teardown()).await;
            debug!(?outcome, "server workspace torn down");
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                signal_group(pid, libc::SIGKILL);
            }
        }
    }
}

#[derive(Debug)]
pub enum ServerLaunch {
    Ready(RunningServer),
    Failed { output: String, timed_out: bool },
    Cancelled,
}

async fn connectable(port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Start a long-running server and wait for its port to accept connections.
pub async fn launch_server(
    spec: &CommandSpec,
    port: u16,
    cancel: &CancellationToken,
) -> Result<ServerLaunch, ProcessError> {
    if connectable(port).await {
        warn!(port, "port already accepts connections before launch");
        return Ok(ServerLaunch::Failed {
            output: format!("Error: listen EADDRINUSE: address already in use 127.0.0.1:{}", port),
            timed_out: false,
        });
    }

    let mut spawned = spawn(spec).await?;
    let deadline = Instant::now() + spec.timeout;

    loop {
        if let Some(status) = spawned.child.try_wait()? {
            let output = spawned.collect_output().await;
            warn!(command = %spec.label(), code = status.code(), "server exited before accepting connections");
            return Ok(ServerLaunch::Failed {
                output: format!("Process exited: {}", output),
                timed_out: false,
            });
        }

        // An exit during the probe is reported at the top of the next pass.
        if connectable(port).await && spawned.child.try_wait()?.is_none() {
            info!(port, pid = spawned.child.id(), "server is accepting connections");
            let pid = spawned.child.id();
            return Ok(ServerLaunch::Ready(RunningServer {
                port,
                url: format!("http://localhost:{}", port),
                pid,
                child: spawned.child,
                output: spawned.output,
                grace: spec.kill_grace,
                workspace: None,
            }));
        }

        if Instant::now() >= deadline {
            warn!(port, timeout_secs = spec.timeout.as_secs(), "server never became connectable");
            terminate(&mut spawned.child, spec.kill_grace).await;
            let output = spawned.collect_output().await;
            return Ok(ServerLaunch::Failed {
                output,
                timed_out: true,
            });
        }

        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            () = cancel.cancelled() => {
                terminate(&mut spawned.child, spec.kill_grace).await;
                return Ok(ServerLaunch::Cancelled);
            }
        }
    }
}
