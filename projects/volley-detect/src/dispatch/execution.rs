// Execution unit: one detection script subprocess per job
//
// The unit owns the child process through a supervisor task. The dispatcher
// keeps only a handle that can request termination; natural exits are
// reported back over a channel.

use crate::dispatch::types::{DetectionRequest, JobId};
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// How the detection script is invoked.
#[derive(Debug, Clone)]
pub struct ScriptCommand {
    /// Interpreter, normally `python3`.
    pub program: PathBuf,
    pub script: PathBuf,
    pub working_dir: Option<PathBuf>,
}

/// Sent to the dispatcher when a subprocess exits without being terminated.
#[derive(Debug)]
pub struct UnitExit {
    pub job_id: JobId,
    pub status: io::Result<ExitStatus>,
}

type TerminateAck = oneshot::Sender<io::Result<ExitStatus>>;

/// Handle to a running subprocess.
pub struct ExecutionUnit {
    job_id: JobId,
    pid: Option<u32>,
    terminate_tx: Option<oneshot::Sender<TerminateAck>>,
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl ExecutionUnit {
    /// Spawns the script for `request`. Must be called within a Tokio runtime.
    pub fn launch(
        job_id: JobId,
        command: &ScriptCommand,
        request: &DetectionRequest,
        exit_tx: mpsc::UnboundedSender<UnitExit>,
    ) -> io::Result<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.arg(&command.script)
            .args(request.script_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();
        info!(job_id = %job_id, pid = ?pid, "Detection script started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(job_id, stdout, OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(job_id, stderr, OutputStream::Stderr));
        }

        let (terminate_tx, terminate_rx) = oneshot::channel();
        tokio::spawn(supervise(job_id, child, terminate_rx, exit_tx));

        Ok(Self {
            job_id,
            pid,
            terminate_tx: Some(terminate_tx),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Kills the subprocess and waits until it has been reaped.
    ///
    /// Returns `Ok(None)` when there was nothing left to terminate: either a
    /// previous call already did it or the process exited on its own first.
    pub async fn terminate(&mut self) -> io::Result<Option<ExitStatus>> {
        let Some(terminate_tx) = self.terminate_tx.take() else {
            return Ok(None);
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if terminate_tx.send(ack_tx).is_err() {
            debug!(job_id = %self.job_id, "Detection script already exited");
            return Ok(None);
        }

        match ack_rx.await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }
}

async fn supervise(
    job_id: JobId,
    mut child: Child,
    terminate_rx: oneshot::Receiver<TerminateAck>,
    exit_tx: mpsc::UnboundedSender<UnitExit>,
) {
    tokio::select! {
        status = child.wait() => {
            match &status {
                Ok(s) if s.success() => info!(job_id = %job_id, "Detection script exited"),
                Ok(s) => warn!(job_id = %job_id, code = ?s.code(), "Detection script exited with failure"),
                Err(e) => error!(job_id = %job_id, "Failed to wait on detection script: {}", e),
            }
            if exit_tx.send(UnitExit { job_id, status }).is_err() {
                debug!(job_id = %job_id, "Dispatcher gone, exit not reported");
            }
        }
        request = terminate_rx => {
            let result = kill_and_reap(&mut child).await;
            match request {
                Ok(ack) => {
                    let _ = ack.send(result);
                }
                Err(_) => {
                    // Handle dropped without a request; nobody owns the child anymore.
                    if let Err(e) = result {
                        error!(job_id = %job_id, "Failed to kill orphaned detection script: {}", e);
                    }
                }
            }
        }
    }
}

async fn kill_and_reap(child: &mut Child) -> io::Result<ExitStatus> {
    child.start_kill()?;
    child.wait().await
}

async fn forward_lines<R: AsyncRead + Unpin>(job_id: JobId, reader: R, stream: OutputStream) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match stream {
                OutputStream::Stdout => info!(job_id = %job_id, "stdout: {}", line),
                OutputStream::Stderr => warn!(job_id = %job_id, "stderr: {}", line),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(job_id = %job_id, ?stream, "Stopped reading script output: {}", e);
                break;
            }
        }
    }
}
