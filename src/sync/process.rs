use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::cancel::CancelToken;
use crate::error::RunError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const PIPE_CHUNK: usize = 64 * 1024;

/// Message sent from a pipe reader thread to the collecting side
pub enum ReadMsg {
    Data(Vec<u8>),
    Err(String),
    Eof,
}

/// Spawn a reader thread that drains `reader` in chunks of `chunk_size` and
/// forwards them as `ReadMsg` to `tx`. Returns the JoinHandle.
pub fn spawn_pipe_reader<R: Read + Send + 'static>(
    mut reader: R,
    tx: Sender<ReadMsg>,
    chunk_size: usize,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            let mut buf = vec![0u8; chunk_size];
            match reader.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(ReadMsg::Eof);
                    break;
                }
                Ok(n) => {
                    buf.truncate(n);
                    if tx.send(ReadMsg::Data(buf)).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(ReadMsg::Err(format!("pipe read error: {}", e)));
                    break;
                }
            }
        }
    })
}

/// Captured result of a finished child process.
#[derive(Debug)]
pub struct ChildOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ChildOutput {
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

fn collect(rx: Receiver<ReadMsg>) -> Result<Vec<u8>, RunError> {
    let mut out = Vec::new();
    for msg in rx.iter() {
        match msg {
            ReadMsg::Data(chunk) => out.extend_from_slice(&chunk),
            ReadMsg::Err(e) => return Err(RunError::Io(e)),
            ReadMsg::Eof => break,
        }
    }
    Ok(out)
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("[sync][proc] kill pid={} failed: {}", child.id(), e);
    }
    let _ = child.wait();
}

/// Run `cmd` to completion, feeding `stdin` (if any) and capturing stdout and
/// stderr. The child is polled rather than waited on so that a cancelled
/// `cancel` token kills it at the next poll.
pub fn run_to_completion(
    cmd: &mut Command,
    stdin: Option<Vec<u8>>,
    cancel: &CancelToken,
) -> Result<ChildOutput, RunError> {
    if cancel.is_cancelled() {
        return Err(RunError::Cancelled);
    }
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| RunError::Spawn(e.to_string()))?;

    let (out_tx, out_rx) = unbounded::<ReadMsg>();
    let (err_tx, err_rx) = unbounded::<ReadMsg>();
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(spawn_pipe_reader(out, out_tx, PIPE_CHUNK));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(spawn_pipe_reader(err, err_tx, PIPE_CHUNK));
    }
    // 写入 stdin 需独立线程，避免与输出管道互相阻塞
    // feed stdin off-thread so full pipes can't deadlock
    let writer = match (stdin, child.stdin.take()) {
        (Some(data), Some(mut pipe)) => Some(std::thread::spawn(move || {
            // the child may exit without reading everything; that is not our error
            let _ = pipe.write_all(&data);
        })),
        _ => None,
    };

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if cancel.is_cancelled() {
                    tracing::debug!("[sync][proc] cancelling pid={}", child.id());
                    kill_and_reap(&mut child);
                    if let Some(w) = writer {
                        let _ = w.join();
                    }
                    // readers are left detached: a grandchild may still hold the pipes
                    drop(readers);
                    return Err(RunError::Cancelled);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(RunError::Io(e.to_string()));
            }
        }
    };

    if let Some(w) = writer {
        let _ = w.join();
    }
    let stdout = collect(out_rx)?;
    let stderr = collect(err_rx)?;
    for h in readers {
        let _ = h.join();
    }
    Ok(ChildOutput { status, stdout, stderr })
}
