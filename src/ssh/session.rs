// ABOUTME: Runs the script on the last hop over a single PTY-backed session channel.
// ABOUTME: Streams stdin/stdout/stderr concurrently and maps the remote exit to a result.

use super::chain::ConnectionChain;
use super::error::{Error, Op, RemoteExit, Result};
use crate::diagnostics::{Diagnostics, Warning};
use bytes::Bytes;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, Pty};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Extended-data stream number carrying stderr.
const STDERR_EXT: u32 = 1;

/// Chunks buffered per output stream before the channel reader waits on the caller.
const OUTPUT_QUEUE_DEPTH: usize = 32;

/// Pseudo-terminal parameters sent before the command.
#[derive(Debug, Clone, PartialEq)]
pub struct PtySpec {
    pub term: String,
    pub rows: u32,
    pub cols: u32,
    pub modes: Vec<(Pty, u32)>,
}

impl Default for PtySpec {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            rows: 40,
            cols: 80,
            modes: vec![
                (Pty::ECHO, 0),
                (Pty::TTY_OP_ISPEED, 14400),
                (Pty::TTY_OP_OSPEED, 14400),
            ],
        }
    }
}

/// The caller's three I/O handles.
pub struct Stdio<I, O, E> {
    pub stdin: I,
    pub stdout: O,
    pub stderr: E,
}

impl Stdio<tokio::io::Stdin, tokio::io::Stdout, tokio::io::Stderr> {
    /// This process's own standard streams.
    pub fn inherit() -> Self {
        Self {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
            stderr: tokio::io::stderr(),
        }
    }
}

/// Run `script` on the chain's last hop.
///
/// The session channel is closed on every path once the command has ended.
/// Stdout and stderr are fully flushed to the caller before this returns;
/// the stdin copy is cancelled once the command exits, since the caller's
/// input may never reach EOF.
pub async fn execute<I, O, E>(
    chain: &ConnectionChain,
    script: &[u8],
    pty: &PtySpec,
    stdio: Stdio<I, O, E>,
    diag: &mut Diagnostics,
) -> Result<()>
where
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
    E: AsyncWrite + Unpin + Send + 'static,
{
    let hop = chain.active();
    let mut channel = hop
        .handle()
        .channel_open_session()
        .await
        .map_err(|e| {
            Error::new(Op::OpenSession)
                .with_message(format!("failed to open session on {}: {}", hop.host(), e))
                .with_source(e)
        })?;

    tracing::debug!(host = %hop.host(), channel = ?channel.id(), "session opened");

    // Bind every stream before the remote process can produce output.
    let (stdout_tx, stdout_rx) = mpsc::channel(OUTPUT_QUEUE_DEPTH);
    let (stderr_tx, stderr_rx) = mpsc::channel(OUTPUT_QUEUE_DEPTH);
    let stderr_task = tokio::spawn(drain(stderr_rx, stdio.stderr));
    let stdin_task = tokio::spawn(feed(stdio.stdin, channel.make_writer()));
    let stdout_task = tokio::spawn(drain(stdout_rx, stdio.stdout));

    let mut demux = Demux::new(stdout_tx, stderr_tx);
    let outcome = drive(&mut channel, &mut demux, script, pty).await;

    // Closing the queues lets the writers finish once everything is flushed.
    drop(demux);
    stdin_task.abort();
    join_writer(stdout_task, "stdout", diag).await;
    join_writer(stderr_task, "stderr", diag).await;

    if let Err(e) = channel.close().await {
        diag.warn(Warning::session_close(format!(
            "failed to close session on {}: {}",
            hop.host(),
            e
        )));
    }

    outcome
}

async fn drive(
    channel: &mut Channel<Msg>,
    demux: &mut Demux,
    script: &[u8],
    pty: &PtySpec,
) -> Result<()> {
    channel
        .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, &pty.modes)
        .await
        .map_err(|e| Error::new(Op::RequestPty).with_source(e))?;

    match demux.await_reply(channel).await {
        Reply::Success => {}
        Reply::Failure => {
            return Err(Error::new(Op::RequestPty).with_message("remote refused pseudo-terminal"));
        }
        Reply::Closed => {
            return Err(Error::new(Op::RequestPty)
                .with_message("channel closed before pseudo-terminal was granted"));
        }
    }
    tracing::debug!(term = %pty.term, rows = pty.rows, cols = pty.cols, "pseudo-terminal granted");

    channel
        .exec(true, script.to_vec())
        .await
        .map_err(|e| Error::new(Op::Run).with_message("failed to submit script").with_source(e))?;
    tracing::debug!(bytes = script.len(), "script submitted");

    demux.run_to_exit(channel).await
}

enum Reply {
    Success,
    Failure,
    Closed,
}

/// Routes channel messages to the output queues and tracks how the command ends.
///
/// The queues are bounded: a caller that stops reading stalls the channel
/// reader, which in turn stops the remote side from sending more.
struct Demux {
    stdout: mpsc::Sender<Bytes>,
    stderr: mpsc::Sender<Bytes>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
    exec_refused: bool,
    eof: bool,
}

impl Demux {
    fn new(stdout: mpsc::Sender<Bytes>, stderr: mpsc::Sender<Bytes>) -> Self {
        Self {
            stdout,
            stderr,
            exit_status: None,
            exit_signal: None,
            exec_refused: false,
            eof: false,
        }
    }

    /// Wait for the reply to a request sent with `want_reply`.
    async fn await_reply(&mut self, channel: &mut Channel<Msg>) -> Reply {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => return Reply::Success,
                Some(ChannelMsg::Failure) => return Reply::Failure,
                Some(ChannelMsg::Close) | None => return Reply::Closed,
                Some(msg) => self.route(msg).await,
            }
        }
    }

    /// Pump messages until the remote side is done with the channel.
    async fn run_to_exit(&mut self, channel: &mut Channel<Msg>) -> Result<()> {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Failure) => {
                    self.exec_refused = true;
                    break;
                }
                Some(ChannelMsg::Close) | None => break,
                Some(msg) => self.route(msg).await,
            }
            if self.eof && (self.exit_status.is_some() || self.exit_signal.is_some()) {
                break;
            }
        }
        self.outcome()
    }

    async fn route(&mut self, msg: ChannelMsg) {
        match msg {
            // A closed queue means that writer already failed; its error is reported on join.
            ChannelMsg::Data { data } => {
                let _ = self.stdout.send(Bytes::copy_from_slice(&data)).await;
            }
            ChannelMsg::ExtendedData { data, ext } if ext == STDERR_EXT => {
                let _ = self.stderr.send(Bytes::copy_from_slice(&data)).await;
            }
            ChannelMsg::ExitStatus { exit_status } => {
                tracing::debug!(exit_status, "remote command exited");
                self.exit_status = Some(exit_status);
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                tracing::debug!(signal = ?signal_name, "remote command killed");
                self.exit_signal = Some(format!("{signal_name:?}"));
            }
            ChannelMsg::Eof => self.eof = true,
            _ => {}
        }
    }

    fn outcome(&self) -> Result<()> {
        if self.exec_refused {
            return Err(Error::new(Op::Run).with_message("remote refused to execute the script"));
        }
        match (self.exit_status, &self.exit_signal) {
            (Some(0), _) => Ok(()),
            (Some(status), _) => Err(Error::new(Op::Run).with_source(RemoteExit::Status(status))),
            (None, Some(signal)) => {
                Err(Error::new(Op::Run).with_source(RemoteExit::Signal(signal.clone())))
            }
            (None, None) => Err(Error::new(Op::Run)
                .with_message("channel closed without an exit status")),
        }
    }
}

/// Copy queued chunks into one of the caller's writers.
async fn drain<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(chunk) = rx.recv().await {
        writer.write_all(&chunk).await?;
        writer.flush().await?;
        written += chunk.len() as u64;
    }
    Ok(written)
}

/// Copy the caller's input into the remote stdin.
async fn feed<R, W>(mut reader: R, mut writer: W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;
    Ok(copied)
}

async fn join_writer(task: JoinHandle<std::io::Result<u64>>, stream: &str, diag: &mut Diagnostics) {
    match task.await {
        Ok(Ok(bytes)) => tracing::debug!(stream, bytes, "stream copy finished"),
        Ok(Err(e)) => diag.warn(Warning::stream_copy(format!(
            "failed to copy remote {stream}: {e}"
        ))),
        Err(e) => diag.warn(Warning::stream_copy(format!(
            "{stream} copy task failed: {e}"
        ))),
    }
}
