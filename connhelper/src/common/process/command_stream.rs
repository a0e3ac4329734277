// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::{
  io::Error as IOError,
  pin::Pin,
  sync::{Arc, Mutex, PoisonError},
  task::{Context, Poll},
  time::Duration,
};

use futures::future::{BoxFuture, FutureExt};
use tokio::{
  io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf},
  process::{Child, ChildStderr, ChildStdin, ChildStdout},
  task::JoinHandle,
};

use crate::{common::errors::DialError, util::conn_stream::ConnStream};

/// Retains the most recent bytes a child wrote to stderr
#[derive(Debug)]
pub(super) struct StderrTail {
  buf: Vec<u8>,
  limit: usize,
}

impl StderrTail {
  pub(super) fn new(limit: usize) -> Self {
    Self {
      buf: Vec::new(),
      limit,
    }
  }

  fn push(&mut self, chunk: &[u8]) {
    self.buf.extend_from_slice(chunk);
    if self.buf.len() > self.limit {
      let excess = self.buf.len() - self.limit;
      self.buf.drain(..excess);
    }
  }

  fn lossy(&self) -> String {
    String::from_utf8_lossy(&self.buf).into_owned()
  }
}

/// A running child process, read through its stdout and written through its stdin
///
/// Stderr is drained in the background so it can never stall the child or
/// leak into the stream. Dropping the stream kills the child; [ConnStream::close]
/// gives it a grace period to exit on its own first.
pub struct CommandStream {
  command: String,
  child: Child,
  stdin: Option<ChildStdin>,
  stdout: ChildStdout,
  stderr: Arc<Mutex<StderrTail>>,
  stderr_task: Option<JoinHandle<()>>,
  grace_period: Duration,
}

impl CommandStream {
  pub(super) fn new(
    command: String,
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    tail: StderrTail,
    grace_period: Duration,
  ) -> Self {
    let tail = Arc::new(Mutex::new(tail));
    let pid = child.id();
    let stderr_task = stderr.map(|stderr| tokio::task::spawn(drain_stderr(pid, stderr, tail.clone())));
    Self {
      command,
      child,
      stdin: Some(stdin),
      stdout,
      stderr: tail,
      stderr_task,
      grace_period,
    }
  }

  /// The OS process id, if the child has not yet been reaped
  pub fn id(&self) -> Option<u32> {
    self.child.id()
  }

  /// The command line this stream was spawned from
  pub fn command(&self) -> &str {
    &self.command
  }

  /// Waits for the child to exit on its own, without closing either pipe
  pub async fn wait(&mut self) -> Result<std::process::ExitStatus, DialError> {
    Ok(self.child.wait().await?)
  }

  /// Stderr captured so far, lossily decoded
  pub fn stderr_snapshot(&self) -> String {
    self
      .stderr
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .lossy()
  }

  async fn shutdown_process(self) -> Result<(), DialError> {
    let Self {
      command,
      mut child,
      stdin,
      stdout,
      stderr,
      stderr_task,
      grace_period,
    } = self;
    let pid = child.id();
    // Closing both pipes signals EOF and unblocks any pending child writes
    drop(stdin);
    drop(stdout);

    let status = match tokio::time::timeout(grace_period, child.wait()).await {
      Ok(status) => Some(status?),
      Err(_elapsed) => {
        tracing::warn!(?pid, ?grace_period, "process outlived its grace period; killing");
        child.kill().await?;
        None
      }
    };

    if let Some(mut task) = stderr_task {
      // Descendants may hold stderr open after the child itself exits
      if tokio::time::timeout(grace_period, &mut task).await.is_err() {
        task.abort();
      }
    }

    match status {
      Some(status) if !status.success() => {
        let stderr = stderr.lock().unwrap_or_else(PoisonError::into_inner).lossy();
        tracing::debug!(?pid, %status, "process exited unsuccessfully");
        Err(DialError::ProcessExited {
          command,
          status,
          stderr,
        })
      }
      Some(status) => {
        tracing::trace!(?pid, %status, "process exited");
        Ok(())
      }
      None => Ok(()),
    }
  }
}

async fn drain_stderr(pid: Option<u32>, mut stderr: ChildStderr, tail: Arc<Mutex<StderrTail>>) {
  let mut buf = [0u8; 4096];
  loop {
    match stderr.read(&mut buf).await {
      Ok(0) => break,
      Ok(n) => {
        let chunk = &buf[..n];
        tracing::debug!(?pid, stderr = %String::from_utf8_lossy(chunk).trim_end(), "child stderr");
        tail
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .push(chunk);
      }
      Err(e) => {
        tracing::debug!(?pid, error = ?e, "child stderr read failed");
        break;
      }
    }
  }
}

impl AsyncRead for CommandStream {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<Result<(), IOError>> {
    AsyncRead::poll_read(Pin::new(&mut self.get_mut().stdout), cx, buf)
  }
}

impl AsyncWrite for CommandStream {
  fn poll_write(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<Result<usize, IOError>> {
    match self.get_mut().stdin {
      Some(ref mut stdin) => AsyncWrite::poll_write(Pin::new(stdin), cx, buf),
      None => Poll::Ready(Err(stdin_closed())),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), IOError>> {
    match self.get_mut().stdin {
      Some(ref mut stdin) => AsyncWrite::poll_flush(Pin::new(stdin), cx),
      None => Poll::Ready(Ok(())),
    }
  }

  /// Half-closes the stream; the child observes EOF on its stdin
  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), IOError>> {
    let this = self.get_mut();
    if let Some(ref mut stdin) = this.stdin {
      futures::ready!(AsyncWrite::poll_shutdown(Pin::new(stdin), cx))?;
    }
    this.stdin = None;
    Poll::Ready(Ok(()))
  }
}

fn stdin_closed() -> IOError {
  IOError::new(
    std::io::ErrorKind::BrokenPipe,
    "write half of the command stream has been shut down",
  )
}

impl ConnStream for CommandStream {
  fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), DialError>> {
    (*self).shutdown_process().boxed()
  }
}

impl std::fmt::Debug for CommandStream {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CommandStream")
      .field("command", &self.command)
      .field("pid", &self.child.id())
      .finish_non_exhaustive()
  }
}
