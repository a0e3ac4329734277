// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Subprocesses whose stdio serves as a network-like duplex stream

use std::{io, process::Stdio, sync::Arc, time::Duration};

use futures::future::{BoxFuture, FutureExt};
use tokio::process::Command;
use tracing_futures::Instrument;

use super::errors::DialError;
use crate::util::{cancellation::DialContext, conn_stream::BoxedConnStream};

mod command_stream;

pub use command_stream::CommandStream;
use command_stream::StderrTail;

/// Starts a program and hands back its stdio as a single stream
///
/// The [DialContext] governs process creation only; once a stream has been
/// returned, its lifetime belongs to the caller.
pub trait ProcessSpawner: Send + Sync {
  fn spawn(
    &self,
    ctx: DialContext,
    program: &str,
    args: &[String],
  ) -> BoxFuture<'static, Result<BoxedConnStream, DialError>>;
}

impl<T: ProcessSpawner + ?Sized> ProcessSpawner for Arc<T> {
  fn spawn(
    &self,
    ctx: DialContext,
    program: &str,
    args: &[String],
  ) -> BoxFuture<'static, Result<BoxedConnStream, DialError>> {
    T::spawn(self, ctx, program, args)
  }
}

/// [ProcessSpawner] backed by [tokio::process]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpawner {
  grace_period: Duration,
  stderr_limit: usize,
}

impl CommandSpawner {
  pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
  pub const DEFAULT_STDERR_LIMIT: usize = 64 * 1024;

  pub fn new() -> Self {
    Self {
      grace_period: Self::DEFAULT_GRACE_PERIOD,
      stderr_limit: Self::DEFAULT_STDERR_LIMIT,
    }
  }

  /// How long [CommandStream] closure waits for a voluntary exit before killing
  pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
    self.grace_period = grace_period;
    self
  }

  /// How many trailing bytes of stderr are retained for diagnostics
  pub fn with_stderr_limit(mut self, stderr_limit: usize) -> Self {
    self.stderr_limit = stderr_limit;
    self
  }

  pub fn grace_period(&self) -> Duration {
    self.grace_period
  }

  pub fn stderr_limit(&self) -> usize {
    self.stderr_limit
  }

  /// Spawns `program` with piped stdio, returning the concrete stream type
  pub fn spawn_command(
    &self,
    ctx: DialContext,
    program: &str,
    args: &[String],
  ) -> BoxFuture<'static, Result<CommandStream, DialError>> {
    self.spawn_observed(ctx, program, args, |_pid| ())
  }

  /// Like [Self::spawn_command], calling `after_spawn` once the child exists
  /// and before the context is checked again
  fn spawn_observed<H>(
    &self,
    ctx: DialContext,
    program: &str,
    args: &[String],
    after_spawn: H,
  ) -> BoxFuture<'static, Result<CommandStream, DialError>>
  where
    H: FnOnce(Option<u32>) + Send + 'static,
  {
    let program = program.to_owned();
    let args = args.to_vec();
    let grace_period = self.grace_period;
    let stderr_limit = self.stderr_limit;
    let span = tracing::debug_span!("spawn", %program);
    async move {
      if let Some(reason) = ctx.err() {
        tracing::debug!(%reason, "dial context finished before spawn");
        return Err(reason);
      }

      let mut command = Command::new(&program);
      command
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
      let mut child = command.spawn().map_err(|source| DialError::Spawn {
        program: program.clone(),
        source,
      })?;
      let pid = child.id();
      tracing::debug!(?pid, ?args, "spawned");
      after_spawn(pid);

      if let Some(reason) = ctx.err() {
        tracing::debug!(?pid, %reason, "dial context finished during spawn; killing");
        // `kill` also reaps, so no zombie outlives the failed dial
        if let Err(e) = child.kill().await {
          tracing::warn!(?pid, error = ?e, "failed to kill abandoned process");
        }
        return Err(reason);
      }

      let stdin = child.stdin.take().ok_or_else(|| {
        io::Error::new(
          io::ErrorKind::BrokenPipe,
          "child process did not expose a writable stdin",
        )
      })?;
      let stdout = child.stdout.take().ok_or_else(|| {
        io::Error::new(
          io::ErrorKind::BrokenPipe,
          "child process did not expose a readable stdout",
        )
      })?;
      let stderr = child.stderr.take();

      let mut command_line = program;
      for arg in &args {
        command_line.push(' ');
        command_line.push_str(arg);
      }
      Ok(CommandStream::new(
        command_line,
        child,
        stdin,
        stdout,
        stderr,
        StderrTail::new(stderr_limit),
        grace_period,
      ))
    }
    .instrument(span)
    .boxed()
  }
}

impl Default for CommandSpawner {
  fn default() -> Self {
    Self::new()
  }
}

impl ProcessSpawner for CommandSpawner {
  fn spawn(
    &self,
    ctx: DialContext,
    program: &str,
    args: &[String],
  ) -> BoxFuture<'static, Result<BoxedConnStream, DialError>> {
    self
      .spawn_command(ctx, program, args)
      .map(|res| res.map(|stream| Box::new(stream) as BoxedConnStream))
      .boxed()
  }
}
