// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Connection helpers that reach a remote daemon through a local `ssh` subprocess

use std::sync::Arc;

use futures::future::FutureExt;
use serde::{Deserialize, Serialize};
use tracing_futures::Instrument;
use url::Url;

use super::{
  errors::SpecError,
  helper::ConnectionHelper,
  process::{CommandSpawner, ProcessSpawner},
};
use crate::util::cancellation::DialContext;

pub mod spec;

pub use spec::SshSpec;

/// The local program used to reach remote hosts
pub const SSH_PROGRAM: &str = "ssh";

/// Run on the remote host to relay the daemon's API over stdio
///
/// The remote binary must accept these exact tokens non-interactively.
pub const BOOTSTRAP_COMMAND: [&str; 3] = ["docker", "system", "dial-stdio"];

/// Placeholder host handed to transport layers; never resolved
pub const NOMINAL_HOST: &str = "http://docker.example.com";

/// Everything needed to start the ssh subprocess for a given daemon URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub nominal_host: String,
  pub target: SshSpec,
}

/// Builds [ConnectionHelper]s for `ssh://` daemon URLs
#[derive(Clone)]
pub struct SshTransport {
  flags: Arc<[String]>,
  spawner: Arc<dyn ProcessSpawner>,
}

impl SshTransport {
  /// An ssh transport passing `flags` to every `ssh` invocation, in order
  pub fn new<I, S>(flags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::with_spawner(flags, Arc::new(CommandSpawner::new()))
  }

  pub fn with_spawner<I, S>(flags: I, spawner: Arc<dyn ProcessSpawner>) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      flags: flags.into_iter().map(Into::<String>::into).collect(),
      spawner,
    }
  }

  /// Composes the ssh command line for `daemon_url` without running it
  pub fn invocation(&self, daemon_url: &Url) -> Result<Invocation, SpecError> {
    let target = SshSpec::from_url(daemon_url)?;
    let mut args = self.flags.to_vec();
    args.extend(target.args(BOOTSTRAP_COMMAND));
    Ok(Invocation {
      program: SSH_PROGRAM.to_owned(),
      args,
      nominal_host: NOMINAL_HOST.to_owned(),
      target,
    })
  }

  /// Builds a helper whose every dial spawns a fresh `ssh` subprocess
  ///
  /// Nothing is spawned here; the URL is only validated.
  pub fn connection_helper(&self, daemon_url: &Url) -> Result<ConnectionHelper, SpecError> {
    let Invocation {
      program,
      args,
      nominal_host,
      target,
    } = self.invocation(daemon_url)?;
    let args: Arc<[String]> = args.into();
    let spawner = self.spawner.clone();
    tracing::debug!(host = %target.host, port = ?target.port, "built ssh connection helper");
    Ok(ConnectionHelper::new(
      nominal_host,
      move |ctx: DialContext, _addr: &str| {
        let span = tracing::debug_span!(
          "ssh_dial",
          dial_id = %uuid::Uuid::new_v4(),
          host = %target.host,
        );
        spawner
          .spawn(ctx, &program, &args)
          .instrument(span)
          .boxed()
      },
    ))
  }
}

impl std::fmt::Debug for SshTransport {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SshTransport")
      .field("flags", &self.flags)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use futures::{future::BoxFuture, FutureExt};
  use url::Url;

  use super::{SshTransport, BOOTSTRAP_COMMAND, NOMINAL_HOST};
  use crate::{
    common::{errors::DialError, process::ProcessSpawner},
    util::{cancellation::DialContext, conn_stream::BoxedConnStream},
  };

  mockall::mock! {
    pub Spawner {}

    impl ProcessSpawner for Spawner {
      fn spawn(
        &self,
        ctx: DialContext,
        program: &str,
        args: &[String],
      ) -> BoxFuture<'static, Result<BoxedConnStream, DialError>>;
    }
  }

  fn duplex_stream() -> BoxFuture<'static, Result<BoxedConnStream, DialError>> {
    futures::future::ready(Ok(Box::new(tokio::io::duplex(64).0) as BoxedConnStream)).boxed()
  }

  #[tokio::test]
  async fn dial_composes_flags_target_and_bootstrap_in_order() {
    let mut spawner = MockSpawner::new();
    spawner
      .expect_spawn()
      .withf(|_ctx, program, args| {
        program == "ssh"
          && args
            == [
              "-F",
              "/dev/null",
              "-l",
              "user",
              "-p",
              "2222",
              "--",
              "host",
              "docker",
              "system",
              "dial-stdio",
            ]
      })
      .times(1)
      .returning(|_, _, _| duplex_stream());

    let transport = SshTransport::with_spawner(["-F", "/dev/null"], Arc::new(spawner));
    let url = Url::parse("ssh://user@host:2222/").unwrap();
    let helper = transport.connection_helper(&url).unwrap();
    assert_eq!(helper.nominal_host(), NOMINAL_HOST);
    helper
      .dial(DialContext::background(), "docker.example.com:80")
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn construction_spawns_nothing_and_each_dial_spawns_once() {
    let mut spawner = MockSpawner::new();
    spawner
      .expect_spawn()
      .times(3)
      .returning(|_, _, _| duplex_stream());
    let transport = SshTransport::with_spawner(Vec::<String>::new(), Arc::new(spawner));
    let helper = transport
      .connection_helper(&Url::parse("ssh://alice@build.internal/").unwrap())
      .unwrap();
    for _ in 0..3 {
      helper.dial(DialContext::background(), "").await.unwrap();
    }
  }

  #[tokio::test]
  async fn failed_dial_leaves_helper_usable() {
    let attempts = Arc::new(Mutex::new(0usize));
    let mut spawner = MockSpawner::new();
    spawner.expect_spawn().times(2).returning({
      let attempts = attempts.clone();
      move |_, _, _| {
        let mut attempts = attempts.lock().unwrap();
        *attempts += 1;
        if *attempts == 1 {
          futures::future::ready(Err(DialError::Io(std::io::ErrorKind::BrokenPipe.into()))).boxed()
        } else {
          duplex_stream()
        }
      }
    });
    let transport = SshTransport::with_spawner(Vec::<String>::new(), Arc::new(spawner));
    let helper = transport
      .connection_helper(&Url::parse("ssh://host").unwrap())
      .unwrap();
    assert!(helper.dial(DialContext::background(), "").await.is_err());
    assert!(helper.dial(DialContext::background(), "").await.is_ok());
  }

  #[test]
  fn invocation_matches_documented_example() {
    let transport = SshTransport::new(Vec::<String>::new());
    let invocation = transport
      .invocation(&Url::parse("ssh://alice@build.internal/").unwrap())
      .unwrap();
    assert_eq!(invocation.program, "ssh");
    let mut expected = vec!["-l", "alice", "--", "build.internal"];
    expected.extend(BOOTSTRAP_COMMAND);
    assert_eq!(invocation.args, expected);
  }

  #[test]
  fn invalid_target_is_rejected_at_construction() {
    let transport = SshTransport::new(Vec::<String>::new());
    let err = transport
      .connection_helper(&Url::parse("ssh:///").unwrap())
      .unwrap_err();
    assert_eq!(err.url(), "ssh:///");
  }
}
