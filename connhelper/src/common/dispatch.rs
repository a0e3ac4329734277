// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Resolution of daemon URLs into [ConnectionHelper]s

use std::sync::Arc;

use url::Url;

use super::{
  errors::ResolveError,
  helper::ConnectionHelper,
  process::{CommandSpawner, ProcessSpawner},
  registry::{self, SchemeRegistry},
  ssh::SshTransport,
};

/// The scheme handled by the built-in ssh transport ahead of any registry entry
pub const SSH_SCHEME: &str = "ssh";

/// Maps daemon URLs onto connection helpers
///
/// `ssh` URLs are always served by [SshTransport]; every other scheme is
/// looked up in the registry the dispatcher was built with.
#[derive(Clone)]
pub struct Dispatcher {
  registry: Arc<SchemeRegistry>,
  spawner: Arc<dyn ProcessSpawner>,
}

impl Dispatcher {
  pub fn new(registry: Arc<SchemeRegistry>) -> Self {
    Self {
      registry,
      spawner: Arc::new(CommandSpawner::new()),
    }
  }

  /// A dispatcher over the process-wide registry as it stands right now
  pub fn global() -> Self {
    Self::new(registry::snapshot())
  }

  /// Replaces the spawner used by dialers of `ssh` helpers
  pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
    self.spawner = spawner;
    self
  }

  pub fn registry(&self) -> &SchemeRegistry {
    &self.registry
  }

  /// Builds the connection helper for `daemon_url`, if one applies
  ///
  /// `Ok(None)` means no helper exists for the scheme, and the caller should
  /// fall back to its default transport. Factory errors are returned as-is.
  #[tracing::instrument(level = "debug", skip(self, ssh_flags), err)]
  pub fn resolve(
    &self,
    daemon_url: &str,
    ssh_flags: &[String],
  ) -> Result<Option<ConnectionHelper>, ResolveError> {
    let url = Url::parse(daemon_url)?;
    if url.scheme() == SSH_SCHEME {
      let helper = SshTransport::with_spawner(ssh_flags.iter().cloned(), self.spawner.clone())
        .connection_helper(&url)?;
      return Ok(Some(helper));
    }
    match self.registry.lookup(url.scheme()) {
      None => {
        tracing::trace!(scheme = url.scheme(), "no transport registered");
        Ok(None)
      }
      Some(factory) => factory
        .connection_helper(&url)
        .map(Some)
        .map_err(ResolveError::Factory),
    }
  }
}

impl Default for Dispatcher {
  fn default() -> Self {
    Self::global()
  }
}

impl std::fmt::Debug for Dispatcher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Dispatcher")
      .field("registry", &self.registry)
      .finish_non_exhaustive()
  }
}

/// Returns the connection helper for `daemon_url` from the process-wide registry
pub fn get_connection_helper(daemon_url: &str) -> Result<Option<ConnectionHelper>, ResolveError> {
  get_connection_helper_with_ssh_opts(daemon_url, &[])
}

/// Like [get_connection_helper], passing `ssh_flags` to every `ssh` invocation
pub fn get_connection_helper_with_ssh_opts(
  daemon_url: &str,
  ssh_flags: &[String],
) -> Result<Option<ConnectionHelper>, ResolveError> {
  Dispatcher::global().resolve(daemon_url, ssh_flags)
}
