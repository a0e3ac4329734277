// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::process::ExitStatus;

/// Errors produced by third-party transport factories and dialers
pub type FactoryError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to turn a daemon address into a connection helper
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
  /// The daemon address was not a URL
  #[error(transparent)]
  Url(#[from] url::ParseError),
  #[error("ssh host connection is not valid: {0}")]
  InvalidSshHost(
    #[from]
    #[source]
    SpecError,
  ),
  /// A registered factory refused the URL; forwarded as-is
  #[error(transparent)]
  Factory(FactoryError),
}

impl ResolveError {
  /// Returns `true` if the daemon address failed to parse as a URL
  #[must_use]
  pub fn is_malformed_url(&self) -> bool {
    matches!(self, Self::Url(_))
  }

  /// Returns `true` if the address named an unusable ssh target
  #[must_use]
  pub fn is_invalid_ssh_host(&self) -> bool {
    matches!(self, Self::InvalidSshHost(_))
  }
}

/// Rejection of an `ssh://` URL by the ssh target resolver
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
  #[error("invalid ssh URL {url:?}: {source}")]
  Url {
    url: String,
    #[source]
    source: url::ParseError,
  },
  #[error("expected an ssh URL, got scheme {scheme:?} in {url:?}")]
  NotSsh { url: String, scheme: String },
  #[error("no host specified in {url:?}")]
  MissingHost { url: String },
  #[error("plain-text password is not supported in {url:?}")]
  PasswordNotSupported { url: String },
  #[error("invalid user {user:?} in {url:?}")]
  InvalidUser { url: String, user: String },
  #[error("invalid host {host:?} in {url:?}")]
  InvalidHost { url: String, host: String },
  #[error("extra path after the host: {path:?} in {url:?}")]
  ExtraPath { url: String, path: String },
  #[error("extra query after the host: {query:?} in {url:?}")]
  ExtraQuery { url: String, query: String },
  #[error("extra fragment after the host: {fragment:?} in {url:?}")]
  ExtraFragment { url: String, fragment: String },
}

impl SpecError {
  /// The URL text that was rejected
  pub fn url(&self) -> &str {
    match self {
      Self::Url { url, .. }
      | Self::NotSsh { url, .. }
      | Self::MissingHost { url }
      | Self::PasswordNotSupported { url }
      | Self::InvalidUser { url, .. }
      | Self::InvalidHost { url, .. }
      | Self::ExtraPath { url, .. }
      | Self::ExtraQuery { url, .. }
      | Self::ExtraFragment { url, .. } => url,
    }
  }
}

/// Failure of a single dial attempt
///
/// These never invalidate the [ConnectionHelper](crate::common::helper::ConnectionHelper)
/// that produced them; a later dial may succeed.
#[derive(thiserror::Error, Debug)]
pub enum DialError {
  #[error("dial cancelled")]
  Cancelled,
  #[error("dial deadline exceeded")]
  DeadlineExceeded,
  #[error("failed to spawn {program:?}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },
  #[error(
    "command {command:?} exited with {status}; make sure the URL is valid and the remote host \
     can run the bootstrap command; stderr: {stderr:?}"
  )]
  ProcessExited {
    command: String,
    status: ExitStatus,
    stderr: String,
  },
  #[error("stream error: {0}")]
  Io(
    #[from]
    #[source]
    std::io::Error,
  ),
  #[error(transparent)]
  Transport(FactoryError),
}

impl DialError {
  /// Returns `true` if the dial was abandoned due to its context
  #[must_use]
  pub fn is_cancellation(&self) -> bool {
    matches!(self, Self::Cancelled | Self::DeadlineExceeded)
  }
}
