// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::sync::Arc;

use futures::future::BoxFuture;

use super::errors::DialError;
use crate::util::{cancellation::DialContext, conn_stream::BoxedConnStream};

/// Opens a fresh stream for each call; the address argument may be ignored
pub type Dialer = Arc<
  dyn Fn(DialContext, &str) -> BoxFuture<'static, Result<BoxedConnStream, DialError>>
    + Send
    + Sync,
>;

/// A custom dialer paired with the placeholder host a transport layer should target
///
/// Cloning is cheap, and a single helper may serve any number of dials; each
/// dial owns the stream it returns.
#[derive(Clone)]
pub struct ConnectionHelper {
  dialer: Dialer,
  host: Arc<str>,
}

impl ConnectionHelper {
  pub fn new<F, H>(host: H, dialer: F) -> Self
  where
    F: Fn(DialContext, &str) -> BoxFuture<'static, Result<BoxedConnStream, DialError>>
      + Send
      + Sync
      + 'static,
    H: Into<Arc<str>>,
  {
    Self {
      dialer: Arc::new(dialer),
      host: host.into(),
    }
  }

  /// Opens a new stream to the daemon behind this helper
  pub fn dial(
    &self,
    ctx: DialContext,
    addr: &str,
  ) -> BoxFuture<'static, Result<BoxedConnStream, DialError>> {
    (self.dialer)(ctx, addr)
  }

  /// The synthetic address to hand to the transport layer
  ///
  /// This is never resolved; connections are always made through [Self::dial].
  pub fn nominal_host(&self) -> &str {
    &self.host
  }
}

impl std::fmt::Debug for ConnectionHelper {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectionHelper")
      .field("host", &self.host)
      .finish_non_exhaustive()
  }
}
