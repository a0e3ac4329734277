// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::common::errors::DialError;

/// A duplex byte stream produced by a dialer
///
/// Abstracts over sockets, in-memory pipes, and subprocess stdio so that
/// transport consumers need not know how a connection was established.
pub trait ConnStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
  /// Releases the stream and everything backing it
  ///
  /// The default implementation shuts down the write half and drops the stream.
  fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), DialError>> {
    async move {
      let mut stream = self;
      stream.shutdown().await.map_err(DialError::from)
    }
    .boxed()
  }
}

pub type BoxedConnStream = Box<dyn ConnStream>;

impl ConnStream for Box<dyn ConnStream> {
  fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), DialError>> {
    ConnStream::close(*self)
  }
}

impl ConnStream for tokio::io::DuplexStream {}
impl ConnStream for tokio::net::TcpStream {}
#[cfg(unix)]
impl ConnStream for tokio::net::UnixStream {}
