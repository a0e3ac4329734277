// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

use anyhow::{Context as AnyhowContext, Error as AnyErr, Result};
use connhelper::{
  get_connection_helper_with_ssh_opts, BoxedConnStream, ConnStream, DialContext, DialError,
};
use std::{future::Future, time::Duration};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Eq, PartialEq, Clone, Debug)]
pub struct DialArgs {
  pub daemon_url: Url,
  pub ssh_flags: Vec<String>,
  pub timeout: Option<Duration>,
}

/// Connects to the daemon and relays this process's stdin/stdout over the connection
pub async fn dial_main(config: DialArgs, shutdown: CancellationToken) -> Result<()> {
  let mut ctx = DialContext::new(shutdown.child_token());
  if let Some(timeout) = config.timeout {
    ctx = ctx.with_timeout(timeout);
  }
  let stream = connect(&config, ctx).await?;
  relay(stream, shutdown).await
}

#[tracing::instrument(level = "debug", skip_all, fields(url = %config.daemon_url))]
async fn connect(config: &DialArgs, ctx: DialContext) -> Result<BoxedConnStream> {
  let helper = get_connection_helper_with_ssh_opts(config.daemon_url.as_str(), &config.ssh_flags)?;
  match helper {
    Some(helper) => {
      tracing::debug!(nominal_host = helper.nominal_host(), "dialing through connection helper");
      helper
        .dial(ctx, helper.nominal_host())
        .await
        .context("Connection helper failed to dial")
    }
    None => connect_fallback(&config.daemon_url, ctx).await,
  }
}

/// Plain socket transports for schemes without a connection helper
async fn connect_fallback(url: &Url, ctx: DialContext) -> Result<BoxedConnStream> {
  match url.scheme() {
    "tcp" => {
      let host = url
        .host_str()
        .ok_or_else(|| AnyErr::msg("tcp URL must specify a host"))?
        .to_owned();
      let port = url
        .port()
        .ok_or_else(|| AnyErr::msg("tcp URL must specify a port"))?;
      tracing::debug!(%host, port, "no connection helper; connecting over tcp");
      let stream = within(&ctx, tokio::net::TcpStream::connect((host.as_str(), port)))
        .await
        .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
      Ok(Box::new(stream))
    }
    #[cfg(unix)]
    "unix" => {
      let path = url.path();
      tracing::debug!(%path, "no connection helper; connecting over unix socket");
      let stream = within(&ctx, tokio::net::UnixStream::connect(path))
        .await
        .with_context(|| format!("Failed to connect to {}", path))?;
      Ok(Box::new(stream))
    }
    scheme => Err(AnyErr::msg(format!(
      "No connection helper or socket transport for scheme {:?}",
      scheme
    ))),
  }
}

async fn within<T>(
  ctx: &DialContext,
  connect: impl Future<Output = std::io::Result<T>>,
) -> Result<T, DialError> {
  if let Some(reason) = ctx.err() {
    return Err(reason);
  }
  tokio::select! {
    biased;
    reason = ctx.done() => Err(reason),
    res = connect => res.map_err(DialError::from),
  }
}

/// Copies stdin to the stream and the stream to stdout until the remote side finishes
///
/// The stream is closed afterwards in every case, so a helper's subprocess is
/// always reaped before this returns.
async fn relay(stream: BoxedConnStream, shutdown: CancellationToken) -> Result<()> {
  let (mut reader, mut writer) = tokio::io::split(stream);
  let relayed = copy_both_ways(&mut reader, &mut writer, &shutdown).await;
  let closed = reader.unsplit(writer).close().await;
  relayed.context("Relay failed")?;
  closed.context("Connection did not close cleanly")?;
  Ok(())
}

async fn copy_both_ways(
  reader: &mut ReadHalf<BoxedConnStream>,
  writer: &mut WriteHalf<BoxedConnStream>,
  shutdown: &CancellationToken,
) -> std::io::Result<()> {
  let upload = async {
    let mut stdin = tokio::io::stdin();
    let sent = tokio::io::copy(&mut stdin, &mut *writer).await?;
    tracing::trace!(sent, "stdin closed; half-closing connection");
    writer.shutdown().await
  };
  let download = async {
    let mut stdout = tokio::io::stdout();
    let received = tokio::io::copy(&mut *reader, &mut stdout).await?;
    tracing::trace!(received, "connection closed by remote");
    stdout.flush().await
  };
  tokio::pin!(upload);
  tokio::pin!(download);
  tokio::select! {
    _ = shutdown.cancelled() => {
      tracing::info!("Interrupted; closing connection");
      Ok(())
    }
    // Stdin can outlive the remote; once the remote is done, so is the relay
    res = &mut download => res,
    res = &mut upload => {
      res?;
      tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        res = &mut download => res,
      }
    }
  }
}
