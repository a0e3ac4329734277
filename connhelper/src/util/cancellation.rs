// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::common::errors::DialError;

/// A [CancellationToken] that cannot be triggered by its recipient
///
/// Child tokens can be produced from it, allowing sub-cancellation,
/// but the interface does not expose a way to cancel the inner token.
#[derive(Debug, Clone, Default)]
#[repr(transparent)]
pub struct CancellationListener {
  token: CancellationToken,
}

impl CancellationListener {
  pub fn child_token(&self) -> CancellationToken {
    self.token.child_token()
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
    self.token.cancelled()
  }
}

impl From<CancellationToken> for CancellationListener {
  fn from(token: CancellationToken) -> Self {
    Self { token }
  }
}

/// Governs the lifetime of a single dial attempt
///
/// A dial is abandoned when either its listener is cancelled by the owner of
/// the underlying token, or its deadline (if any) passes. Once a stream has
/// been handed back, the context no longer has any effect on it.
#[derive(Debug, Clone, Default)]
pub struct DialContext {
  listener: CancellationListener,
  deadline: Option<Instant>,
}

impl DialContext {
  /// A context which is never cancelled and has no deadline
  pub fn background() -> Self {
    Self::default()
  }

  pub fn new<L: Into<CancellationListener>>(listener: L) -> Self {
    Self {
      listener: listener.into(),
      deadline: None,
    }
  }

  /// Adds a deadline, keeping the earlier of the existing and new deadlines
  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(match self.deadline {
      Some(existing) if existing < deadline => existing,
      _ => deadline,
    });
    self
  }

  pub fn with_timeout(self, timeout: Duration) -> Self {
    self.with_deadline(Instant::now() + timeout)
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  pub fn listener(&self) -> &CancellationListener {
    &self.listener
  }

  /// Reports why the context is finished, or `None` while it is still live
  ///
  /// Cancellation takes precedence over an expired deadline.
  pub fn err(&self) -> Option<DialError> {
    if self.listener.is_cancelled() {
      Some(DialError::Cancelled)
    } else if matches!(self.deadline, Some(deadline) if deadline <= Instant::now()) {
      Some(DialError::DeadlineExceeded)
    } else {
      None
    }
  }

  /// Resolves once the context is cancelled or its deadline passes
  pub async fn done(&self) -> DialError {
    match self.deadline {
      Some(deadline) => tokio::select! {
        biased;
        _ = self.listener.cancelled() => DialError::Cancelled,
        _ = tokio::time::sleep_until(deadline) => DialError::DeadlineExceeded,
      },
      None => {
        self.listener.cancelled().await;
        DialError::Cancelled
      }
    }
  }
}

impl From<CancellationToken> for DialContext {
  fn from(token: CancellationToken) -> Self {
    Self::new(token)
  }
}

impl From<CancellationListener> for DialContext {
  fn from(listener: CancellationListener) -> Self {
    Self::new(listener)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use tokio::time::Instant;
  use tokio_util::sync::CancellationToken;

  use super::DialContext;
  use crate::common::errors::DialError;

  #[test]
  fn background_is_live() {
    assert!(DialContext::background().err().is_none());
  }

  #[test]
  fn cancellation_is_observed() {
    let token = CancellationToken::new();
    let ctx = DialContext::new(token.clone());
    assert!(ctx.err().is_none());
    token.cancel();
    assert!(matches!(ctx.err(), Some(DialError::Cancelled)));
  }

  #[tokio::test]
  async fn earlier_deadline_wins() {
    let now = Instant::now();
    let ctx = DialContext::background()
      .with_deadline(now + Duration::from_secs(1))
      .with_deadline(now + Duration::from_secs(60));
    assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
  }

  #[tokio::test]
  async fn expired_deadline_reports_exceeded() {
    let ctx = DialContext::background().with_deadline(Instant::now());
    assert!(matches!(ctx.err(), Some(DialError::DeadlineExceeded)));
    let reason = tokio::time::timeout(Duration::from_secs(5), ctx.done())
      .await
      .expect("an expired deadline must resolve immediately");
    assert!(matches!(reason, DialError::DeadlineExceeded));
  }

  #[tokio::test]
  async fn done_resolves_on_cancel() {
    let token = CancellationToken::new();
    let ctx = DialContext::new(token.clone()).with_timeout(Duration::from_secs(60));
    let trigger = tokio::task::spawn(async move { token.cancel() });
    let reason = tokio::time::timeout(Duration::from_secs(5), ctx.done())
      .await
      .expect("cancellation must wake the waiter");
    trigger.await.unwrap();
    assert!(matches!(reason, DialError::Cancelled));
  }
}
