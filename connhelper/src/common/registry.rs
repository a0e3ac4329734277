// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Scheme-keyed table of transport factories
//!
//! The process-wide table is published as immutable snapshots. Registration is
//! expected to happen during initialization, before any dispatch; a dispatch
//! sees the snapshot current when it started, so a registration racing it may
//! or may not be observed.

use std::{
  collections::HashMap,
  sync::{Arc, OnceLock},
};

use arc_swap::ArcSwap;
use url::Url;

use super::{errors::FactoryError, helper::ConnectionHelper};

/// Builds a [ConnectionHelper] for URLs of the scheme it is registered under
pub trait TransportFactory: Send + Sync {
  fn connection_helper(&self, daemon_url: &Url) -> Result<ConnectionHelper, FactoryError>;
}

impl<F> TransportFactory for F
where
  F: Fn(&Url) -> Result<ConnectionHelper, FactoryError> + Send + Sync,
{
  fn connection_helper(&self, daemon_url: &Url) -> Result<ConnectionHelper, FactoryError> {
    self(daemon_url)
  }
}

#[derive(Clone, Default)]
pub struct SchemeRegistry {
  factories: HashMap<String, Arc<dyn TransportFactory>>,
}

impl SchemeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Stores `factory` under `scheme`, replacing and returning any previous entry
  ///
  /// The scheme is not validated or normalized.
  pub fn insert<S, F>(&mut self, scheme: S, factory: F) -> Option<Arc<dyn TransportFactory>>
  where
    S: Into<String>,
    F: TransportFactory + 'static,
  {
    self.insert_arc(scheme, Arc::new(factory))
  }

  pub fn insert_arc<S: Into<String>>(
    &mut self,
    scheme: S,
    factory: Arc<dyn TransportFactory>,
  ) -> Option<Arc<dyn TransportFactory>> {
    self.factories.insert(scheme.into(), factory)
  }

  /// Builder-style [Self::insert]
  pub fn with<S, F>(mut self, scheme: S, factory: F) -> Self
  where
    S: Into<String>,
    F: TransportFactory + 'static,
  {
    self.insert(scheme, factory);
    self
  }

  pub fn lookup(&self, scheme: &str) -> Option<Arc<dyn TransportFactory>> {
    self.factories.get(scheme).cloned()
  }

  pub fn contains(&self, scheme: &str) -> bool {
    self.factories.contains_key(scheme)
  }

  /// Registered schemes in sorted order
  pub fn schemes(&self) -> Vec<String> {
    let mut schemes: Vec<String> = self.factories.keys().cloned().collect();
    schemes.sort_unstable();
    schemes
  }

  pub fn len(&self) -> usize {
    self.factories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.factories.is_empty()
  }
}

impl std::fmt::Debug for SchemeRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SchemeRegistry")
      .field("schemes", &self.schemes())
      .finish()
  }
}

fn global() -> &'static ArcSwap<SchemeRegistry> {
  static GLOBAL: OnceLock<ArcSwap<SchemeRegistry>> = OnceLock::new();
  GLOBAL.get_or_init(|| ArcSwap::from_pointee(SchemeRegistry::new()))
}

/// Registers `factory` for `scheme` in the process-wide registry; last writer wins
pub fn register<S, F>(scheme: S, factory: F)
where
  S: Into<String>,
  F: TransportFactory + 'static,
{
  let scheme = scheme.into();
  let factory: Arc<dyn TransportFactory> = Arc::new(factory);
  global().rcu(|current| {
    let mut next = SchemeRegistry::clone(current);
    next.insert_arc(scheme.clone(), factory.clone());
    next
  });
  tracing::debug!(%scheme, "registered transport factory");
}

/// Looks up `scheme` in the process-wide registry
pub fn lookup(scheme: &str) -> Option<Arc<dyn TransportFactory>> {
  global().load().lookup(scheme)
}

/// The current process-wide registry contents
pub fn snapshot() -> Arc<SchemeRegistry> {
  global().load_full()
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use futures::FutureExt;
  use url::Url;

  use super::{SchemeRegistry, TransportFactory};
  use crate::{
    common::{errors::FactoryError, helper::ConnectionHelper},
    util::cancellation::DialContext,
  };

  fn named(
    host: &'static str,
  ) -> impl Fn(&Url) -> Result<ConnectionHelper, FactoryError> + Send + Sync + 'static {
    move |_url: &Url| {
      Ok(ConnectionHelper::new(host, |_ctx: DialContext, _addr: &str| {
        futures::future::pending().boxed()
      }))
    }
  }

  fn host_of(factory: &Arc<dyn TransportFactory>, url: &str) -> String {
    factory
      .connection_helper(&Url::parse(url).unwrap())
      .unwrap()
      .nominal_host()
      .to_owned()
  }

  #[test]
  fn later_registration_wins() {
    let mut registry = SchemeRegistry::new();
    assert!(registry.insert("foo", named("http://first")).is_none());
    assert!(registry.insert("foo", named("http://second")).is_some());
    assert_eq!(registry.len(), 1);
    let factory = registry.lookup("foo").unwrap();
    assert_eq!(host_of(&factory, "foo://anything"), "http://second");
  }

  #[test]
  fn lookup_is_exact() {
    let registry = SchemeRegistry::new().with("npipe", named("http://pipe"));
    assert!(registry.lookup("npipe").is_some());
    assert!(registry.lookup("NPIPE").is_none());
    assert!(registry.lookup("npipe2").is_none());
    assert!(SchemeRegistry::new().is_empty());
  }

  #[test]
  fn schemes_are_sorted() {
    let registry = SchemeRegistry::new()
      .with("zeta", named("http://z"))
      .with("alpha", named("http://a"))
      .with("mid", named("http://m"));
    assert_eq!(registry.schemes(), ["alpha", "mid", "zeta"]);
  }

  #[test]
  fn global_registration_is_visible_to_later_snapshots() {
    let before = super::snapshot();
    super::register("registry-test-global", named("http://global"));
    assert!(!before.contains("registry-test-global"));
    assert!(super::snapshot().contains("registry-test-global"));
    let factory = super::lookup("registry-test-global").unwrap();
    assert_eq!(host_of(&factory, "registry-test-global://x"), "http://global");
  }
}
