// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
//! Scheme-dispatched connection helpers for reaching remote daemons
//!
//! A daemon URL such as `ssh://user@host:2222/` is resolved into a
//! [ConnectionHelper](common::helper::ConnectionHelper): a reusable dialer
//! paired with a placeholder host for the transport layer above it. `ssh` is
//! served by a built-in transport which runs the local `ssh` client and uses
//! its stdio as the connection; other schemes can be provided by registering a
//! [TransportFactory](common::registry::TransportFactory).

pub mod common;
pub mod util;

pub use common::{
  dispatch::{get_connection_helper, get_connection_helper_with_ssh_opts, Dispatcher},
  errors::{DialError, FactoryError, ResolveError, SpecError},
  helper::ConnectionHelper,
  registry::{register, SchemeRegistry, TransportFactory},
};
pub use util::{
  cancellation::DialContext,
  conn_stream::{BoxedConnStream, ConnStream},
};
