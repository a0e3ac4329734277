// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

use anyhow::Result;
use connhelper::{
  common::{
    dispatch::SSH_SCHEME,
    ssh::{Invocation, SshTransport},
  },
  Dispatcher,
};
use serde::Serialize;
use url::Url;

#[derive(Eq, PartialEq, Clone, Debug)]
pub struct DescribeArgs {
  pub daemon_url: Url,
  pub ssh_flags: Vec<String>,
}

/// How a daemon URL would be reached, without connecting
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Description {
  Ssh {
    #[serde(flatten)]
    invocation: Invocation,
  },
  Registered {
    scheme: String,
    nominal_host: String,
  },
  Unregistered {
    scheme: String,
    registered_schemes: Vec<String>,
  },
}

pub fn describe(config: &DescribeArgs, dispatcher: &Dispatcher) -> Result<Description> {
  let scheme = config.daemon_url.scheme();
  if scheme == SSH_SCHEME {
    let invocation = SshTransport::new(config.ssh_flags.iter().cloned())
      .invocation(&config.daemon_url)
      .map_err(connhelper::ResolveError::from)?;
    return Ok(Description::Ssh { invocation });
  }
  Ok(
    match dispatcher.resolve(config.daemon_url.as_str(), &config.ssh_flags)? {
      Some(helper) => Description::Registered {
        scheme: scheme.to_owned(),
        nominal_host: helper.nominal_host().to_owned(),
      },
      None => Description::Unregistered {
        scheme: scheme.to_owned(),
        registered_schemes: dispatcher.registry().schemes(),
      },
    },
  )
}

pub async fn describe_main(config: DescribeArgs) -> Result<()> {
  let description = describe(&config, &Dispatcher::global())?;
  println!("{}", serde_json::to_string_pretty(&description)?);
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use connhelper::{ConnectionHelper, DialContext, Dispatcher, FactoryError, SchemeRegistry};
  use futures::FutureExt;
  use url::Url;

  use super::{describe, DescribeArgs};

  fn args(url: &str, flags: &[&str]) -> DescribeArgs {
    DescribeArgs {
      daemon_url: Url::parse(url).unwrap(),
      ssh_flags: flags.iter().map(|f| f.to_string()).collect(),
    }
  }

  #[test]
  fn ssh_describes_the_invocation() {
    let dispatcher = Dispatcher::new(Arc::new(SchemeRegistry::new()));
    let description = describe(
      &args("ssh://alice@build.internal:2222/", &["-v"]),
      &dispatcher,
    )
    .unwrap();
    assert_eq!(
      serde_json::to_value(&description).unwrap(),
      serde_json::json!({
        "transport": "ssh",
        "program": "ssh",
        "args": ["-v", "-l", "alice", "-p", "2222", "--", "build.internal", "docker", "system", "dial-stdio"],
        "nominal_host": "http://docker.example.com",
        "target": { "user": "alice", "host": "build.internal", "port": 2222 },
      })
    );
  }

  #[test]
  fn other_schemes_report_registration() {
    let registry = SchemeRegistry::new().with(
      "npipe",
      |_url: &Url| -> Result<ConnectionHelper, FactoryError> {
        Ok(ConnectionHelper::new(
          "http://pipe.invalid",
          |_ctx: DialContext, _addr: &str| futures::future::pending().boxed(),
        ))
      },
    );
    let dispatcher = Dispatcher::new(Arc::new(registry));
    let registered = describe(&args("npipe://./pipe/engine", &[]), &dispatcher).unwrap();
    assert_eq!(
      serde_json::to_value(&registered).unwrap(),
      serde_json::json!({
        "transport": "registered",
        "scheme": "npipe",
        "nominal_host": "http://pipe.invalid",
      })
    );
    let unregistered = describe(&args("tcp://localhost:2375", &[]), &dispatcher).unwrap();
    assert_eq!(
      serde_json::to_value(&unregistered).unwrap(),
      serde_json::json!({
        "transport": "unregistered",
        "scheme": "tcp",
        "registered_schemes": ["npipe"],
      })
    );
  }

  #[test]
  fn invalid_ssh_target_is_an_error() {
    let dispatcher = Dispatcher::new(Arc::new(SchemeRegistry::new()));
    let err = describe(&args("ssh://host/path", &[]), &dispatcher).unwrap_err();
    assert!(err.to_string().starts_with("ssh host connection is not valid"));
  }
}
