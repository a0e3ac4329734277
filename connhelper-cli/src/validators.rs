// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use anyhow::{Error as AnyErr, Result};
use std::time::Duration;
use url::Url;

pub fn parse_daemon_url(v: &str) -> Result<Url> {
  Url::parse(v).map_err(|e| AnyErr::new(e).context(format!("{:?} is not a daemon URL", v)))
}

/// Seconds, optionally fractional; must be positive and finite
pub fn parse_timeout(v: &str) -> Result<Duration> {
  let secs = v
    .parse::<f64>()
    .map_err(|_| AnyErr::msg("Timeout must be a number of seconds"))?;
  if !secs.is_finite() || secs <= 0.0 {
    return Err(AnyErr::msg("Timeout must be a positive number of seconds"));
  }
  Duration::try_from_secs_f64(secs).map_err(|e| AnyErr::new(e).context("Timeout is out of range"))
}

pub fn validate_daemon_url(v: &str) -> Result<(), String> {
  parse_daemon_url(v).map(|_| ()).map_err(|e| format!("{:#}", e))
}

pub fn validate_timeout(v: &str) -> Result<(), String> {
  parse_timeout(v).map(|_| ()).map_err(|e| format!("{:#}", e))
}
