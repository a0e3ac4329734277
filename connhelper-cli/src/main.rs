// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
#![warn(unused_imports)]

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use tokio_util::sync::CancellationToken;

use validators::{parse_daemon_url, parse_timeout, validate_daemon_url, validate_timeout};

mod describe;
mod dial;
mod validators;

fn main() {
  let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("connhelper=info,warn"));
  // Stdout carries relayed bytes, so logs must stay on stderr
  let collector = tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .finish();
  tracing::subscriber::set_global_default(collector).expect("Logger init must succeed");
  let ssh_flag = Arg::new("ssh-flag")
    .help("Extra argument for every ssh invocation; repeat to pass several, in order")
    .long("ssh-flag")
    .short('o')
    .takes_value(true)
    .allow_hyphen_values(true)
    .multiple_occurrences(true);
  let daemon_url = Arg::new("url")
    .help("Daemon address, such as ssh://user@host:22 or tcp://host:2375")
    .validator(validate_daemon_url)
    .takes_value(true)
    .required(true);
  let app = Command::new(env!("CARGO_BIN_NAME"))
    .version(env!("CARGO_PKG_VERSION"))
    .about(env!("CARGO_PKG_DESCRIPTION"))
    .subcommand(
      Command::new("dial")
        .about("Connect to a daemon and relay stdin/stdout over the connection")
        .arg(daemon_url.clone())
        .arg(ssh_flag.clone())
        .arg(
          Arg::new("timeout")
            .help("Give up on establishing the connection after this many seconds")
            .long("timeout")
            .short('t')
            .validator(validate_timeout)
            .takes_value(true)
            .required(false),
        ),
    )
    .subcommand(
      Command::new("describe")
        .about("Print how a daemon URL would be reached, as JSON")
        .arg(daemon_url)
        .arg(ssh_flag),
    )
    .subcommand_required(true)
    .arg_required_else_help(true);
  let matches = app.get_matches();
  let mode = matches.subcommand_name().unwrap_or("<No subcommand?>");
  let shutdown = CancellationToken::new();
  let handler = main_args_handler(&matches, shutdown.clone());
  let rt = tokio::runtime::Builder::new_multi_thread()
    .thread_name("tokio-reactor-worker")
    .enable_all()
    .build()
    .expect("Tokio Runtime setup failure");
  rt.spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      shutdown.cancel();
    }
  });
  let result = rt.block_on(handler);
  // A blocking stdin read may still be outstanding; don't wait for it
  rt.shutdown_background();
  match result {
    Err(err) => {
      tracing::error!(mode = mode, err = ?err, "dispatch_command_failure");
      eprintln!("Error: {:#}", err);
      std::process::exit(1);
    }
    Ok(_) => tracing::debug!("{} exited successfully", mode),
  }
}

fn ssh_flags(args: &'_ ArgMatches) -> Vec<String> {
  args
    .values_of("ssh-flag")
    .map(|flags| flags.map(String::from).collect())
    .unwrap_or_default()
}

pub fn dial_arg_handling(args: &'_ ArgMatches) -> Result<dial::DialArgs> {
  Ok(dial::DialArgs {
    daemon_url: parse_daemon_url(args.value_of("url").unwrap())?,
    ssh_flags: ssh_flags(args),
    timeout: args.value_of("timeout").map(parse_timeout).transpose()?,
  })
}

pub fn describe_arg_handling(args: &'_ ArgMatches) -> Result<describe::DescribeArgs> {
  Ok(describe::DescribeArgs {
    daemon_url: parse_daemon_url(args.value_of("url").unwrap())?,
    ssh_flags: ssh_flags(args),
  })
}

async fn main_args_handler(matches: &'_ ArgMatches, shutdown: CancellationToken) -> Result<()> {
  match matches
    .subcommand()
    .expect("Subcommand is marked as required")
  {
    ("dial", opts) => {
      let config = dial_arg_handling(opts)?;
      tracing::debug!("Dialing with config {:#?}", config);
      dial::dial_main(config, shutdown).await
    }
    ("describe", opts) => {
      let config = describe_arg_handling(opts)?;
      describe::describe_main(config).await
    }
    (_, _) => unreachable!(),
  }
}
