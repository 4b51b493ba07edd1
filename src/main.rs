use clap::Parser;
use color_eyre::Result;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;

use fleetq::app::{self, App};
use fleetq::cli::Args;
use fleetq::config::Config;
use fleetq::logging;
use fleetq::toast::ConsoleToaster;

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose);

  // Load configuration, with --url / FLEETQ_API_URL taking precedence
  let config = Config::resolve(args.config.as_deref(), args.url.clone())?;

  let client = app::query_client(&config.cache)?;
  let toaster = Arc::new(ConsoleToaster {
    quiet: args.json || !std::io::stderr().is_terminal(),
  });

  let app = App::new(&config, client, toaster, args.json)?;
  let mut stdout = std::io::stdout().lock();
  let outcome = app.run(args.command, &mut stdout).await?;

  Ok(outcome.into())
}
