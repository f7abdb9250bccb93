mod api;
mod app;
mod commands;
mod config;
mod error;
mod event;
mod intercept;
mod lifecycle;
mod logging;
mod store;
mod sync;
#[cfg(test)]
mod testing;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "studysync")]
#[command(about = "Offline-first cache, store and sync queue for the study platform")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/studysync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the offline database (default: $XDG_DATA_HOME/studysync/offline.db)
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Keep the guard alive so buffered log lines are flushed on exit
  let _log_guard = logging::init(&config.log_level)?;

  let interactive = matches!(args.command, commands::Command::Update);
  let app = app::App::new(config, args.db, interactive)?;
  app.run(args.command).await?;

  Ok(())
}
