pub mod board;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod filter;
pub mod format;
pub mod hooks;
pub mod lifecycle;
pub mod live;
pub mod preferences;
pub mod projector;
pub mod recurrence;
pub mod render;
pub mod sort;
pub mod task;

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::board::Board;
use crate::config::Config;
use crate::datastore::{
  JsonlStore,
  TaskStore
};
use crate::datetime::{
  Clock,
  SystemClock,
  resolve_timezone
};
use crate::hooks::HookNotifier;
use crate::lifecycle::TaskLifecycleManager;
use crate::preferences::{
  PREFERENCES_FILE,
  Preferences
};
use crate::render::Renderer;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting tick"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = Config::load(
    cli.tickrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_time()
      .build()
      .context(
        "failed to start async \
         runtime"
      )?;
  runtime.block_on(run_session(
    cfg, data_dir, cli.rest
  ))?;

  info!("done");
  Ok(())
}

async fn run_session(
  cfg: Config,
  data_dir: PathBuf,
  rest: Vec<OsString>
) -> anyhow::Result<()> {
  let store: Arc<dyn TaskStore> =
    Arc::new(
      JsonlStore::open(&data_dir)
        .with_context(|| {
          format!(
            "failed to open datastore \
             at {}",
            data_dir.display()
          )
        })?
    );
  let prefs = Arc::new(
    Preferences::load(
      &data_dir.join(PREFERENCES_FILE)
    )?
  );
  let clock: Arc<dyn Clock> =
    Arc::new(SystemClock::new(
      resolve_timezone(
        cfg.get("timezone").as_deref()
      )
    ));
  let notifier = Arc::new(
    HookNotifier::new(&cfg, &data_dir)
  );
  let manager =
    TaskLifecycleManager::new(
      store, notifier, clock
    )
    .with_completion_delay(
      cfg.completion_delay()?
    );

  let renderer = Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, rest
  )?;

  let mut board =
    Board::new(manager, prefs);
  let result = commands::dispatch(
    &mut board, &cfg, &renderer, inv
  )
  .await;

  board.settle().await;
  board.shutdown();
  result
}
