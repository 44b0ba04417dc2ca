use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, UpdaterConfig};
use crate::engine::UpdateEngine;
use crate::engine::state::{CheckResult, Stage, UpdateOutcome, UpdateState};

mod archive;
mod config;
mod engine;
mod env;
mod error;
mod install;
mod networking;
mod storage;
mod util;

#[derive(Parser, Debug)]
#[command(
    name = "release-updater",
    author,
    version,
    about = "Checks the release service for a newer build and installs it in place"
)]
struct Cli {
    /// Identifier of the installed build. Defaults to the id in the state file.
    #[arg(long)]
    local_id: Option<String>,

    /// JSON config file; flags and environment variables override its values.
    #[arg(long, short, env = "UPDATER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "UPDATER_API_BASE")]
    api_base: Option<String>,

    #[arg(long, env = "UPDATER_DOWNLOAD_BASE")]
    download_base: Option<String>,

    #[arg(long, env = "UPDATER_STATE_FILE")]
    state_file: Option<PathBuf>,

    #[arg(long, env = "UPDATER_INSTALL_DIR")]
    install_dir: Option<PathBuf>,

    /// Parent directory for temporary extraction (defaults to the system temp dir).
    #[arg(long, env = "UPDATER_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Refuse releases that do not publish a SHA-256 checksum.
    #[arg(long)]
    require_checksum: bool,

    /// Only report whether an update is available.
    #[arg(long)]
    check_only: bool,
}

impl Cli {
    fn resolve_config(&self) -> Result<UpdaterConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => UpdaterConfig::load(path)?,
            None => UpdaterConfig::default(),
        };
        if let Some(api_base) = &self.api_base {
            config.api_base = api_base.clone();
        }
        if let Some(download_base) = &self.download_base {
            config.download_base = download_base.clone();
        }
        if let Some(state_file) = &self.state_file {
            config.state_file = state_file.clone();
        }
        if let Some(install_dir) = &self.install_dir {
            config.install_dir = install_dir.clone();
        }
        if let Some(staging_dir) = &self.staging_dir {
            config.staging_dir = Some(staging_dir.clone());
        }
        config.require_checksum |= self.require_checksum;
        config.validate()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(err) => {
            error!("config: {err}");
            return ExitCode::from(2);
        }
    };

    let cancel_flag = Arc::new(AtomicBool::new(false));
    watch_for_interrupt(cancel_flag.clone());
    let mut engine = UpdateEngine::new(&config, cancel_flag);
    debug!(
        "updater: state file {}, install dir {}",
        engine.store().path().display(),
        config.install_dir.display()
    );

    let local_id = match cli.local_id {
        Some(id) => id,
        // A broken state file is reported by the run itself at the load stage.
        None => engine
            .store()
            .load()
            .await
            .map(|record| record.id().to_owned())
            .unwrap_or_default(),
    };

    if cli.check_only {
        return report_check(&engine, &local_id).await;
    }

    let (updates, receiver) = mpsc::unbounded_channel();
    let progress = spawn_progress(receiver);
    let result = engine.run(&local_id, &updates).await;
    drop(updates);
    let _ = progress.await;
    debug!("updater: finished in state {:?}", engine.state);

    match result {
        Ok(UpdateOutcome::UpToDate { version }) => {
            println!("Up to date (version {}).", display_version(&version));
            ExitCode::SUCCESS
        }
        Ok(UpdateOutcome::Installed { record, files }) => {
            println!(
                "Update completed: version {} ({files} files).",
                record.version()
            );
            ExitCode::SUCCESS
        }
        Err(failure) if failure.stage == Stage::Persist => {
            let Some(record) = failure.pending_record else {
                eprintln!("Update failed at {} stage: {}", failure.stage, failure.error);
                return ExitCode::FAILURE;
            };
            warn!("files are installed but the version file is stale; retrying the write");
            match engine.persist(&record).await {
                Ok(()) => {
                    println!("Update completed: version {}.", record.version());
                    ExitCode::SUCCESS
                }
                Err(retry) => {
                    eprintln!(
                        "Version {} is installed but could not be recorded: {}",
                        record.version(),
                        retry.error
                    );
                    ExitCode::FAILURE
                }
            }
        }
        Err(failure) => {
            eprintln!("Update failed at {} stage: {}", failure.stage, failure.error);
            ExitCode::FAILURE
        }
    }
}

async fn report_check(engine: &UpdateEngine, local_id: &str) -> ExitCode {
    match engine.check(local_id).await {
        Ok(CheckResult::UpToDate { local }) => {
            println!("Up to date (version {}).", display_version(local.version()));
            ExitCode::SUCCESS
        }
        Ok(CheckResult::UpdateAvailable { local, remote }) => {
            println!(
                "Update available: {} -> {} (released {}).",
                display_version(local.version()),
                remote.version(),
                remote.release_date()
            );
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("Check failed at {} stage: {}", failure.stage, failure.error);
            ExitCode::FAILURE
        }
    }
}

fn display_version(version: &str) -> &str {
    if version.is_empty() { "none" } else { version }
}

fn watch_for_interrupt(cancel_flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupt received; stopping before the next step (press Ctrl-C again to abort)");
        cancel_flag.store(true, Ordering::SeqCst);
        if tokio::signal::ctrl_c().await.is_ok() {
            // Exiting here skips destructors, so a staging directory in use is left behind.
            error!("aborted by user");
            std::process::exit(130);
        }
    });
}

fn spawn_progress(mut receiver: mpsc::UnboundedReceiver<UpdateState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner} {wide_msg} [{bar:30}] {percent:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        while let Some(state) = receiver.recv().await {
            match state {
                UpdateState::Checking { local_id } => {
                    bar.set_message(format!("checking release for {local_id:?}"));
                }
                UpdateState::Updating { stage, version } => {
                    bar.set_message(format!("{stage} {version}"));
                }
                UpdateState::Downloading {
                    progress, speed, ..
                } => {
                    bar.set_position(progress as u64);
                    bar.set_message(format!("download {speed}"));
                }
                state if state.is_terminal() => {
                    bar.finish_and_clear();
                }
                _ => {}
            }
        }
        bar.finish_and_clear();
    })
}
