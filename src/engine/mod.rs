use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use log::{debug, error, info, warn};
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::archive;
use crate::config::UpdaterConfig;
use crate::engine::models::VersionRecord;
use crate::engine::state::{CheckResult, Stage, UpdateOutcome, UpdateState};
use crate::error::{ExtractionError, InstallError, UpdateError, UpdateFailure};
use crate::install;
use crate::networking::VersionResolver;
use crate::storage::VersionStore;
use crate::util::{cancel_requested, progress_percent};

pub mod models;
pub mod state;

/// A newer release exists when the version labels differ.
///
/// The id is ignored: a republished build with the same label is not an
/// update, even though the id is what the download URL is built from.
pub fn is_new_version_available(local: &VersionRecord, remote: &VersionRecord) -> bool {
    local.version() != remote.version()
}

/// Drives check, download, extract, install and persist for one install directory.
///
/// Runs against the same install directory must not overlap.
pub struct UpdateEngine {
    pub state: UpdateState,
    resolver: VersionResolver,
    store: VersionStore,
    install_dir: PathBuf,
    staging_dir: Option<PathBuf>,
    require_checksum: bool,
    cancel_flag: Arc<AtomicBool>,
}

impl UpdateEngine {
    pub fn new(config: &UpdaterConfig, cancel_flag: Arc<AtomicBool>) -> Self {
        let resolver = VersionResolver::new(
            config.endpoints(),
            config.lookup_timeout(),
            config.download_timeout(),
        );
        Self {
            state: UpdateState::Idle,
            resolver,
            store: VersionStore::new(&config.state_file),
            install_dir: config.install_dir.clone(),
            staging_dir: config.staging_dir.clone(),
            require_checksum: config.require_checksum,
            cancel_flag,
        }
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Compare the installed record with what the service reports for `local_id`.
    pub async fn check(&self, local_id: &str) -> Result<CheckResult, UpdateFailure> {
        let local = self
            .store
            .load()
            .await
            .map_err(|err| UpdateFailure::new(Stage::Load, err))?;
        if local.is_sentinel() {
            debug!("engine: nothing installed yet");
        } else {
            debug!(
                "engine: local version {:?} (id {:?})",
                local.version(),
                local.id()
            );
        }

        let remote = self
            .resolver
            .fetch_version(local_id)
            .await
            .map_err(|err| UpdateFailure::new(Stage::Lookup, err))?;

        match remote {
            Some(remote) if is_new_version_available(&local, &remote) => {
                info!(
                    "engine: update available {:?} -> {:?}",
                    local.version(),
                    remote.version()
                );
                Ok(CheckResult::UpdateAvailable { local, remote })
            }
            Some(_) => Ok(CheckResult::UpToDate { local }),
            None => {
                info!("engine: no remote release for {local_id:?}; treating as up to date");
                Ok(CheckResult::UpToDate { local })
            }
        }
    }

    /// Bring the install directory up to date.
    ///
    /// The new record is written only after every file is in place, so any
    /// earlier failure leaves the old version recorded and the run can simply
    /// be repeated.
    pub async fn run(
        &mut self,
        local_id: &str,
        updates: &mpsc::UnboundedSender<UpdateState>,
    ) -> Result<UpdateOutcome, UpdateFailure> {
        self.transition(
            UpdateState::Checking {
                local_id: local_id.to_owned(),
            },
            updates,
        );

        let remote = match self.check(local_id).await {
            Ok(CheckResult::UpToDate { local }) => {
                let version = local.version().to_owned();
                info!("engine: up to date (version {version:?})");
                self.transition(
                    UpdateState::UpToDate {
                        version: version.clone(),
                    },
                    updates,
                );
                return Ok(UpdateOutcome::UpToDate { version });
            }
            Ok(CheckResult::UpdateAvailable { remote, .. }) => remote,
            Err(failure) => return Err(self.fail(failure, updates)),
        };

        let files = match self.apply(&remote, updates).await {
            Ok(files) => files,
            Err(failure) => return Err(self.fail(failure, updates)),
        };

        if let Err(err) = self.store.save(&remote).await {
            let failure = UpdateFailure {
                stage: Stage::Persist,
                error: err.into(),
                pending_record: Some(remote),
            };
            return Err(self.fail(failure, updates));
        }

        info!(
            "engine: update completed, version {} installed into {}",
            remote.version(),
            self.install_dir.display()
        );
        self.transition(
            UpdateState::Installed {
                version: remote.version().to_owned(),
                files,
            },
            updates,
        );
        Ok(UpdateOutcome::Installed {
            record: remote,
            files,
        })
    }

    /// Record `record` as installed. Used to retry after a `persist` failure.
    pub async fn persist(&self, record: &VersionRecord) -> Result<(), UpdateFailure> {
        self.store.save(record).await.map_err(|err| UpdateFailure {
            stage: Stage::Persist,
            error: err.into(),
            pending_record: Some(record.clone()),
        })
    }

    async fn apply(
        &mut self,
        remote: &VersionRecord,
        updates: &mpsc::UnboundedSender<UpdateState>,
    ) -> Result<usize, UpdateFailure> {
        self.enter(Stage::Download, remote, updates)?;
        let bytes = self
            .resolver
            .fetch_archive(remote, |downloaded, total, speed| {
                let _ = updates.send(UpdateState::Downloading {
                    progress: progress_percent(downloaded, total),
                    speed: speed.to_owned(),
                    downloaded,
                    total,
                });
            })
            .await
            .map_err(|err| UpdateFailure::new(Stage::Download, err))?;

        self.enter(Stage::Verify, remote, updates)?;
        match remote.sha256() {
            Some(expected) => archive::verify_sha256(&bytes, expected)
                .map_err(|err| UpdateFailure::new(Stage::Verify, err))?,
            None if self.require_checksum => {
                return Err(UpdateFailure::new(
                    Stage::Verify,
                    ExtractionError::MissingChecksum {
                        id: remote.id().to_owned(),
                    },
                ));
            }
            None => warn!(
                "engine: release {} has no checksum; archive is unverified",
                remote.id()
            ),
        }

        self.enter(Stage::Staging, remote, updates)?;
        let staging = self
            .create_staging()
            .map_err(|err| UpdateFailure::new(Stage::Staging, InstallError::Staging(err)))?;
        debug!("engine: staging in {}", staging.path().display());

        self.enter(Stage::Extract, remote, updates)?;
        archive::extract(&bytes, staging.path())
            .map_err(|err| UpdateFailure::new(Stage::Extract, err))?;
        drop(bytes);

        self.enter(Stage::Move, remote, updates)?;
        let files = install::move_tree(staging.path(), &self.install_dir)
            .map_err(|err| UpdateFailure::new(Stage::Move, err))?;

        if let Err(err) = staging.close() {
            warn!("engine: failed to remove staging directory: {err}");
        }
        Ok(files)
    }

    fn create_staging(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("release-update-");
        match &self.staging_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }

    /// Announce `stage`, refusing to start it once cancellation was requested.
    fn enter(
        &mut self,
        stage: Stage,
        remote: &VersionRecord,
        updates: &mpsc::UnboundedSender<UpdateState>,
    ) -> Result<(), UpdateFailure> {
        if self.cancel_requested() {
            warn!("engine: cancelled before {stage}");
            return Err(UpdateFailure::new(stage, UpdateError::Cancelled));
        }
        self.transition(
            UpdateState::Updating {
                stage,
                version: remote.version().to_owned(),
            },
            updates,
        );
        Ok(())
    }

    fn fail(
        &mut self,
        failure: UpdateFailure,
        updates: &mpsc::UnboundedSender<UpdateState>,
    ) -> UpdateFailure {
        error!("engine: {failure}");
        self.transition(
            UpdateState::Failed {
                stage: failure.stage,
                message: failure.error.to_string(),
            },
            updates,
        );
        failure
    }

    fn transition(&mut self, state: UpdateState, updates: &mpsc::UnboundedSender<UpdateState>) {
        self.state = state.clone();
        let _ = updates.send(state);
    }

    fn cancel_requested(&self) -> bool {
        let value = cancel_requested(&self.cancel_flag);
        if value {
            debug!("cancel flag observed set");
        }
        value
    }
}
