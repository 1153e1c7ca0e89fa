//! Backup and restore pipelines.
//!
//! Backup: validate sources, stage a mirror of each source directory under
//! `<temp_base_dir>/<token>`, compress the staging tree, move the archive to
//! `<dest_dir>/<token>.zip`, clean up, then prune the destination.
//!
//! Restore: validate the archive, extract it to `<temp_base_dir>/restore_<token>`, check the
//! expected directories are there, then replace each live directory in turn. Nothing under the
//! game directory is touched until the extracted tree has been checked.

use crate::backup::archive::{self, ArchiveReport};
use crate::backup::function_path;
use crate::backup::mirror::Mirror;
use crate::backup::progress::{Progress, ScaledProgress};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::retention::PruneReport;
use crate::backup::schedule::{InFlight, JobLauncher};
use crate::backup::settings::{Settings, SettingsSource};
use crate::backup::token::TimestampToken;
use crate::backup::validate::{into_error, validate_dir_exist, validate_writable_dir};
use chrono::Local;
use function_name::named;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    /// Failed after something was written; staging was cleaned up best-effort
    Failed,
    /// Stopped before any side effect
    Aborted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupOutcome {
    pub archive: PathBuf,
    pub size: u64,
    pub failed_files: usize,
    pub retention: PruneReport,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub restored_dirs: Vec<PathBuf>,
    pub failed_files: usize,
}

#[derive(Debug, Getters, CopyGetters)]
pub struct BackupJob {
    #[getset(get_copy = "pub")]
    token: TimestampToken,
    #[getset(get = "pub")]
    sources: Vec<PathBuf>,
    #[getset(get = "pub")]
    staging_dir: PathBuf,
    /// Intermediate archive next to the staging directory
    #[getset(get = "pub")]
    archive_path: PathBuf,
    #[getset(get = "pub")]
    dest_path: PathBuf,
    #[getset(get_copy = "pub")]
    status: JobStatus,
    #[getset(get = "pub")]
    outcome: Option<BackupOutcome>,
    #[getset(get = "pub")]
    error: Option<Error>,
}

impl BackupJob {
    fn new(token: TimestampToken, settings: &Settings) -> Self {
        Self {
            token,
            sources: settings.source_paths(),
            staging_dir: settings.temp_base_dir.join(token.to_string()),
            archive_path: settings.temp_base_dir.join(token.archive_file_name()),
            dest_path: settings.dest_dir.join(token.archive_file_name()),
            status: JobStatus::Running,
            outcome: None,
            error: None,
        }
    }

    fn succeed(&mut self, outcome: BackupOutcome) {
        self.status = JobStatus::Succeeded;
        self.outcome = Some(outcome);
    }

    fn fail(&mut self, status: JobStatus, error: Error) {
        self.status = status;
        self.error = Some(error);
    }

    pub fn into_result(self) -> Result<BackupOutcome> {
        match (self.outcome, self.error) {
            (Some(outcome), _) => Ok(outcome),
            (None, Some(error)) => Err(error),
            (None, None) => Err(Error::validation(self.staging_dir, "backup job never ran")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Orchestrator {
    settings: Arc<dyn SettingsSource>,
    mirror: Arc<dyn Mirror>,
}

impl Orchestrator {
    pub fn new(settings: Arc<dyn SettingsSource>, mirror: Arc<dyn Mirror>) -> Self {
        Self { settings, mirror }
    }

    /// Runs one backup to completion. Only a settings read failure is returned as `Err`;
    /// every later failure is recorded on the returned job.
    pub fn backup(&self, progress: &dyn Progress) -> Result<BackupJob> {
        self.backup_as(TimestampToken::now(), progress)
    }

    fn backup_as(&self, token: TimestampToken, progress: &dyn Progress) -> Result<BackupJob> {
        let settings = self.settings.snapshot()?;
        let mut job = BackupJob::new(token, &settings);
        info!("Starting backup {}", job.token);
        progress.report(0, "Starting backup...");

        if let Err(e) = self.prepare_backup(&job, &settings, progress) {
            let status = if e.is_pre_mutation() {
                JobStatus::Aborted
            } else {
                JobStatus::Failed
            };
            error!("Backup {} aborted: {e}", job.token);
            job.fail(status, e);
            return Ok(job);
        }

        match self.stage_and_archive(&job, &settings, progress) {
            Ok((archive_report, size)) => {
                remove_dir_best_effort(&job.staging_dir);
                progress.report(95, "Rotating old backups...");
                let retention = settings
                    .retention_policy()
                    .prune(&settings.dest_dir, Local::now().naive_local());
                let archive = job.dest_path.clone();
                info!("Backup completed successfully: {:?}", archive);
                job.succeed(BackupOutcome {
                    archive,
                    size,
                    failed_files: archive_report.failed,
                    retention,
                });
                progress.report(100, "Backup completed successfully!");
            }
            Err(e) => {
                error!("Backup {} failed: {e}", job.token);
                remove_dir_best_effort(&job.staging_dir);
                remove_file_best_effort(&job.archive_path);
                job.fail(JobStatus::Failed, e);
            }
        }
        Ok(job)
    }

    /// Everything that may fail before the job writes anything, ending with the exclusive
    /// creation of the staging directory.
    fn prepare_backup(&self, job: &BackupJob, settings: &Settings, progress: &dyn Progress) -> Result<()> {
        let missing = job
            .sources
            .iter()
            .filter_map(|src| validate_dir_exist(src).err().map(|e| into_error(src, e)))
            .collect_vec();
        convert_error_vec(missing).with_msg("Required source directories are missing")?;

        validate_writable_dir(&settings.temp_base_dir)
            .map_err(|e| into_error(&settings.temp_base_dir, e))?;

        progress.report(5, "Creating staging directory...");
        // an existing directory belongs to another job with the same token, leave it alone
        std::fs::create_dir(&job.staging_dir)
            .map_err(|e| Error::validation(&job.staging_dir, format!("cannot create staging directory: {e}")))
    }

    #[named]
    fn stage_and_archive(
        &self,
        job: &BackupJob,
        settings: &Settings,
        progress: &dyn Progress,
    ) -> Result<(ArchiveReport, u64)> {
        let count = job.sources.len().max(1);
        for (index, (name, src)) in settings.source_dirs.iter().zip(&job.sources).enumerate() {
            let percent = 10 + (index * 55 / count) as u8;
            progress.report(percent, &format!("Copying {name}..."));
            self.mirror
                .mirror(src, &job.staging_dir.join(name))
                .with_msg(format!("Staging {name} failed"))?;
        }
        progress.report(65, "Copy complete");

        let report = archive::compress(
            &job.staging_dir,
            &job.archive_path,
            settings.compression_profile(),
            &ScaledProgress::new(progress, 70, 85),
        )
        .with_debug_object_and_fn_name(job.token, function_path!())?;
        if report.failed > 0 {
            warn!("{} of {} files could not be compressed", report.failed, report.total);
        }
        match archive::list_contents(&job.archive_path) {
            Ok(entries) => info!("Archive contains {} entries", entries.len()),
            Err(e) => warn!("Cannot list archive contents: {e}"),
        }

        progress.report(90, "Finalizing backup...");
        std::fs::create_dir_all(&settings.dest_dir)
            .map_err(Error::from)
            .with_msg(format!("Cannot create destination {:?}", settings.dest_dir))?;
        move_file(&job.archive_path, &job.dest_path)?;
        let size = std::fs::metadata(&job.dest_path)?.len();
        Ok((report, size))
    }

    /// Restores the directories listed in the settings from `archive_path`.
    pub fn restore(&self, archive_path: &Path, progress: &dyn Progress) -> Result<RestoreOutcome> {
        let settings = self.settings.snapshot()?;
        info!("Starting restore from {:?}", archive_path);
        progress.report(0, "Starting restore...");

        if !archive_path.is_file() {
            return Err(Error::validation(archive_path, "archive not found"));
        }
        progress.report(10, "Validating archive...");
        if !archive::validate(archive_path) {
            return Err(Error::extraction(archive_path, "archive failed the integrity check"));
        }
        let entries = archive::list_contents(archive_path)?;
        info!("Archive contains {} items", entries.len());

        validate_writable_dir(&settings.temp_base_dir)
            .map_err(|e| into_error(&settings.temp_base_dir, e))?;
        let temp_dir = settings
            .temp_base_dir
            .join(format!("restore_{}", TimestampToken::now()));

        let result = self.restore_from(archive_path, &temp_dir, &settings, progress);
        progress.report(95, "Cleaning up...");
        remove_dir_best_effort(&temp_dir);
        match &result {
            Ok(outcome) => {
                info!("Restore completed: {:?}", outcome.restored_dirs);
                progress.report(100, "Restore completed successfully!");
            }
            Err(e) => error!("Restore from {:?} failed: {e}", archive_path),
        }
        result
    }

    fn restore_from(
        &self,
        archive_path: &Path,
        temp_dir: &Path,
        settings: &Settings,
        progress: &dyn Progress,
    ) -> Result<RestoreOutcome> {
        let report = archive::extract(archive_path, temp_dir, &ScaledProgress::new(progress, 20, 70))?;
        if report.failed > 0 {
            warn!("{} of {} entries could not be extracted", report.failed, report.total);
        }

        let missing = settings
            .source_dirs
            .iter()
            .filter(|name| !temp_dir.join(name).is_dir())
            .collect_vec();
        if !missing.is_empty() {
            return Err(Error::extraction(
                archive_path,
                format!("missing expected directories: {}", missing.iter().join(", ")),
            ));
        }

        let wow_dir = settings.wow_dir();
        let count = settings.source_dirs.len();
        let mut restored_dirs = Vec::with_capacity(count);
        for (index, name) in settings.source_dirs.iter().enumerate() {
            let percent = 75 + (index * 15 / count) as u8;
            progress.report(percent, &format!("Restoring {name}..."));
            let live = wow_dir.join(name);
            replace_dir(self.mirror.as_ref(), &temp_dir.join(name), &live)
                .with_msg(format!("Restoring {name} failed"))?;
            restored_dirs.push(live);
        }
        progress.report(90, "Directories restored");

        Ok(RestoreOutcome {
            restored_dirs,
            failed_files: report.failed,
        })
    }

    /// Applies the retention policy to the destination now.
    pub fn prune(&self) -> Result<PruneReport> {
        let settings = self.settings.snapshot()?;
        Ok(settings
            .retention_policy()
            .prune(&settings.dest_dir, Local::now().naive_local()))
    }
}

impl JobLauncher for Orchestrator {
    fn launch(&self, guard: InFlight) -> Result<()> {
        let orchestrator = self.clone();
        std::thread::Builder::new()
            .name("backup-job".into())
            .spawn(move || {
                let _guard = guard;
                let progress = |percent: u8, message: &str| debug!("[{percent:>3}%] {message}");
                match orchestrator.backup(&progress).and_then(BackupJob::into_result) {
                    Ok(outcome) => info!("Scheduled backup written to {:?}", outcome.archive),
                    Err(e) => error!("Scheduled backup failed: {e}"),
                }
            })?;
        Ok(())
    }
}

fn replace_dir(mirror: &dyn Mirror, extracted: &Path, live: &Path) -> Result<()> {
    if live.exists() {
        debug!("Removing {:?}", live);
        std::fs::remove_dir_all(live)?;
    }
    mirror.mirror(extracted, live)?;
    Ok(())
}

/// Renames `src` to `dst`, falling back to a copy through `<dst>.tmp` across filesystems.
fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    let mut tmp = dst.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    debug!("Rename failed, copying {:?} -> {:?}", src, tmp);
    if let Err(e) = std::fs::copy(src, &tmp).and_then(|_| std::fs::rename(&tmp, dst)) {
        remove_file_best_effort(&tmp);
        return Err(Error::from(e).with_msg(format!("Move {src:?} -> {dst:?} failed")));
    }
    remove_file_best_effort(src);
    Ok(())
}

fn remove_dir_best_effort(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("Could not remove temporary directory {:?}: {e}", dir);
        }
    }
}

fn remove_file_best_effort(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Could not remove {:?}: {e}", path);
        }
    }
}
