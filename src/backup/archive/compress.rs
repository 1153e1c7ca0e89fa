use crate::backup::archive::{
    entry_name, worker_pool, ArchiveReport, CompressionProfile, COMPRESS_WORKER_CAP,
};
use crate::backup::function_path;
use crate::backup::progress::{percent_of, Progress};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;
use chrono::{DateTime, Datelike, Local, Timelike};
use function_name::named;
use itertools::Itertools;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entries at or above this size need zip64 headers
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;
const LOG_EVERY: usize = 50;

type SharedWriter = Mutex<ZipWriter<BufWriter<File>>>;

#[derive(Debug)]
struct SourceFile {
    absolute: PathBuf,
    relative: String,
    size: u64,
    modified: Option<SystemTime>,
}

#[derive(Default)]
struct Tally {
    processed: usize,
    failed: usize,
    bytes: u64,
}

/// Compresses every regular file below `source_dir` into a new archive at `archive_path`.
///
/// Files are read by a bounded worker pool, largest first, and appended to a single writer.
/// A file that cannot be read or appended is logged and counted in
/// [`ArchiveReport::failed`]; the call only fails when the archive itself cannot be
/// created or finalized. An empty source produces an empty, valid archive.
#[named]
pub fn compress(
    source_dir: &Path,
    archive_path: &Path,
    profile: CompressionProfile,
    progress: &dyn Progress,
) -> Result<ArchiveReport> {
    progress.report(0, "Scanning files for compression...");
    let files = collect_files(source_dir)
        .with_debug_object_and_fn_name(source_dir.to_path_buf(), function_path!())?;
    let total = files.len();
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();
    info!(
        "Compressing {} files ({} bytes) from {:?} with {:?} profile",
        total, total_bytes, source_dir, profile
    );
    progress.report(5, &format!("Compressing {total} files ({} KB)...", total_bytes / 1024));
    if total == 0 {
        warn!("No files found to compress in {:?}", source_dir);
    }

    write_archive(files, archive_path, profile, progress)
}

/// Writes `files` into a new archive. The pool is built before the archive file is created,
/// so a pool failure leaves nothing on disk.
fn write_archive(
    files: Vec<SourceFile>,
    archive_path: &Path,
    profile: CompressionProfile,
    progress: &dyn Progress,
) -> Result<ArchiveReport> {
    let total = files.len();
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();
    let pool = worker_pool(COMPRESS_WORKER_CAP, "compressor")?;

    let file = File::create(archive_path).map_err(|e| Error::Compression {
        path: archive_path.to_path_buf(),
        reason: format!("cannot create archive: {e}"),
    })?;
    let writer: SharedWriter = Mutex::new(ZipWriter::new(BufWriter::new(file)));
    let tally = Mutex::new(Tally::default());
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(profile.deflate_level()));

    if total > 0 {
        debug!("Starting compression with {} threads", pool.current_num_threads());
        pool.install(|| {
            files.into_iter().par_bridge().for_each(|source| {
                let res = append_file(&writer, &source, &options);
                let mut tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
                tally.processed += 1;
                match res {
                    Ok(_) => tally.bytes += source.size,
                    Err(e) => {
                        tally.failed += 1;
                        warn!("Failed to compress {:?}: {e}", source.absolute);
                    }
                }
                let percent =
                    5 + (u32::from(percent_of(tally.processed as u64, total as u64)) * 90 / 100) as u8;
                progress.report(
                    percent,
                    &format!(
                        "Compressed {}/{} files ({} MB)",
                        tally.processed,
                        total,
                        tally.bytes / (1024 * 1024)
                    ),
                );
                if tally.processed % LOG_EVERY == 0 || tally.processed == total {
                    info!("Compression progress: {}/{} files", tally.processed, total);
                }
            })
        });
    }

    let writer = writer.into_inner().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = finalize(writer) {
        if let Err(remove_err) = std::fs::remove_file(archive_path) {
            warn!("Removing unfinished archive {:?} failed: {remove_err}", archive_path);
        }
        return Err(Error::Compression {
            path: archive_path.to_path_buf(),
            reason: e.to_string(),
        });
    }

    let tally = tally.into_inner().unwrap_or_else(PoisonError::into_inner);
    let report = ArchiveReport {
        total,
        failed: tally.failed,
        bytes: tally.bytes,
    };
    if report.failed > 0 {
        warn!("Compression completed with {} failed files", report.failed);
    }
    let final_size = std::fs::metadata(archive_path).map(|m| m.len()).unwrap_or(0);
    info!(
        "Compression complete: {} files, {} -> {} bytes in {:?}",
        report.succeeded(),
        total_bytes,
        final_size,
        archive_path
    );
    progress.report(100, "Compression completed");
    Ok(report)
}

fn collect_files(source_dir: &Path) -> Result<Vec<SourceFile>> {
    if !source_dir.is_dir() {
        return Err(Error::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{source_dir:?} is not a directory"),
        )));
    }

    let files = WalkDir::new(source_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|res| match res {
            Ok(de) if de.file_type().is_file() => Some(de),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping inaccessible entry: {e}");
                None
            }
        })
        .filter_map(|de| {
            let metadata = de
                .metadata()
                .map_err(|e| warn!("Skipping inaccessible file {:?}: {e}", de.path()))
                .ok()?;
            let relative = de.path().strip_prefix(source_dir).ok()?;
            Some(SourceFile {
                relative: entry_name(relative),
                absolute: de.path().to_path_buf(),
                size: metadata.len(),
                modified: metadata.modified().ok(),
            })
        })
        .sorted_unstable_by_key(|f| Reverse(f.size))
        .collect_vec();

    Ok(files)
}

/// Reads the file outside the writer lock so disk reads overlap with compression.
fn append_file(
    writer: &SharedWriter,
    source: &SourceFile,
    options: &SimpleFileOptions,
) -> Result<()> {
    let data = std::fs::read(&source.absolute)?;
    let options = options
        .clone()
        .large_file(data.len() as u64 >= ZIP64_THRESHOLD)
        .last_modified_time(zip_date_time(source.modified));

    let mut zip = writer.lock().unwrap_or_else(PoisonError::into_inner);
    zip.start_file(source.relative.as_str(), options)?;
    if let Err(e) = zip.write_all(&data) {
        if let Err(abort_err) = zip.abort_file() {
            warn!("Discarding partial entry {:?} failed: {abort_err}", source.relative);
        }
        return Err(e.into());
    }
    Ok(())
}

fn finalize(writer: ZipWriter<BufWriter<File>>) -> Result<()> {
    writer
        .finish()?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()?;
    Ok(())
}

fn zip_date_time(modified: Option<SystemTime>) -> zip::DateTime {
    modified
        .map(|t| DateTime::<Local>::from(t).naive_local())
        .and_then(|dt| {
            zip::DateTime::from_date_and_time(
                u16::try_from(dt.year()).ok()?,
                dt.month() as u8,
                dt.day() as u8,
                dt.hour() as u8,
                dt.minute() as u8,
                dt.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}
