use crate::backup::archive::inspect::open_archive;
use crate::backup::archive::{worker_pool, ArchiveReport, EXTRACT_WORKER_CAP};
use crate::backup::progress::{percent_of, Progress};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};
use zip::ZipArchive;

const LOG_EVERY: usize = 100;

#[derive(Default)]
struct Tally {
    processed: usize,
    failed: usize,
    bytes: u64,
}

/// Extracts every entry of `archive_path` below `dest_dir`.
///
/// Fails before creating `dest_dir` when the archive cannot be opened. Otherwise every worker
/// of the pool opens its own handle on the archive and claims entry indices from a shared
/// cursor. Entries that fail to extract, or whose names would escape `dest_dir`, are logged
/// and counted in [`ArchiveReport::failed`].
pub fn extract(archive_path: &Path, dest_dir: &Path, progress: &dyn Progress) -> Result<ArchiveReport> {
    info!("Starting extraction of {:?} into {:?}", archive_path, dest_dir);
    progress.report(0, "Starting decompression...");

    let total = open_archive(archive_path)?.len();
    std::fs::create_dir_all(dest_dir)?;
    info!("Found {total} entries to extract");
    progress.report(5, &format!("Extracting {total} files..."));

    let cursor = AtomicUsize::new(0);
    let tally = Mutex::new(Tally::default());
    let pool = worker_pool(EXTRACT_WORKER_CAP, "extractor")?;
    pool.broadcast(|_| {
        let mut archive = match open_archive(archive_path) {
            Ok(archive) => archive,
            Err(e) => {
                warn!("Extraction worker could not open archive: {e}");
                return;
            }
        };

        loop {
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            if index >= total {
                break;
            }
            let res = extract_entry(&mut archive, index, dest_dir);

            let mut tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
            tally.processed += 1;
            match res {
                Ok(bytes) => tally.bytes += bytes,
                Err(e) => {
                    tally.failed += 1;
                    warn!("Failed to extract entry #{index}: {e}");
                }
            }
            let percent =
                5 + (u32::from(percent_of(tally.processed as u64, total as u64)) * 90 / 100) as u8;
            progress.report(percent, &format!("Extracted {}/{} files", tally.processed, total));
            if tally.processed % LOG_EVERY == 0 || tally.processed == total {
                info!("Extraction progress: {}/{} files", tally.processed, total);
            }
        }
    });

    let tally = tally.into_inner().unwrap_or_else(PoisonError::into_inner);
    // entries no worker could reach
    let failed = tally.failed + (total - tally.processed);
    let report = ArchiveReport {
        total,
        failed,
        bytes: tally.bytes,
    };
    if failed > 0 {
        warn!("Extraction completed with {failed} failed files out of {total}");
    } else {
        info!("Successfully extracted {total} files");
    }
    progress.report(100, "Decompression completed");
    Ok(report)
}

fn extract_entry(archive: &mut ZipArchive<File>, index: usize, dest_dir: &Path) -> Result<u64> {
    let mut entry = archive.by_index(index)?;
    let relative = entry.enclosed_name().ok_or_else(|| {
        Error::extraction(dest_dir, format!("entry {:?} escapes the destination", entry.name()))
    })?;
    let target = dest_dir.join(relative);

    if entry.is_dir() {
        std::fs::create_dir_all(&target)?;
        return Ok(0);
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut out = BufWriter::new(File::create(&target)?);
    let copied = std::io::copy(&mut entry, &mut out).and_then(|bytes| {
        out.flush()?;
        Ok(bytes)
    });
    match copied {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            drop(out);
            if let Err(remove_err) = std::fs::remove_file(&target) {
                warn!("Removing partial file {:?} failed: {remove_err}", target);
            }
            Err(e.into())
        }
    }
}
