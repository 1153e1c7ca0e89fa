use crate::backup::archive::ArchiveEntry;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use chrono::{NaiveDate, NaiveDateTime};
use std::fs::File;
use std::path::Path;
use tracing::{error, info};
use zip::ZipArchive;

pub(crate) fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)
        .map_err(|e| Error::extraction(path, format!("cannot open archive: {e}")))?;
    ZipArchive::new(file)
        .map_err(|e| Error::extraction(path, format!("invalid or corrupted archive: {e}")))
}

/// Checks the stored CRC-32 of every entry by reading each one to the end.
///
/// Returns `false` on the first corrupted entry or if the container cannot be parsed.
pub fn validate(archive_path: &Path) -> bool {
    info!("Validating archive {:?}", archive_path);
    match check_entries(archive_path) {
        Ok(count) => {
            info!("Archive validation successful: {count} entries in {:?}", archive_path);
            true
        }
        Err(e) => {
            error!("Archive validation failed: {e}");
            false
        }
    }
}

fn check_entries(archive_path: &Path) -> Result<usize> {
    let mut archive = open_archive(archive_path)?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        std::io::copy(&mut entry, &mut std::io::sink())
            .map_err(|e| Error::extraction(archive_path, format!("corrupted entry {name:?}: {e}")))?;
    }
    Ok(archive.len())
}

/// Lists entry metadata without extracting anything.
pub fn list_contents(archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = open_archive(archive_path)?;
    let entries = (0..archive.len())
        .map(|index| -> Result<ArchiveEntry> {
            let entry = archive.by_index(index)?;
            Ok(ArchiveEntry {
                path: entry.name().to_string(),
                size: entry.size(),
                compressed_size: entry.compressed_size(),
                modified: entry.last_modified().and_then(naive_date_time),
                is_dir: entry.is_dir(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    info!("Listed {} items in archive {:?}", entries.len(), archive_path);
    Ok(entries)
}

fn naive_date_time(dt: zip::DateTime) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(dt.year().into(), dt.month().into(), dt.day().into())?.and_hms_opt(
        dt.hour().into(),
        dt.minute().into(),
        dt.second().into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::{compress, CompressionProfile};
    use tempfile::TempDir;

    /// Deterministic bytes that deflate cannot shrink much.
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x2545_f491;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    fn build_archive(dir: &TempDir) -> std::path::PathBuf {
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("WTF")).unwrap();
        std::fs::write(src.join("WTF/SavedVariables.lua"), noise(64 * 1024)).unwrap();
        let archive = dir.path().join("a.zip");
        compress(&src, &archive, CompressionProfile::Fast, &|_: u8, _: &str| {}).unwrap();
        archive
    }

    #[test]
    fn test_validate_untouched_archive() {
        let dir = TempDir::new().unwrap();
        let archive = build_archive(&dir);
        assert!(validate(&archive));
    }

    #[test]
    fn test_validate_rejects_flipped_byte() {
        let dir = TempDir::new().unwrap();
        let archive = build_archive(&dir);
        let mut bytes = std::fs::read(&archive).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;
        std::fs::write(&archive, bytes).unwrap();

        assert!(!validate(&archive));
    }

    #[test]
    fn test_validate_rejects_truncated_archive() {
        let dir = TempDir::new().unwrap();
        let archive = build_archive(&dir);
        let bytes = std::fs::read(&archive).unwrap();
        std::fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

        assert!(!validate(&archive));
        assert!(list_contents(&archive).is_err());
    }

    #[test]
    fn test_validate_missing_or_garbage_file() {
        let dir = TempDir::new().unwrap();
        assert!(!validate(&dir.path().join("missing.zip")));

        let garbage = dir.path().join("garbage.zip");
        std::fs::write(&garbage, b"definitely not a zip").unwrap();
        assert!(!validate(&garbage));
    }

    #[test]
    fn test_list_contents_metadata() {
        let dir = TempDir::new().unwrap();
        let archive = build_archive(&dir);

        let entries = list_contents(&archive).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.path(), "WTF/SavedVariables.lua");
        assert_eq!(entry.size(), 64 * 1024);
        assert!(entry.compressed_size() > 0);
        assert!(!entry.is_dir());
        assert!(entry.modified().is_some());
    }
}
